//! Background task that periodically removes expired entries.

use crate::store::EntryStore;
use chrono::Utc;
use log::{debug, info};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Aborts the sweep task when dropped.
pub(crate) struct SweeperHandle {
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a sweeper on the current runtime, if there is one.
///
/// The task holds a weak reference so it never keeps the store alive.
pub(crate) fn spawn_sweeper(store: &Arc<EntryStore>, every: Duration) -> Option<SweeperHandle> {
    if every.is_zero() {
        return None;
    }
    let Ok(runtime) = Handle::try_current() else {
        debug!("no tokio runtime; periodic sweep disabled");
        return None;
    };
    let store: Weak<EntryStore> = Arc::downgrade(store);
    let task = runtime.spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            store.sweep(Utc::now());
        }
    });
    info!("started expiration sweeper (interval_secs={})", every.as_secs());
    Some(SweeperHandle { task })
}
