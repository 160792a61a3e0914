use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use strata_memory::{ContextEntry, EntryKey, MemoryError, PersistenceBackend};

/// What a [`RecordingPersistence`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Upsert { key: String, version: u64 },
    Remove { key: String },
}

/// Backend that keeps every call in memory and can be preloaded.
#[derive(Clone, Default)]
pub struct RecordingPersistence {
    preload: Vec<ContextEntry>,
    calls: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(preload: Vec<ContextEntry>) -> Self {
        Self {
            preload,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PersistenceBackend for RecordingPersistence {
    fn name(&self) -> &str {
        "recording"
    }

    async fn load(&self) -> Result<Vec<ContextEntry>, MemoryError> {
        Ok(self.preload.clone())
    }

    async fn upsert(&self, entry: &ContextEntry) -> Result<(), MemoryError> {
        self.calls.lock().push(Recorded::Upsert {
            key: entry.key.clone(),
            version: entry.sync_version,
        });
        Ok(())
    }

    async fn remove(&self, key: &EntryKey) -> Result<(), MemoryError> {
        self.calls.lock().push(Recorded::Remove {
            key: key.key.clone(),
        });
        Ok(())
    }
}

/// Backend that fails to load, or loads fine and fails every write.
#[derive(Clone, Copy, Default)]
pub struct FailingPersistence {
    fail_load: bool,
}

impl FailingPersistence {
    pub fn on_load() -> Self {
        Self { fail_load: true }
    }

    pub fn on_write() -> Self {
        Self { fail_load: false }
    }
}

#[async_trait]
impl PersistenceBackend for FailingPersistence {
    fn name(&self) -> &str {
        "failing"
    }

    async fn load(&self) -> Result<Vec<ContextEntry>, MemoryError> {
        if self.fail_load {
            return Err(MemoryError::BackendUnavailable("connection refused".into()));
        }
        Ok(Vec::new())
    }

    async fn upsert(&self, _entry: &ContextEntry) -> Result<(), MemoryError> {
        Err(MemoryError::BackendUnavailable("write rejected".into()))
    }

    async fn remove(&self, _key: &EntryKey) -> Result<(), MemoryError> {
        Err(MemoryError::BackendUnavailable("write rejected".into()))
    }
}

/// Backend whose `load` stalls for a fixed delay.
#[derive(Clone, Copy)]
pub struct SlowPersistence {
    delay: Duration,
}

impl SlowPersistence {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PersistenceBackend for SlowPersistence {
    fn name(&self) -> &str {
        "slow"
    }

    async fn load(&self) -> Result<Vec<ContextEntry>, MemoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn upsert(&self, _entry: &ContextEntry) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn remove(&self, _key: &EntryKey) -> Result<(), MemoryError> {
        Ok(())
    }
}
