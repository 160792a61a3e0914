//! Translate configuration into runtime options.

use chrono::Duration as TimeDelta;
use std::time::Duration;
use strata_config::{ArchivePolicy, HandoffLayer, SessionsConfig, StoreConfig, StrataConfig};
use strata_memory::{CoordinatorOptions, LayerPolicy, MemoryLayer};

/// Runtime settings for the session manager and handoff coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub archive_policy: ArchivePolicy,
    /// Layer handoff records are written to.
    pub handoff_layer: MemoryLayer,
    /// How many recent messages a handoff snapshot carries.
    pub handoff_history_tail: usize,
    pub idle_timeout: TimeDelta,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

impl From<&SessionsConfig> for SessionSettings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            archive_policy: config.archive_policy,
            handoff_layer: handoff_layer_from_config(config.handoff_layer),
            handoff_history_tail: config.handoff_history_tail,
            idle_timeout: i64::try_from(config.idle_timeout_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
        }
    }
}

fn handoff_layer_from_config(layer: HandoffLayer) -> MemoryLayer {
    match layer {
        HandoffLayer::LongTerm => MemoryLayer::LongTerm,
        HandoffLayer::Permanent => MemoryLayer::Permanent,
    }
}

/// Translate layer TTLs from config into the store policy.
pub fn layer_policy_from_config(store: &StoreConfig) -> LayerPolicy {
    LayerPolicy {
        ephemeral_secs: store.layers.ephemeral_secs,
        session_secs: store.layers.session_secs,
        short_term_secs: store.layers.short_term_secs,
        long_term_secs: store.layers.long_term_secs,
    }
}

/// Translate the store, coordinator and persistence sections into coordinator options.
pub fn coordinator_options_from_config(config: &StrataConfig) -> CoordinatorOptions {
    CoordinatorOptions {
        layer_policy: layer_policy_from_config(&config.store),
        max_entries: config.store.max_entries,
        sweep_interval: Some(Duration::from_secs(config.store.sweep_interval_secs)),
        init_timeout: Duration::from_millis(config.coordinator.init_timeout_ms),
        queue_capacity: config.persistence.queue_capacity,
    }
}
