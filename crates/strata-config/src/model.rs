//! Configuration schema for Strata.

use serde::{Deserialize, Serialize};

/// Root config for the coordination layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl StrataConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> StrataConfigBuilder {
        StrataConfigBuilder::new()
    }
}

/// Builder for assembling a `StrataConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct StrataConfigBuilder {
    config: StrataConfig,
}

impl StrataConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: StrataConfig::default(),
        }
    }

    /// Replace the entry store configuration.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Replace the coordinator bootstrap configuration.
    pub fn coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.config.coordinator = coordinator;
        self
    }

    /// Replace the persistence configuration.
    pub fn persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.config.persistence = persistence;
        self
    }

    /// Replace the session manager configuration.
    pub fn sessions(mut self, sessions: SessionsConfig) -> Self {
        self.config.sessions = sessions;
        self
    }

    /// Finalize and return the built `StrataConfig`.
    pub fn build(self) -> StrataConfig {
        self.config
    }
}

/// Entry store retention and sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub layers: LayerTtlConfig,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            layers: LayerTtlConfig::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_entries: None,
            default_search_limit: default_search_limit(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_search_limit() -> usize {
    20
}

/// Default time-to-live per layer, in seconds. `permanent` never expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerTtlConfig {
    #[serde(default = "default_ephemeral_secs")]
    pub ephemeral_secs: u64,
    #[serde(default = "default_session_secs")]
    pub session_secs: u64,
    #[serde(default = "default_short_term_secs")]
    pub short_term_secs: u64,
    #[serde(default = "default_long_term_secs")]
    pub long_term_secs: u64,
}

impl Default for LayerTtlConfig {
    fn default() -> Self {
        Self {
            ephemeral_secs: default_ephemeral_secs(),
            session_secs: default_session_secs(),
            short_term_secs: default_short_term_secs(),
            long_term_secs: default_long_term_secs(),
        }
    }
}

/// Five minutes.
fn default_ephemeral_secs() -> u64 {
    5 * 60
}

/// Four hours.
fn default_session_secs() -> u64 {
    4 * 60 * 60
}

/// Seven days.
fn default_short_term_secs() -> u64 {
    7 * 24 * 60 * 60
}

/// Ninety days.
fn default_long_term_secs() -> u64 {
    90 * 24 * 60 * 60
}

/// Coordinator bootstrap settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout_ms(),
        }
    }
}

fn default_init_timeout_ms() -> u64 {
    5_000
}

/// Write-behind persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub archive_policy: ArchivePolicy,
    #[serde(default)]
    pub handoff_layer: HandoffLayer,
    #[serde(default = "default_handoff_history_tail")]
    pub handoff_history_tail: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            archive_policy: ArchivePolicy::default(),
            handoff_layer: HandoffLayer::default(),
            handoff_history_tail: default_handoff_history_tail(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_handoff_history_tail() -> usize {
    20
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

/// What happens to a session's ephemeral and session-layer entries when it ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArchivePolicy {
    /// Promote entries whose metadata carries `"archive": true`, drop the rest.
    #[default]
    PromoteMarked,
    /// Promote every entry to the short-term layer.
    PromoteAll,
    /// Drop every entry.
    DropAll,
}

/// Layer that handoff records are written to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandoffLayer {
    #[default]
    LongTerm,
    Permanent,
}
