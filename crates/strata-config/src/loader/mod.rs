//! Layered configuration loading.
//!
//! Each layer file is checked against the schema on its own, the layers are
//! deep-merged lowest precedence first, and the result is checked again as a
//! whole. Keys set in the requirements file cannot be overridden.

mod discovery;
mod merge;
mod schema;


use crate::{ConfigError, StrataConfig};
use discovery::LayerFile;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "strata.json5";
/// Directory holding the user and repo layers.
const CONFIG_DIR_NAME: &str = ".strata";
const PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

/// Effective config plus the layers that produced it.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub config: StrataConfig,
    /// Lowest precedence first; requirements, when present, come first.
    pub layers: Vec<ConfigLayer>,
}

/// Origin of a config layer, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Locks every key it sets.
    Requirements,
    System,
    User,
    Project,
    Cwd,
    /// `.strata/strata.json5` under the project root.
    Repo,
    /// Paths passed explicitly, e.g. `--config`.
    Runtime,
}

impl ConfigLayerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigLayerSource::Requirements => "requirements",
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Project => "project",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Repo => "repo",
            ConfigLayerSource::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ConfigLayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    pub path: Option<PathBuf>,
}

/// Where to look for each layer. `None` skips that layer.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Starting point for project, cwd and repo layers.
    pub cwd: PathBuf,
    pub system_config_path: Option<PathBuf>,
    pub user_config_path: Option<PathBuf>,
    pub requirements_path: Option<PathBuf>,
    /// Applied last, in order. Each must exist.
    pub runtime_paths: Vec<PathBuf>,
    /// Entries whose presence marks the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Default layer locations for `cwd`.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: discovery::system_config_path(),
            user_config_path: discovery::user_config_path(),
            requirements_path: discovery::requirements_path(),
            runtime_paths: Vec::new(),
            project_root_markers: PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl StrataConfig {
    /// Load one file, without layering.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config (path={})", path.as_ref().display());
        let value: Value = json5::from_str(&fs::read_to_string(path)?)?;
        config_from_value(value, "config")
    }

    /// Parse JSON5 contents, without layering.
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load and merge every layer described by `options`.
    ///
    /// Precedence, low to high: system, user, project, cwd, repo, runtime.
    /// Requirements are applied first and lock the keys they set.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = discovery::canonical_or_given(&options.cwd)?;
        let requirements = match &options.requirements_path {
            Some(path) => {
                LayerFile::new(ConfigLayerSource::Requirements, path).read_if_present()?
            }
            None => None,
        };

        let mut stack = Vec::new();
        for (source, path) in [
            (ConfigLayerSource::System, &options.system_config_path),
            (ConfigLayerSource::User, &options.user_config_path),
        ] {
            if let Some(path) = path
                && let Some(layer) = LayerFile::new(source, path).read_if_present()?
            {
                stack.push(layer);
            }
        }

        let mut seen = HashSet::new();
        for file in discovery::local_files(&cwd, &options.project_root_markers) {
            if !seen.insert(file.identity()) {
                debug!(
                    "skipping config layer already loaded (source={}, path={})",
                    file.source,
                    file.path.display()
                );
                continue;
            }
            if let Some(layer) = file.read_if_present()? {
                stack.push(layer);
            }
        }

        for path in &options.runtime_paths {
            stack.push(LayerFile::new(ConfigLayerSource::Runtime, path).read()?);
        }

        let locks = requirements.as_ref().map(|layer| &layer.value);
        let mut merged = Value::Object(serde_json::Map::new());
        let mut layers = Vec::with_capacity(stack.len() + 1);
        if let Some(requirements) = &requirements {
            merge::merge_json_values(&mut merged, &requirements.value);
            layers.push(requirements.meta.clone());
        }
        for layer in stack {
            merge::merge_json_with_constraints(&mut merged, &layer.value, locks);
            layers.push(layer.meta);
        }

        let config = config_from_value(merged, "effective")?;
        info!(
            "loaded layered config (layers={}, locked={})",
            layers.len(),
            requirements.is_some()
        );
        Ok(LayeredConfig { config, layers })
    }

    /// Checks that need more than one field, or a range serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("store.sweep_interval_secs", self.store.sweep_interval_secs),
            ("coordinator.init_timeout_ms", self.coordinator.init_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        let positive_sizes = [
            ("store.default_search_limit", Some(self.store.default_search_limit)),
            ("store.max_entries", self.store.max_entries),
            ("persistence.queue_capacity", Some(self.persistence.queue_capacity)),
        ];
        for (field, value) in positive_sizes {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        if self
            .persistence
            .path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "persistence.path must not be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<StrataConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: StrataConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
