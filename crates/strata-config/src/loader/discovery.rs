//! Where config layers live on disk, and reading one layer file.

use super::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, ConfigLayer, ConfigLayerSource, LoadedLayer, schema};
use crate::ConfigError;
use directories::UserDirs;
use log::debug;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
const SYSTEM_DIR: &str = "/etc/strata";
#[cfg(windows)]
const SYSTEM_DIR: &str = "C:\\ProgramData\\strata";
const REQUIREMENTS_FILE_NAME: &str = "requirements.json5";

/// One candidate layer: where it comes from and the file backing it.
#[derive(Debug, Clone)]
pub(super) struct LayerFile {
    pub(super) source: ConfigLayerSource,
    pub(super) path: PathBuf,
}

impl LayerFile {
    pub(super) fn new(source: ConfigLayerSource, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }

    /// Prefix for schema errors, e.g. `user(/home/me/.strata/strata.json5)`.
    pub(super) fn label(&self) -> String {
        format!("{}({})", self.source, self.path.display())
    }

    /// Same file under two sources compares equal here.
    pub(super) fn identity(&self) -> PathBuf {
        self.path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone())
    }

    pub(super) fn read_if_present(&self) -> Result<Option<LoadedLayer>, ConfigError> {
        if !self.path.exists() {
            debug!(
                "config layer not present (source={}, path={})",
                self.source,
                self.path.display()
            );
            return Ok(None);
        }
        self.read().map(Some)
    }

    /// Parse the file and check it against the schema on its own.
    pub(super) fn read(&self) -> Result<LoadedLayer, ConfigError> {
        debug!(
            "reading config layer (source={}, path={})",
            self.source,
            self.path.display()
        );
        let value: Value = json5::from_str(&fs::read_to_string(&self.path)?)?;
        schema::validate_layer_schema(&value, &self.label())?;
        Ok(LoadedLayer {
            meta: ConfigLayer {
                source: self.source,
                path: Some(self.path.clone()),
            },
            value,
        })
    }
}

fn system_dir() -> Option<PathBuf> {
    #[cfg(any(unix, windows))]
    {
        Some(PathBuf::from(SYSTEM_DIR))
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

pub(super) fn system_config_path() -> Option<PathBuf> {
    system_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

pub(super) fn requirements_path() -> Option<PathBuf> {
    system_dir().map(|dir| dir.join(REQUIREMENTS_FILE_NAME))
}

/// `~/.strata/strata.json5`, when a home directory is known.
pub(super) fn user_config_path() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Project, cwd and repo layers in precedence order. Without a project root
/// only the cwd layer is considered.
pub(super) fn local_files(cwd: &Path, markers: &[String]) -> Vec<LayerFile> {
    let root = cwd
        .ancestors()
        .find(|ancestor| markers.iter().any(|marker| ancestor.join(marker).exists()));
    let cwd_file = LayerFile::new(ConfigLayerSource::Cwd, cwd.join(CONFIG_FILE_NAME));
    match root {
        Some(root) => {
            debug!("resolved project root (path={})", root.display());
            vec![
                LayerFile::new(ConfigLayerSource::Project, root.join(CONFIG_FILE_NAME)),
                cwd_file,
                LayerFile::new(
                    ConfigLayerSource::Repo,
                    root.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
                ),
            ]
        }
        None => vec![cwd_file],
    }
}

/// Canonical form of `path`; a path that does not exist yet is kept as given.
pub(super) fn canonical_or_given(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(err) => Err(ConfigError::Io(err)),
    }
}
