//! Configuration for Strata: the JSON5 schema model and layered loading.
//!
//! Layers come from requirements, system, user, project, cwd, repo and
//! runtime files. See [`StrataConfig::load_layered_with_options`].

mod error;
mod loader;
mod model;

pub use error::ConfigError;
pub use loader::{ConfigLayer, ConfigLayerSource, LayeredConfig, LayeredConfigOptions};
pub use model::*;
