//! Config loading errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON5: {0}")]
    Parse(#[from] json5::Error),
    /// The merged value did not fit the config model.
    #[error("config does not match the model: {0}")]
    Decode(#[from] serde_json::Error),
    /// Unknown key, wrong type, or out-of-range value in one layer.
    #[error("invalid config at {path}: {message}")]
    Schema { path: String, message: String },
    /// A value that is well-typed but unusable, such as a zero timeout.
    #[error("invalid config: {0}")]
    Invalid(String),
}
