//! Typed configuration errors.
//!
//! Per-report and action errors are recovered inline (logged, counted, swallowed) and never
//! reach this type; only startup-time configuration problems are fatal, so this is the one
//! place in the crate where a typed error enum earns its keep over `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rule '{rule}' references unknown aircraft list '{list}'")]
    UnknownList { rule: String, list: String },

    #[error("rule '{rule}' has unknown condition key '{key}'")]
    UnknownCondition { rule: String, key: String },

    #[error("rule '{rule}' has unknown action key '{key}'")]
    UnknownAction { rule: String, key: String },

    #[error("rule '{rule}' action references unregistered callback '{name}'")]
    UnregisteredCallback { rule: String, name: String },

    #[error("region file {path:?} is malformed: {reason}")]
    MalformedRegionFile { path: std::path::PathBuf, reason: String },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("rule '{rule}' condition '{key}' has an invalid value: {reason}")]
    InvalidCondition { rule: String, key: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
