//! Error types for configuration and domain value validation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A traffic weight pair that cannot exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeightError {
    #[error("weight {0} is outside 0..=100")]
    OutOfRange(u16),

    #[error("weights {0}/{1} do not sum to 100")]
    BadSum(u16, u16),
}

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid application name: {0:?}")]
    InvalidAppName(String),

    #[error("unknown environment slot: {0:?} (expected blue or green)")]
    UnknownSlot(String),

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("option declared twice: {0}")]
    DuplicateOption(String),

    #[error("malformed override {0:?} (expected KEY=VALUE)")]
    InvalidOverride(String),

    #[error("option {key} has invalid value {value:?}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Weight(#[from] WeightError),
}
