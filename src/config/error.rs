//! Error types for configuration descriptors.

use std::path::PathBuf;

/// A configuration object that was rejected while building a component.
///
/// Rejection is always scoped to the offending object; sibling objects keep loading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} ({name}) is a duplicate")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} ({name}) references unknown {referenced_kind} ({referenced})")]
    MissingReference {
        kind: &'static str,
        name: String,
        referenced_kind: &'static str,
        referenced: String,
    },

    #[error("{kind} ({name}) is missing {field}")]
    MissingField {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    #[error("{kind} ({name}) has an invalid duration: {source}")]
    InvalidDuration {
        kind: &'static str,
        name: String,
        source: DurationError,
    },

    #[error("flow ({name}) is invalid: {reason}")]
    InvalidFlow { name: String, reason: String },

    #[error("port ({name}) has an invalid address '{address}'")]
    InvalidAddress { name: String, address: String },

    #[error("{kind} ({name}) is empty")]
    Empty { kind: &'static str, name: String },
}

/// A duration string could not be converted to milliseconds.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DurationError {
    #[error("'{0}' has no unit")]
    MissingUnit(String),

    #[error("'{0}' has an unsupported unit (expected 'ms' or 's')")]
    UnsupportedUnit(String),

    #[error("'{0}' is not a valid non-negative number")]
    InvalidNumber(String),
}

/// An absolute start time could not be turned into a delay.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StartTimeError {
    #[error("'{0}' is not a time of day in HH:MM:SS form")]
    Format(String),

    #[error("start time {0} is not later than the current time")]
    NotInFuture(String),
}

/// A scenario file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
