//! Error types for event parsing, configuration and detection.

use thiserror::Error;

/// Errors that can occur while parsing events, loading configuration or
/// evaluating detectors.
///
/// Most of these never escape the detection loop: the event source turns
/// per-line failures into skipped-line diagnostics and the runner does the
/// same for per-rule failures.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A log line was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A log line was valid JSON but not an object.
    #[error("event is not a JSON object")]
    NotAnObject,

    /// A required event field was absent.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// An event field had a type or shape the consumer cannot use.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A `timestamp` value did not follow the `YYYY-MM-DDTHH:MM:SS[.ffffff]Z` convention.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// A log line contained bytes that are not UTF-8.
    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 { line: u64 },

    /// A timespan string like `3m` could not be parsed.
    #[error("invalid timespan '{0}'")]
    InvalidTimespan(String),

    /// Configuration values that parse but make no sense together.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file was not valid YAML for the expected schema.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Reading the log or writing an alert failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EvalError>;
