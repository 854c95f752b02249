//! Error type definitions for cronloop
//!
//! The hierarchy mirrors the failure taxonomy of the scheduler: configuration
//! problems are reported and skipped, state store problems are fatal for the
//! tick in which they occur, and source problems degrade to "no items".

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Cron expression errors
    #[error("Cron error: {0}")]
    Cron(#[from] CronParseError),

    /// Job definition errors
    #[error("Job definition error: {0}")]
    JobDefinition(#[from] JobDefinitionError),

    /// Processed-item store errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Input source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while parsing a five-field cron expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronParseError {
    /// The expression did not have exactly five fields
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), found {found}")]
    FieldCount { found: usize },

    /// A field contained an empty list element or an unparsable token
    #[error("invalid {field} field '{token}': {reason}")]
    InvalidToken {
        field: &'static str,
        token: String,
        reason: String,
    },

    /// A value fell outside the permitted range of its field
    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A step of zero was given
    #[error("{field} step must be greater than zero")]
    ZeroStep { field: &'static str },

    /// A range whose start is after its end
    #[error("{field} range {start}-{end} is inverted")]
    InvertedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
}

/// Errors raised while loading a job definition
#[derive(Error, Debug)]
pub enum JobDefinitionError {
    /// The definition file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML document was malformed or had wrongly-typed fields
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required field was absent
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    /// A field had an unacceptable value
    #[error("invalid value for '{field}': {message}")]
    InvalidField { field: &'static str, message: String },

    /// The schedule could not be parsed
    #[error("invalid schedule '{schedule}': {source}")]
    InvalidSchedule {
        schedule: String,
        #[source]
        source: CronParseError,
    },

    /// Another definition already uses this id
    #[error("duplicate job id '{id}' (already defined in {first})")]
    DuplicateId { id: String, first: PathBuf },
}

/// Errors raised by the processed-item state store
#[derive(Error, Debug)]
pub enum StateError {
    /// Reading or writing the backing file failed
    #[error("state file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but is not a valid state document
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory state could not be serialized
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Renaming the temporary file over the store failed
    #[error("failed to persist state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by input sources while polling or acknowledging
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP transport or status errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status returned by a remote API
    #[error("{source_name} returned HTTP {status}: {message}")]
    Status {
        source_name: String,
        status: u16,
        message: String,
    },

    /// Local filesystem errors
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing system returned data that could not be interpreted
    #[error("parse error in {source_name}: {message}")]
    Parse { source_name: String, message: String },

    /// The source was configured incorrectly
    #[error("invalid configuration for {source_name}: {message}")]
    InvalidConfig { source_name: String, message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl SourceError {
    /// Create a parse error for a named source
    pub fn parse<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-configuration error for a named source
    pub fn invalid_config<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::InvalidConfig {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}
