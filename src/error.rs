//! Custom error types for the configuration broker.
//!
//! This module defines the primary error type, `EpocError`, used by every part of the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent way to
//! report the different ways a configuration read or write can go wrong.
//!
//! ## Error Hierarchy
//!
//! - **`NotSet`**: A required field (or an input of a derived field) has no stored value.
//!   This is the one error callers routinely catch, e.g. when probing whether a dataset
//!   has been recorded yet.
//! - **`Validation`**: A write was rejected by the field's validator. Nothing was sent to
//!   the backend.
//! - **`Connection`**: The backend did not answer the liveness check at construction.
//!   The client never reconnects on its own.
//! - **`UnknownField`** / **`ReadOnly`**: An assignment by name targeted something that is
//!   not a writable registered field. These indicate programming or typing mistakes.
//! - **`Decode`**: A value exists in the backend but cannot be interpreted as the field's
//!   type. Kept apart from `NotSet` so that corrupt data is never mistaken for absence.
//! - **`Snapshot`**: A snapshot document could not be accepted as a whole.
//! - **`Detector`** / **`DetectorNotIdle`**: Failures reported by the acquisition appliance.
//!
//! By using `#[from]`, `EpocError` can be created from the underlying library errors,
//! simplifying error handling throughout the crate with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, EpocError>;

/// Errors produced by the configuration broker.
#[derive(Error, Debug)]
pub enum EpocError {
    /// Required field (or derived-field input) has no stored value.
    #[error("{0} not set")]
    NotSet(String),

    /// Value rejected by the field's validator.
    #[error("Invalid value for {field}: {reason}")]
    Validation {
        /// Field the value was meant for.
        field: String,
        /// Human readable reason.
        reason: String,
    },

    /// Backend unreachable when the client was constructed.
    #[error("Could not connect to server: {host}:{port}")]
    Connection {
        /// Backend host.
        host: String,
        /// Backend port.
        port: u16,
        /// Underlying driver error.
        #[source]
        source: redis::RedisError,
    },

    /// Assignment to a name that is not a registered field.
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// Assignment to a registered field that has no setter.
    #[error("Field '{0}' is read-only")]
    ReadOnly(String),

    /// Stored bytes could not be decoded as the field's type.
    #[error("Malformed stored value for {field}: {reason}")]
    Decode {
        /// Field whose stored value is malformed.
        field: String,
        /// Human readable reason.
        reason: String,
    },

    /// Snapshot document rejected.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Generic backend failure (in-process backend).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Redis round-trip failure after construction.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Settings could not be loaded.
    #[error("Configuration load error: {0}")]
    Config(Box<figment::Error>),

    /// Settings loaded but semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// YAML parse or emit failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse or emit failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the acquisition appliance.
    #[error("Detector error: {0}")]
    Detector(String),

    /// Start requested while the appliance was not idle.
    #[error("Detector is not idle (state: {0})")]
    DetectorNotIdle(String),
}

impl From<figment::Error> for EpocError {
    fn from(err: figment::Error) -> Self {
        EpocError::Config(Box::new(err))
    }
}

impl EpocError {
    /// Shorthand for a validation failure.
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        EpocError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a decode failure.
    pub fn decode(field: &str, reason: impl Into<String>) -> Self {
        EpocError::Decode {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the error only says that a value is absent.
    pub fn is_not_set(&self) -> bool {
        matches!(self, EpocError::NotSet(_))
    }
}
