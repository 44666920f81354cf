//! Error types for queue operations.

use std::path::PathBuf;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("The message doesn't exist: receipt {receipt} was already deleted, expired or never issued")]
    MessageNotFound { receipt: String },

    #[error("Message store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Visibility scheduler unavailable: {message}")]
    SchedulerUnavailable { message: String },
}

impl QueueError {
    /// Check if the caller may usefully re-issue the failed operation.
    ///
    /// The engine never retries on its own; this is a hint for callers
    /// driving their own at-least-once loop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidArgument(_) => false,
            Self::MessageNotFound { .. } => false,
            Self::Store(_) => true,
            Self::Configuration(_) => false,
            Self::SchedulerUnavailable { .. } => true,
        }
    }

    /// Shorthand used by request validation.
    pub(crate) fn required(field: &str) -> Self {
        Self::InvalidArgument(ValidationError::Required {
            field: field.to_string(),
        })
    }

    /// Shorthand used by request validation.
    pub(crate) fn out_of_range(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument(ValidationError::OutOfRange {
            field: field.to_string(),
            message: message.into(),
        })
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Failures raised by a message store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration could not be loaded: {0}")]
    Load(#[from] config::ConfigError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
