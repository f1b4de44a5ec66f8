//! Error handling for the mHealth feature framework
//!
//! Hard failures only. Data-dependent problems detected mid-pipeline are
//! carried by [`crate::Outcome`] instead and never surface here.

use thiserror::Error;

/// Result type alias for operations that can fail hard
pub type SensorResult<T> = Result<T, SensorError>;

/// Structural failures that abort a call immediately
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SensorError {
    /// Input violates a structural precondition (e.g. missing timestamps)
    #[error("Malformed input: {reason}")]
    MalformedInput {
        /// Description of the malformation
        reason: String,
    },

    /// A required column is absent from a table
    #[error("Missing column: {column}")]
    MissingColumn {
        /// Name of the absent column
        column: String,
    },

    /// A column exists but holds the wrong kind of data
    #[error("Column '{column}' is not {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
    },

    /// Columns or vectors that must align do not
    #[error("Length mismatch for '{what}': expected {expected}, got {actual}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid configuration (programmer/caller error)
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem
        message: String,
    },
}

impl SensorError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SensorError::ConfigurationError {
            message: message.into(),
        }
    }

    /// Shorthand for a malformed-input error
    pub fn malformed(reason: impl Into<String>) -> Self {
        SensorError::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for a missing-column error
    pub fn missing_column(column: impl Into<String>) -> Self {
        SensorError::MissingColumn {
            column: column.into(),
        }
    }

    /// Whether this error stems from configuration rather than data
    pub fn is_configuration(&self) -> bool {
        matches!(self, SensorError::ConfigurationError { .. })
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::SensorError::ConfigurationError {
            message: format!($($arg)+),
        }
    };
}
