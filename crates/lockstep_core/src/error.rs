//! Core error types for LOCKSTEP.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Identifier space exhausted
    #[error("Capacity exceeded for {resource}: {limit}")]
    CapacityExceeded {
        /// Exhausted resource
        resource: String,
        /// Limit that was hit
        limit: u64,
    },
}

impl CoreError {
    /// Shorthand for a validation failure
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
