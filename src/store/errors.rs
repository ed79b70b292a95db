//! Store failure taxonomy
//!
//! Per STORE.md §6: media failures, codec failures, corruption away from
//! the crash tail, and references to unknown logs are distinct conditions
//! and surface as distinct variants.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by a log store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing medium failed.
    #[error("I/O failure during {operation}: {message}")]
    Io {
        operation: &'static str,
        message: String,
    },

    /// A key or value could not be encoded or decoded.
    #[error("codec failure for {context}: {message}")]
    Codec {
        context: &'static str,
        message: String,
    },

    /// The persisted image fails verification somewhere other than the
    /// crash tail. Replay refuses to guess past this.
    #[error("corruption at offset {offset}: {message}")]
    Corruption { offset: u64, message: String },

    /// A record referenced a log that was never allocated.
    #[error("unknown log handle {id}")]
    InvalidHandle { id: u64 },

    /// An internal invariant failed.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, source: std::io::Error) -> Self {
        StoreError::Io {
            operation,
            message: source.to_string(),
        }
    }

    pub(crate) fn codec(context: &'static str, source: serde_json::Error) -> Self {
        StoreError::Codec {
            context,
            message: source.to_string(),
        }
    }

    pub(crate) fn corruption(offset: u64, message: impl Into<String>) -> Self {
        StoreError::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// True for failures that mean the persisted image is damaged rather
    /// than the current operation having failed.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}
