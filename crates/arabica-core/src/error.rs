//! Error types shared across the Arabica crates.

use thiserror::Error;

/// The primary error type for store, scheduler and gateway operations.
#[derive(Debug, Error)]
pub enum ArabicaError {
    /// Missing or malformed input (required field, identity, time string).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown record id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A status change that the report lifecycle does not allow.
    #[error("report {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A notification sink rejected or failed to deliver a message.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

impl ArabicaError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller sent something wrong (as opposed to a server-side failure).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::InvalidTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ArabicaError>;
