//! Unified error handling for the citycast crate
//!
//! Domain-specific errors ([`ValidationError`](crate::content::validator::ValidationError),
//! [`DeliveryError`](crate::channels::DeliveryError)) live next to the code
//! that produces them; this module wraps them into a single [`Error`] enum
//! for use across module boundaries, with a recoverability classification
//! the retry machinery can consult.

use std::io;
use thiserror::Error;

pub use crate::channels::DeliveryError;
pub use crate::content::validator::ValidationError;

/// Unified error type for the citycast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Delivery errors reported by channel adapters
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Content failed a channel's structural contract
    #[error("Validation failed: {0:?}")]
    Validation(Vec<ValidationError>),

    /// Database errors from the post-history store
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Delivery(e) => e.is_transient(),
            Self::Validation(_) => false,
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_recoverability() {
        let transient = Error::Delivery(DeliveryError::Timeout);
        assert!(transient.is_recoverable());

        let permanent = Error::Delivery(DeliveryError::BadCredentials);
        assert!(!permanent.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing endpoint");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("missing endpoint"));
    }

    #[test]
    fn test_validation_not_recoverable() {
        let err = Error::Validation(vec![ValidationError::EmptyText]);
        assert!(!err.is_recoverable());
    }
}
