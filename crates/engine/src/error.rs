//! Engine-side error type.
//!
//! Errors cross the engine boundary as a code plus the engine's message. The
//! binding's result builder translates them into `tether_core::Error`,
//! attaching the location of the translation site.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_core::ErrorCode;

/// Result type for engine callbacks.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Error reported by the engine to a completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    /// Engine error code
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl EngineError {
    /// Create an engine error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Request cancelled, usually by cluster shutdown.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestCanceled, message)
    }

    /// Document does not exist.
    pub fn not_found(key: &str) -> Self {
        Self::new(ErrorCode::DocumentNotFound, format!("document not found: {}", key))
    }

    /// Bucket is unknown or not open.
    pub fn bucket_not_found(bucket: &str) -> Self {
        Self::new(ErrorCode::BucketNotFound, format!("bucket not open: {}", bucket))
    }
}
