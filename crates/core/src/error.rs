//! Error types for Tether
//!
//! Every failure that can reach a caller is represented by [`Error`]. The
//! variants follow the four failure sources of a binding call:
//!
//! | Source | Variant |
//! |--------|---------|
//! | Argument validation before dispatch | `InvalidArgument` |
//! | Engine reported an error code | `Engine` |
//! | Engine succeeded, conversion to a host value failed | `BuildResult` |
//! | User callback panicked on the dispatcher thread | `Callback` |
//!
//! The remaining variants cover connection state, stream protocol misuse,
//! configuration and internal faults.

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes reported by the database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ==================== Common ====================
    /// Request was cancelled, typically because the cluster was closed
    RequestCanceled,
    /// Engine rejected an argument
    InvalidArgument,
    /// Service is not available on any node
    ServiceNotAvailable,
    /// Server reported an internal failure
    InternalServerFailure,
    /// Credentials were rejected
    AuthenticationFailure,
    /// Temporary failure, the request may be retried
    TemporaryFailure,
    /// Statement or payload could not be parsed
    ParsingFailure,
    /// CAS value did not match
    CasMismatch,
    /// Bucket does not exist or is not open
    BucketNotFound,
    /// Operation is not supported by the engine
    UnsupportedOperation,
    /// Timed out, and the request may have had an effect
    AmbiguousTimeout,
    /// Timed out before the request had any effect
    UnambiguousTimeout,

    // ==================== Key-Value ====================
    /// Document does not exist
    DocumentNotFound,
    /// Document already exists
    DocumentExists,
    /// Document is locked
    DocumentLocked,
    /// Counter delta could not be applied to the stored value
    DeltaInvalid,

    // ==================== Subdocument ====================
    /// Path does not exist in the document
    PathNotFound,
    /// Path exists but has an unexpected type
    PathMismatch,
    /// Path already exists
    PathExists,
    /// Stored document is not JSON
    DocumentNotJson,

    // ==================== Query / Views ====================
    /// Keyspace referenced by a statement does not exist
    KeyspaceNotFound,
    /// Design document does not exist
    DesignDocumentNotFound,
    /// View does not exist
    ViewNotFound,
}

impl ErrorCode {
    /// Stable snake_case name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RequestCanceled => "request_canceled",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::ServiceNotAvailable => "service_not_available",
            ErrorCode::InternalServerFailure => "internal_server_failure",
            ErrorCode::AuthenticationFailure => "authentication_failure",
            ErrorCode::TemporaryFailure => "temporary_failure",
            ErrorCode::ParsingFailure => "parsing_failure",
            ErrorCode::CasMismatch => "cas_mismatch",
            ErrorCode::BucketNotFound => "bucket_not_found",
            ErrorCode::UnsupportedOperation => "unsupported_operation",
            ErrorCode::AmbiguousTimeout => "ambiguous_timeout",
            ErrorCode::UnambiguousTimeout => "unambiguous_timeout",
            ErrorCode::DocumentNotFound => "document_not_found",
            ErrorCode::DocumentExists => "document_exists",
            ErrorCode::DocumentLocked => "document_locked",
            ErrorCode::DeltaInvalid => "delta_invalid",
            ErrorCode::PathNotFound => "path_not_found",
            ErrorCode::PathMismatch => "path_mismatch",
            ErrorCode::PathExists => "path_exists",
            ErrorCode::DocumentNotJson => "document_not_json",
            ErrorCode::KeyspaceNotFound => "keyspace_not_found",
            ErrorCode::DesignDocumentNotFound => "design_document_not_found",
            ErrorCode::ViewNotFound => "view_not_found",
        }
    }

    /// Whether the code reports a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ErrorCode::AmbiguousTimeout | ErrorCode::UnambiguousTimeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context attached to engine errors.
///
/// `file` and `line` point at the binding code that translated the engine
/// error, not at the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Message reported by the engine
    pub message: String,
    /// Source file of the translation site
    pub file: String,
    /// Source line of the translation site
    pub line: u32,
}

impl ErrorContext {
    /// Capture a context at the caller's location.
    #[track_caller]
    pub fn here(message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            message: message.into(),
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.file, self.line)
    }
}

/// Tether errors.
///
/// Errors are cloneable and serializable so they can be stored in a
/// [`MultiResult`](crate::MultiResult), handed across threads, and reported
/// to host programs without losing detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum Error {
    // ==================== Validation ====================
    /// Argument rejected before anything was dispatched
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // ==================== Engine ====================
    /// Error code reported by the engine
    #[error("{code}: {context}")]
    Engine {
        code: ErrorCode,
        context: ErrorContext,
    },

    // ==================== Local ====================
    /// The engine succeeded but the response could not be converted
    #[error("failed to build result: {reason}")]
    BuildResult { reason: String },

    /// A user-supplied callback panicked
    #[error("callback failed: {reason}")]
    Callback { reason: String },

    // ==================== State ====================
    /// Connection is not open
    #[error("connection is not open (state: {state})")]
    NotConnected { state: String },

    /// Row stream no longer accepts entries
    #[error("row stream is closed")]
    StreamClosed,

    // ==================== System ====================
    /// Configuration or connection string error
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Internal error (bug, thread failure, invariant violation)
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Build an engine error, recording the caller's file and line.
    #[track_caller]
    pub fn engine(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Engine {
            code,
            context: ErrorContext::here(message),
        }
    }

    /// Build a cancellation error.
    #[track_caller]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Error::engine(ErrorCode::RequestCanceled, message)
    }

    /// Build an argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Build a result-conversion error.
    pub fn build_result(reason: impl Into<String>) -> Self {
        Error::BuildResult {
            reason: reason.into(),
        }
    }

    /// Build an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Engine error code, if this is an engine error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the engine reported the document as missing.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::DocumentNotFound)
    }

    /// Whether the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.code() == Some(ErrorCode::RequestCanceled)
    }
}
