//! Error types for the Ember engine boundary.
//!
//! `EmberError` is the unified error type returned by all engine APIs. The
//! variants map one-to-one onto the engine's boundary kinds:
//!
//! - **BadRequest**: missing/invalid arguments, invalid filter grammar,
//!   malformed JSON payloads
//! - **NotFound**: absent key, collection, index, or transaction
//! - **Unauthorized**: the permission callback denied the operation
//! - **Conflict**: write/write collisions detected during commit
//!   pre-validation or key-lock acquisition
//! - **Io**: filesystem failure during save/rewrite/WAL append
//! - **Corruption**: malformed on-disk data detected while reading
//! - **Internal**: invariant violation (a bug, not a caller error)

use std::io;
use thiserror::Error;

/// Result type alias for Ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Unified error type for all Ember operations.
#[derive(Debug, Error)]
pub enum EmberError {
    /// Missing or invalid arguments, malformed JSON, invalid query grammar.
    #[error("bad request: {message}")]
    BadRequest {
        /// What is wrong with the request
        message: String,
    },

    /// The referenced entity does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing entity (key, collection, index, transaction)
        what: String,
    },

    /// The permission callback denied the operation.
    #[error("unauthorized: {action}")]
    Unauthorized {
        /// The denied action
        action: String,
    },

    /// Write conflict: SET on an existing key, UPDATE/DELETE on a missing
    /// key during commit pre-validation, or a key locked by another
    /// transaction.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting operation
        message: String,
    },

    /// Filesystem failure. A commit that hits this is rolled back.
    #[error("io error: {message}")]
    Io {
        /// Error message
        message: String,
        /// Underlying I/O error, when available
        #[source]
        source: Option<io::Error>,
    },

    /// Malformed on-disk data (collection file or WAL segment).
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    /// Invariant violation. Indicates a bug in the engine.
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl EmberError {
    /// Create a BadRequest error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        EmberError::BadRequest {
            message: message.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        EmberError::NotFound { what: what.into() }
    }

    /// Create an Unauthorized error.
    pub fn unauthorized(action: impl Into<String>) -> Self {
        EmberError::Unauthorized {
            action: action.into(),
        }
    }

    /// Create a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        EmberError::Conflict {
            message: message.into(),
        }
    }

    /// Create an Io error without an underlying source.
    pub fn io(message: impl Into<String>) -> Self {
        EmberError::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        EmberError::Corruption {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        EmberError::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EmberError::NotFound { .. })
    }

    /// Check if this is a conflict error.
    ///
    /// Conflicts are retryable: the caller can re-read current state and
    /// retry the transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EmberError::Conflict { .. })
    }

    /// Check if this is an authorization failure.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, EmberError::Unauthorized { .. })
    }

    /// Check if this is a caller error (bad input), as opposed to an
    /// engine-side failure.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, EmberError::BadRequest { .. })
    }

    /// Check if this error indicates a storage-side failure that warrants
    /// operator attention.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            EmberError::Corruption { .. } | EmberError::Internal { .. }
        )
    }
}

impl From<io::Error> for EmberError {
    fn from(e: io::Error) -> Self {
        EmberError::Io {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

impl From<serde_json::Error> for EmberError {
    fn from(e: serde_json::Error) -> Self {
        EmberError::BadRequest {
            message: format!("invalid JSON: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_bad_request() {
        let e = EmberError::bad_request("missing key argument");
        assert!(e.to_string().contains("bad request"));
        assert!(e.to_string().contains("missing key argument"));
    }

    #[test]
    fn test_display_not_found() {
        let e = EmberError::not_found("collection 'people'");
        assert!(e.to_string().contains("not found"));
        assert!(e.to_string().contains("people"));
    }

    #[test]
    fn test_classification() {
        assert!(EmberError::conflict("key locked").is_conflict());
        assert!(EmberError::not_found("x").is_not_found());
        assert!(EmberError::unauthorized("write").is_unauthorized());
        assert!(EmberError::bad_request("x").is_bad_request());
        assert!(!EmberError::io("disk full").is_conflict());
    }

    #[test]
    fn test_is_serious() {
        assert!(EmberError::corruption("truncated header").is_serious());
        assert!(EmberError::internal("lock table desync").is_serious());
        assert!(!EmberError::conflict("busy").is_serious());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let e: EmberError = io_err.into();
        match e {
            EmberError::Io { source, .. } => assert!(source.is_some()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_from_json_error() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let e: EmberError = bad.unwrap_err().into();
        assert!(e.is_bad_request());
    }
}
