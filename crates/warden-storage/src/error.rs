//! Storage error types.
//!
//! Every backend reports failures through [`StorageError`]. The variants are
//! split so that callers can branch on the outcomes that drive control flow
//! (`NotFound` for "create if absent", `LockTimeout` for "try again later")
//! without inspecting messages.

use std::fmt;
use std::time::Duration;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("Not found: {kind}/{name}")]
    NotFound {
        /// Kind of the object (resource plural or entity name).
        kind: String,
        /// Name the object was looked up under.
        name: String,
    },

    /// Attempted to create an object that already exists.
    #[error("Already exists: {kind}/{name}")]
    AlreadyExists {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// The object changed between read and write.
    ///
    /// This is transient: update paths retry it internally and only surface
    /// [`StorageError::ConflictRetryExhausted`] once their budget is spent.
    #[error("Conflict: {kind}/{name} was modified concurrently")]
    Conflict {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// Conflicting writes kept winning until the retry budget ran out.
    #[error("Conflict on {kind}/{name} persisted after retrying for {elapsed:?}")]
    ConflictRetryExhausted {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
        /// Time spent retrying.
        elapsed: Duration,
    },

    /// Another server instance created the signing keys first.
    #[error("Keys already created by another server instance")]
    KeysAlreadyCreated,

    /// The refresh token lock could not be acquired in time.
    ///
    /// The requested mutation was not performed.
    #[error("Timed out waiting for lock on refresh token {id}")]
    LockTimeout {
        /// ID of the refresh token.
        id: String,
    },

    /// Backend options are invalid or contradictory.
    #[error("Misconfiguration: {message}")]
    Misconfiguration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Required schemas could not be registered or did not become ready.
    #[error("Schema provisioning failed: {message}")]
    SchemaProvisioning {
        /// Description of the failure.
        message: String,
    },

    /// A resource name failed local validation; no request was sent.
    #[error("Invalid resource name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The backend answered with an unexpected status.
    #[error("{method} {url} {status}: {body}")]
    Transport {
        /// HTTP method of the request.
        method: String,
        /// Request URL.
        url: String,
        /// Status line, e.g. `500 Internal Server Error`.
        status: String,
        /// Leading part of the response body.
        body: String,
    },

    /// The request could not be completed (connect failure, timeout, TLS).
    #[error("HTTP error: {message}")]
    Http {
        /// Description of the failure.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was interrupted because the storage is shutting down.
    #[error("Operation cancelled: storage is closing")]
    Cancelled,

    /// An update callback declined to produce a new value.
    #[error("Update rejected: {message}")]
    Rejected {
        /// Reason given by the callback.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

impl StorageError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new `ConflictRetryExhausted` error.
    #[must_use]
    pub fn conflict_retry_exhausted(
        kind: impl Into<String>,
        name: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::ConflictRetryExhausted {
            kind: kind.into(),
            name: name.into(),
            elapsed,
        }
    }

    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(id: impl Into<String>) -> Self {
        Self::LockTimeout { id: id.into() }
    }

    /// Creates a new `Misconfiguration` error.
    #[must_use]
    pub fn misconfiguration(message: impl Into<String>) -> Self {
        Self::Misconfiguration {
            message: message.into(),
        }
    }

    /// Creates a new `SchemaProvisioning` error.
    #[must_use]
    pub fn schema_provisioning(message: impl Into<String>) -> Self {
        Self::SchemaProvisioning {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidName` error.
    #[must_use]
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(
        method: impl Into<String>,
        url: impl Into<String>,
        status: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Transport {
            method: method.into(),
            url: url.into(),
            status: status.into(),
            body: body.into(),
        }
    }

    /// Creates a new `Http` error.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` if this is a (retryable) conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a lock timeout.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns `true` if the storage is shutting down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. }
            | Self::Conflict { .. }
            | Self::ConflictRetryExhausted { .. }
            | Self::KeysAlreadyCreated => ErrorCategory::Conflict,
            Self::LockTimeout { .. } => ErrorCategory::Lock,
            Self::Misconfiguration { .. } | Self::InvalidName { .. } => {
                ErrorCategory::Configuration
            }
            Self::SchemaProvisioning { .. }
            | Self::Transport { .. }
            | Self::Http { .. }
            | Self::Cancelled => ErrorCategory::Infrastructure,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Serialization(_) | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Object not found.
    NotFound,
    /// Existence or version conflict.
    Conflict,
    /// Lock could not be acquired.
    Lock,
    /// Invalid configuration or input.
    Configuration,
    /// Backend or network failure.
    Infrastructure,
    /// Update declined by the caller.
    Rejected,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Lock => write!(f, "lock"),
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Rejected => write!(f, "rejected"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("authcodes", "abc");
        assert_eq!(err.to_string(), "Not found: authcodes/abc");

        let err = StorageError::transport("PUT", "https://k8s/x", "500 Internal Server Error", "boom");
        assert_eq!(err.to_string(), "PUT https://k8s/x 500 Internal Server Error: boom");

        let err = StorageError::lock_timeout("token-1");
        assert_eq!(
            err.to_string(),
            "Timed out waiting for lock on refresh token token-1"
        );
    }

    #[test]
    fn test_error_predicates() {
        let err = StorageError::not_found("passwords", "x");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_lock_timeout());

        let err = StorageError::conflict("refreshtokens", "x");
        assert!(err.is_conflict());
        assert!(!err.is_already_exists());

        assert!(StorageError::lock_timeout("x").is_lock_timeout());
        assert!(StorageError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found("a", "b").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::KeysAlreadyCreated.category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            StorageError::conflict_retry_exhausted("a", "b", Duration::from_secs(1)).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            StorageError::misconfiguration("both set").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(StorageError::Cancelled.category().to_string(), "infrastructure");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = StorageError::from(json_err);
        assert_eq!(err.category(), ErrorCategory::Internal);
    }
}
