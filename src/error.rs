//! Error types for dynastore

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by CRUD operations
///
/// Every variant is terminal from the caller's point of view: retryable
/// store failures are consumed by the retry wrapper and only reach the
/// caller once the attempt budget is spent (and then only when their
/// classification says they must be reported).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad or missing input; never sent to the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// A conditional write was rejected by the store
    ///
    /// `duplicated` marks the specific case where a unique index sentinel
    /// already existed, i.e. the value was already claimed.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        /// True when the conflict is a unique-value collision
        duplicated: bool,
    },

    /// Throughput or account limit exceeded after retries
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Transient store fault that outlived the retry budget
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// A multi-item transaction was cancelled; nothing was applied
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Addressed resource (table, index) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No open store connection
    #[error("No open store connection")]
    NotConnected,

    /// Any other store-reported failure
    #[error("Store failure: {0}")]
    Storage(String),
}

impl StoreError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    /// Create a plain (non-duplicate) conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        StoreError::Conflict {
            message: msg.into(),
            duplicated: false,
        }
    }

    /// Create a conflict error marking a unique-value collision
    pub fn duplicate(msg: impl Into<String>) -> Self {
        StoreError::Conflict {
            message: msg.into(),
            duplicated: true,
        }
    }

    /// Create a capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        StoreError::Capacity(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        StoreError::Transient(msg.into())
    }

    /// Create a transaction-aborted error
    pub fn transaction_aborted(msg: impl Into<String>) -> Self {
        StoreError::TransactionAborted(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    /// Create a generic storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        StoreError::Storage(msg.into())
    }

    /// Prefix the error message with a call-specific diagnostic
    ///
    /// The verdict (variant) is preserved verbatim; only the message
    /// gains context.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            StoreError::Validation(m) => StoreError::Validation(format!("{context}: {m}")),
            StoreError::Conflict {
                message,
                duplicated,
            } => StoreError::Conflict {
                message: format!("{context}: {message}"),
                duplicated,
            },
            StoreError::Capacity(m) => StoreError::Capacity(format!("{context}: {m}")),
            StoreError::Transient(m) => StoreError::Transient(format!("{context}: {m}")),
            StoreError::TransactionAborted(m) => {
                StoreError::TransactionAborted(format!("{context}: {m}"))
            }
            StoreError::NotFound(m) => StoreError::NotFound(format!("{context}: {m}")),
            StoreError::NotConnected => StoreError::NotConnected,
            StoreError::Storage(m) => StoreError::Storage(format!("{context}: {m}")),
        }
    }

    /// True when this is a conflict caused by a unique-value collision
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict {
                duplicated: true,
                ..
            }
        )
    }
}
