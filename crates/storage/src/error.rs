use thiserror::Error;

/// Errors surfaced by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend I/O failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Entry could not be encoded or decoded
    #[error("serialization failed for key {key:?}: {source}")]
    Serialization {
        /// Key of the offending entry
        key: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Key rejected by the backend
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Transaction used after it was committed or rolled back
    #[error("transaction is no longer active")]
    TransactionClosed,
}

impl StorageError {
    /// Backend failure with a message
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether the entry itself is unreadable, as opposed to the backend failing
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
