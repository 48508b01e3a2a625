//! Error types for embedding store operations.

use thiserror::Error;

/// Coarse classification of a [`StoreError`].
///
/// Callers that need to branch on failures (retry on conflict, fall back on
/// a missing key) should match on the kind rather than on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The key is absent.
    NotFound,
    /// A compare-and-swap saw a different version than expected.
    Conflict,
    /// A caller-supplied argument or configuration value was rejected.
    InvalidArgument,
    /// A unit of work inside the executor failed.
    TaskFailure,
}

/// Errors that can occur during embedding store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key was not found in the store.
    #[error("key {key:?} not found")]
    NotFound {
        /// The missing key, rendered lossily as UTF-8.
        key: String,
    },

    /// The stored version did not match the expected version.
    #[error("version conflict: expected {expected}, found {actual:?}")]
    Conflict {
        /// Version the caller expected.
        expected: u64,
        /// Version currently stored, or `None` if the key is absent.
        actual: Option<u64>,
    },

    /// The vector dimension doesn't match the store configuration.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected embedding dimension.
        expected: usize,
        /// Actual embedding dimension provided.
        actual: usize,
    },

    /// An argument was malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// A task submitted to the executor returned an error or panicked.
    #[error("task {index} failed: {message}")]
    TaskFailure {
        /// Submission index of the failed task.
        index: usize,
        /// Rendered error or panic message.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error for a raw key.
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::DimensionMismatch { .. } | Self::InvalidArgument { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::TaskFailure { .. } => ErrorKind::TaskFailure,
        }
    }

    /// Returns `true` if this is a [`ErrorKind::NotFound`] error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns `true` if this is a [`ErrorKind::Conflict`] error.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// A specialized Result type for embedding store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
