//! # Storage Error Types
//!
//! All errors that can come out of a storage backend.

use thiserror::Error;

/// Errors reported by a [`crate::PrimitiveStorage`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The value at a key does not have the expected shape.
    #[error("value at {key} is not a {expected}")]
    WrongType {
        /// The key that was accessed.
        key: String,
        /// The shape the caller expected ("bytes" or "list").
        expected: &'static str,
    },

    /// A list operation referenced an index past the end of the list.
    #[error("index {index} is out of range for list {key}")]
    IndexOutOfRange {
        /// The list key.
        key: String,
        /// The offending index.
        index: u64,
    },

    /// A counter key holds a value that cannot be interpreted as an integer.
    #[error("counter at {key} is not an integer")]
    NotAnInteger {
        /// The counter key.
        key: String,
    },

    /// The backend rejected or failed a request.
    #[error("storage backend failure: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
