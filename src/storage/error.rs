//! Storage layer error types
//!
//! Errors raised while building blocks, encoding chunks, or resolving
//! series out of an index.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch, truncated payload, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Samples handed to the chunk encoder violate the chunk invariants
    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    /// Reference does not resolve to a series in this index
    #[error("Series not found: {0}")]
    SeriesNotFound(u64),

    /// Block description is unusable
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
