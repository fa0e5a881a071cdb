//! Storage Layer Error Types

use std::io;
use thiserror::Error;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record serialization error
    #[error("record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Checksum mismatch while scanning a heap file
    #[error("corrupt record in heap file '{file}' at byte offset {offset}")]
    CorruptRecord { file: String, offset: u64 },

    /// Heap file not found
    #[error("heap file '{0}' not found")]
    FileNotFound(String),

    /// Unknown transaction handle
    #[error("transaction {0} is not active")]
    UnknownTransaction(u64),

    /// Metadata error
    #[error("metadata error: {0}")]
    Metadata(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
