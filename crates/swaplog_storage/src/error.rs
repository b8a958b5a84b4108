//! Error types for flush target operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting flushed buffers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A rotation was requested but no next file had been prepared.
    #[error("cannot rotate {path}: next file is not prepared")]
    NextFileMissing {
        /// The file that would have been rotated out.
        path: PathBuf,
    },

    /// A direct I/O write was not aligned to the device block size.
    #[error("direct I/O requires {what} aligned to {alignment} bytes, got {value}")]
    Misaligned {
        /// Which property was misaligned ("length" or "address").
        what: &'static str,
        /// The offending value.
        value: usize,
        /// The required alignment.
        alignment: usize,
    },

    /// A single write is larger than a whole file.
    #[error("write of {len} bytes exceeds file capacity of {capacity} bytes")]
    WriteTooLarge {
        /// The requested write length.
        len: usize,
        /// The file capacity.
        capacity: u64,
    },

    /// The target has been closed.
    #[error("flush target is closed")]
    Closed,
}
