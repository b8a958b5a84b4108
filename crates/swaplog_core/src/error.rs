//! Error types for SwapLog core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur when opening or closing a router.
///
/// Individual writes never return these; see [`crate::WriteOutcome`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Flush target error.
    #[error("storage error: {0}")]
    Storage(#[from] swaplog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration rejected by [`crate::RouterConfig::validate`].
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A shard's flush path failed and the shard stopped accepting writes.
    #[error("shard {shard} failed: {message}")]
    ShardFailed {
        /// Index of the failed shard.
        shard: usize,
        /// The error that failed it.
        message: String,
    },

    /// A shard index outside the router.
    #[error("shard {shard} out of range (router has {shard_count} shards)")]
    ShardOutOfRange {
        /// The requested index.
        shard: usize,
        /// Number of shards in the router.
        shard_count: usize,
    },

    /// The router has been closed.
    #[error("router is closed")]
    Closed,

    /// A flush worker thread panicked.
    #[error("flush worker for shard {shard} panicked")]
    FlushWorkerPanicked {
        /// Index of the shard whose worker panicked.
        shard: usize,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a shard failure error.
    pub fn shard_failed(shard: usize, message: impl Into<String>) -> Self {
        Self::ShardFailed {
            shard,
            message: message.into(),
        }
    }
}
