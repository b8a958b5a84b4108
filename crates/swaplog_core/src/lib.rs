//! # SwapLog Core
//!
//! Double-buffered, sharded append engine for SwapLog.
//!
//! This crate provides:
//! - [`AppendBuffer`]: a fixed-capacity region with lock-free reservation
//! - [`BufferPair`]: the active/inactive swap protocol
//! - [`ShardRouter`]: random routing over shards, overflow handling and
//!   per-shard flush workers feeding [`FlushTarget`]s
//! - [`RouterConfig`] and [`RouterStats`]
//!
//! ## Write Path
//!
//! A producer's write reserves space in a shard's active buffer with one
//! atomic add and copies its bytes in. When a buffer fills, the producer
//! that notices swaps in the other buffer and hands the full one to the
//! shard's flush worker, which writes it to the shard's target off the
//! producer path.
//!
//! ## Example
//!
//! ```rust
//! use swaplog_core::{FlushTarget, InMemoryTarget, RouterConfig, ShardRouter};
//!
//! let observer = InMemoryTarget::new();
//! let config = RouterConfig::default().shard_count(1).buffer_capacity(4096);
//! let targets: Vec<Box<dyn FlushTarget>> = vec![Box::new(observer.clone())];
//! let router = ShardRouter::with_targets(config, targets)?;
//!
//! assert!(router.write(b"hello"));
//! router.close()?;
//! assert_eq!(&observer.data()[..5], b"hello");
//! # Ok::<(), swaplog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[allow(unsafe_code)]
mod buffer;
mod config;
mod error;
mod flush;
mod pair;
mod router;
mod stats;
mod wait;

pub use buffer::{AppendBuffer, AppendOutcome, BUFFER_ALIGNMENT};
pub use config::RouterConfig;
pub use error::{CoreError, CoreResult};
pub use pair::{BufferPair, Swap};
pub use router::{ShardRouter, WriteOutcome};
pub use stats::{RouterStats, StatsSnapshot};

pub use swaplog_storage::{
    AlignedFileWriter, FileWriterOptions, FlushTarget, InMemoryTarget, IoMode, StorageError,
    UploadReceiver,
};
