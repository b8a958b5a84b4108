//! # SwapLog Storage
//!
//! Flush targets for SwapLog.
//!
//! This crate is the persistence end of the write path. A flush target
//! receives the complete contents of a buffer that producers have finished
//! writing and stores them; it never interprets the bytes.
//!
//! ## Design Principles
//!
//! - Targets are simple byte sinks (write, sync, close)
//! - No knowledge of record framing or of the buffers feeding them
//! - One target per shard, so targets are `Send` but need no internal locking
//! - Direct I/O is an alignment contract, not a copy: misaligned input is
//!   rejected
//!
//! ## Available Targets
//!
//! - [`AlignedFileWriter`] - rotating files with direct or buffered I/O
//! - [`InMemoryTarget`] - for testing
//!
//! ## Example
//!
//! ```rust
//! use swaplog_storage::{FlushTarget, InMemoryTarget};
//!
//! let mut target = InMemoryTarget::new();
//! target.write(b"hello world").unwrap();
//! assert_eq!(target.bytes_written(), 11);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod direct;
mod error;
mod file;
mod layout;
mod memory;
mod target;
mod upload;

pub use direct::{align_up, IoMode, DIRECT_IO_BLOCK_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::{AlignedFileWriter, FileWriterOptions};
pub use layout::{RunDirectory, SegmentNaming, SEGMENT_EXTENSION, SEGMENT_PREFIX};
pub use memory::InMemoryTarget;
pub use target::FlushTarget;
pub use upload::{UploadQueue, UploadReceiver};
