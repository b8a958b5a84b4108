//! In-memory flush target for testing.

use crate::error::{StorageError, StorageResult};
use crate::target::FlushTarget;
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;

/// An in-memory flush target.
///
/// Every write is appended to a shared byte vector. Clones share the same
/// storage, so a test can hand one clone to a router and inspect another
/// after the flush completes.
///
/// Suitable for:
/// - Unit tests
/// - Integration tests that do not care about file layout
///
/// # Example
///
/// ```rust
/// use swaplog_storage::{FlushTarget, InMemoryTarget};
///
/// let observer = InMemoryTarget::new();
/// let mut target = observer.clone();
/// target.write(b"flushed").unwrap();
/// assert_eq!(observer.data(), b"flushed");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTarget {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    writes: Vec<usize>,
    syncs: u64,
    closed: bool,
    fail_writes: bool,
}

impl InMemoryTarget {
    /// Creates a new empty target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.state.read().data.clone()
    }

    /// Returns the length of each individual write, in order.
    #[must_use]
    pub fn write_sizes(&self) -> Vec<usize> {
        self.state.read().writes.clone()
    }

    /// Returns the number of writes received.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.read().writes.len()
    }

    /// Returns how many times `sync` or `close` synced the target.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.state.read().syncs
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Makes every following write fail with an I/O error.
    ///
    /// Used to exercise shard failure handling.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.write().fail_writes = fail;
    }
}

impl FlushTarget for InMemoryTarget {
    fn write(&mut self, data: &[u8]) -> StorageResult<usize> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StorageError::Closed);
        }
        if state.fail_writes {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        if data.is_empty() {
            return Ok(0);
        }

        state.data.extend_from_slice(data);
        state.writes.push(data.len());
        Ok(data.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StorageError::Closed);
        }
        state.syncs += 1;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        let mut state = self.state.write();
        if !state.closed {
            state.syncs += 1;
            state.closed = true;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.state.read().data.len() as u64
    }
}
