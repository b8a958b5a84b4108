//! Flush target trait definition.

use crate::error::StorageResult;

/// Destination for completed buffers.
///
/// A flush target receives the full contents of a buffer that producers have
/// finished writing into. Targets are **opaque byte sinks**: they do not
/// interpret record framing, and they never see a buffer that is still being
/// written to.
///
/// # Invariants
///
/// - `write` either persists all of `data` or returns an error
/// - writes are applied in call order
/// - after `close` every further `write` fails with [`StorageError::Closed`]
///
/// Each shard owns exactly one target, so implementations only need to be
/// `Send`; a target is driven by a single flush worker at a time.
///
/// # Implementors
///
/// - [`super::AlignedFileWriter`] - rotating files, direct or buffered I/O
/// - [`super::InMemoryTarget`] - for testing
///
/// [`StorageError::Closed`]: crate::StorageError::Closed
pub trait FlushTarget: Send {
    /// Persists `data` after everything previously written.
    ///
    /// Returns the number of bytes written, which is `data.len()` on success.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be persisted. Callers treat this
    /// as fatal for the owning shard.
    fn write(&mut self, data: &[u8]) -> StorageResult<usize>;

    /// Syncs written data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Syncs and releases the target.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync or cleanup fails.
    fn close(&mut self) -> StorageResult<()>;

    /// Total bytes accepted by `write` over the target's lifetime.
    fn bytes_written(&self) -> u64;
}

impl<T: FlushTarget + ?Sized> FlushTarget for Box<T> {
    fn write(&mut self, data: &[u8]) -> StorageResult<usize> {
        (**self).write(data)
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn close(&mut self) -> StorageResult<()> {
        (**self).close()
    }

    fn bytes_written(&self) -> u64 {
        (**self).bytes_written()
    }
}
