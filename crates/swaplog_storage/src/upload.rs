//! Hand-off queue for completed files.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::path::PathBuf;
use tracing::warn;

/// Receiving side of an [`UploadQueue`], consumed by an uploader.
pub type UploadReceiver = Receiver<PathBuf>;

/// Bounded queue of completed file paths.
///
/// Writers publish a path once a file is synced, truncated and closed.
/// Publishing never blocks the flush path: if the queue is full, or the
/// consumer has gone away, the path is skipped and a warning is logged.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    tx: Sender<PathBuf>,
}

impl UploadQueue {
    /// Creates a queue holding at most `capacity` pending paths.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, UploadReceiver) {
        let (tx, rx) = channel::bounded(capacity);
        (Self { tx }, rx)
    }

    /// Offers a completed file without blocking.
    ///
    /// Returns true if the path was queued.
    pub fn offer(&self, path: PathBuf) -> bool {
        match self.tx.try_send(path) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                warn!(path = %path.display(), "upload queue full, skipping completed file");
                false
            }
            Err(TrySendError::Disconnected(path)) => {
                warn!(path = %path.display(), "upload queue has no consumer, skipping completed file");
                false
            }
        }
    }

    /// Number of paths waiting to be consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Returns true if no paths are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}
