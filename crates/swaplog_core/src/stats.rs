//! Router statistics.
//!
//! Counters are updated on the write path with relaxed atomics and can be
//! read at any time.
//!
//! # Usage
//!
//! ```rust,ignore
//! let router = ShardRouter::open(RouterConfig::new("/tmp/swaplog"))?;
//! router.write(b"hello");
//!
//! let stats = router.stats().snapshot();
//! println!("accepted: {}", stats.writes_accepted);
//! println!("dropped:  {}", stats.writes_dropped);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Router statistics and metrics.
///
/// All counters are monotonically increasing except `max_flush_nanos`,
/// which holds the longest flush seen so far.
#[derive(Debug, Default)]
pub struct RouterStats {
    // Producer path
    writes_attempted: AtomicU64,
    writes_accepted: AtomicU64,
    bytes_accepted: AtomicU64,
    writes_dropped: AtomicU64,
    writes_rejected_failed: AtomicU64,
    writes_rejected_closed: AtomicU64,

    // Swap protocol
    swaps: AtomicU64,
    /// Swaps that had to wait for the other slot's flush to finish.
    blocked_swaps: AtomicU64,

    // Flush workers
    flushes: AtomicU64,
    flush_errors: AtomicU64,
    bytes_flushed: AtomicU64,
    flush_nanos_total: AtomicU64,
    flush_nanos_max: AtomicU64,
}

impl RouterStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_attempt(&self) {
        self.writes_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self, bytes: usize) {
        self.writes_accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_accepted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.writes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_failed(&self) {
        self.writes_rejected_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_closed(&self) {
        self.writes_rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swap(&self, blocked: bool) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
        if blocked {
            self.blocked_swaps.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_flush(&self, bytes: usize, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.flush_nanos_total.fetch_add(nanos, Ordering::Relaxed);
        self.flush_nanos_max.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of writes submitted to the router.
    pub fn writes_attempted(&self) -> u64 {
        self.writes_attempted.load(Ordering::Relaxed)
    }

    /// Returns the number of writes copied into a buffer.
    pub fn writes_accepted(&self) -> u64 {
        self.writes_accepted.load(Ordering::Relaxed)
    }

    /// Returns the total bytes copied into buffers.
    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted.load(Ordering::Relaxed)
    }

    /// Returns the number of writes dropped because the retry overflowed too.
    ///
    /// A steady rise means producers outpace the flush path.
    pub fn writes_dropped(&self) -> u64 {
        self.writes_dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of writes refused by a failed shard.
    pub fn writes_rejected_failed(&self) -> u64 {
        self.writes_rejected_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of writes refused after close.
    pub fn writes_rejected_closed(&self) -> u64 {
        self.writes_rejected_closed.load(Ordering::Relaxed)
    }

    /// Returns the number of buffer swaps.
    pub fn swaps(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// Returns the number of swaps that waited on a flush.
    pub fn blocked_swaps(&self) -> u64 {
        self.blocked_swaps.load(Ordering::Relaxed)
    }

    /// Returns the number of buffers handed to flush targets successfully.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of failed flushes.
    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    /// Returns the total bytes handed to flush targets.
    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed.load(Ordering::Relaxed)
    }

    /// Returns the longest single flush.
    pub fn max_flush_duration(&self) -> Duration {
        Duration::from_nanos(self.flush_nanos_max.load(Ordering::Relaxed))
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            writes_attempted: self.writes_attempted(),
            writes_accepted: self.writes_accepted(),
            bytes_accepted: self.bytes_accepted(),
            writes_dropped: self.writes_dropped(),
            writes_rejected_failed: self.writes_rejected_failed(),
            writes_rejected_closed: self.writes_rejected_closed(),
            swaps: self.swaps(),
            blocked_swaps: self.blocked_swaps(),
            flushes: self.flushes(),
            flush_errors: self.flush_errors(),
            bytes_flushed: self.bytes_flushed(),
            flush_nanos_total: self.flush_nanos_total.load(Ordering::Relaxed),
            flush_nanos_max: self.flush_nanos_max.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of router statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Writes submitted to the router.
    pub writes_attempted: u64,
    /// Writes copied into a buffer.
    pub writes_accepted: u64,
    /// Bytes copied into buffers.
    pub bytes_accepted: u64,
    /// Writes dropped on overload.
    pub writes_dropped: u64,
    /// Writes refused by a failed shard.
    pub writes_rejected_failed: u64,
    /// Writes refused after close.
    pub writes_rejected_closed: u64,
    /// Buffer swaps.
    pub swaps: u64,
    /// Swaps that waited on a flush.
    pub blocked_swaps: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Failed flushes.
    pub flush_errors: u64,
    /// Bytes handed to flush targets.
    pub bytes_flushed: u64,
    /// Sum of all flush durations in nanoseconds.
    pub flush_nanos_total: u64,
    /// Longest flush in nanoseconds.
    pub flush_nanos_max: u64,
}

impl StatsSnapshot {
    /// Mean flush duration, or zero if nothing was flushed.
    #[must_use]
    pub fn average_flush_duration(&self) -> Duration {
        if self.flushes == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.flush_nanos_total / self.flushes)
        }
    }

    /// Fraction of attempted writes that were dropped on overload.
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        if self.writes_attempted == 0 {
            0.0
        } else {
            self.writes_dropped as f64 / self.writes_attempted as f64
        }
    }
}
