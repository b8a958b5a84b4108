//! Multi-shard write router.
//!
//! The router is the producer-facing entry point. Each shard owns a
//! [`BufferPair`], a flush worker with its target, and a gate that
//! serializes the overflow sequence (swap, hand-off, retry). Writes that do
//! not overflow take no lock at all.
//!
//! ## Overflow
//!
//! ```text
//! write ──► active.write ──► accepted ─────────────────────────► Accepted
//!                 │
//!                 └─ overflowed ──► lock gate
//!                                     │ active is still the full buffer
//!                                     │ (same id and generation)?
//!                                     ├─ yes: swap_blocking, submit retired,
//!                                     │       retry under the gate
//!                                     └─ no:  unlock, retry
//!                                                    │
//!                              retry overflowed ──► Dropped
//! ```
//!
//! The swap happens before the hand-off so the retired buffer is marked
//! ready for flush before its worker can reset it.

use crate::buffer::{AfterFlush, AppendBuffer};
use crate::config::{is_block_aligned, RouterConfig};
use crate::error::{CoreError, CoreResult};
use crate::flush::{FlushWorker, ShardHealth};
use crate::pair::BufferPair;
use crate::stats::RouterStats;
use crate::wait::spin_until;
use parking_lot::Mutex;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swaplog_storage::{
    AlignedFileWriter, FlushTarget, IoMode, RunDirectory, StorageResult, UploadQueue,
    UploadReceiver,
};
use tracing::{debug, info, warn};

/// Result of a single routed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was copied into a buffer.
    Accepted,
    /// The record did not fit even after a swap and was discarded.
    Dropped,
    /// The shard's flush path has failed.
    ShardFailed,
    /// The router has been closed.
    Closed,
}

impl WriteOutcome {
    /// Returns true for [`WriteOutcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

struct Shard {
    index: usize,
    pair: BufferPair,
    /// Serializes swaps and owns the hand-off channel.
    gate: Mutex<FlushWorker>,
    health: Arc<ShardHealth>,
}

/// Routes writes across independent double-buffered shards.
///
/// # Example
///
/// ```rust,no_run
/// use swaplog_core::{RouterConfig, ShardRouter};
///
/// let router = ShardRouter::open(RouterConfig::new("/var/log/swaplog"))?;
/// router.write(b"first record");
/// router.close()?;
/// # Ok::<(), swaplog_core::CoreError>(())
/// ```
pub struct ShardRouter {
    shards: Vec<Shard>,
    stats: Arc<RouterStats>,
    closed: AtomicBool,
    run_dir: Option<PathBuf>,
    io_mode: Option<IoMode>,
    upload: Option<UploadReceiver>,
}

impl ShardRouter {
    /// Opens a router writing one rotating file per shard under a fresh run
    /// directory in `config.base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or a directory,
    /// file, buffer or worker thread cannot be created.
    pub fn open(config: RouterConfig) -> CoreResult<Self> {
        config.validate()?;

        let run = RunDirectory::create(&config.base_dir)?;
        let mode = resolve_io_mode(&config, run.path());

        let (queue, upload) = match config.upload_queue_capacity {
            Some(capacity) => {
                let (queue, rx) = UploadQueue::bounded(capacity);
                (Some(queue), Some(rx))
            }
            None => (None, None),
        };

        let options = config.file_writer_options(mode);
        let targets = (0..config.shard_count)
            .map(|shard| {
                AlignedFileWriter::create(run.segment_naming(shard), options, queue.clone())
                    .map(|writer| Box::new(writer) as Box<dyn FlushTarget>)
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut router = Self::build(&config, targets)?;
        router.run_dir = Some(run.path().to_path_buf());
        router.io_mode = Some(mode);
        router.upload = upload;

        info!(
            shards = config.shard_count,
            buffer_capacity = config.buffer_capacity,
            file_capacity = config.file_capacity,
            ?mode,
            dir = %run.path().display(),
            "opened shard router"
        );
        Ok(router)
    }

    /// Builds a router over caller-supplied targets, one per shard.
    ///
    /// `config.base_dir`, `io_mode` and `upload_queue_capacity` are not used.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the number of
    /// targets differs from `config.shard_count`, or a buffer or worker thread
    /// cannot be created.
    pub fn with_targets(
        config: RouterConfig,
        targets: Vec<Box<dyn FlushTarget>>,
    ) -> CoreResult<Self> {
        config.validate()?;
        if targets.len() != config.shard_count {
            return Err(CoreError::invalid_config(format!(
                "expected {} flush targets, got {}",
                config.shard_count,
                targets.len()
            )));
        }
        let router = Self::build(&config, targets)?;
        debug!(shards = config.shard_count, "opened shard router over custom targets");
        Ok(router)
    }

    fn build(config: &RouterConfig, targets: Vec<Box<dyn FlushTarget>>) -> CoreResult<Self> {
        let stats = Arc::new(RouterStats::new());
        let mut shards = Vec::with_capacity(targets.len());

        for (index, target) in targets.into_iter().enumerate() {
            let first_id = u32::try_from(index)
                .ok()
                .and_then(|i| i.checked_mul(2))
                .ok_or_else(|| CoreError::invalid_config("too many shards"))?;
            let health = Arc::new(ShardHealth::default());
            let worker =
                FlushWorker::spawn(index, target, Arc::clone(&health), Arc::clone(&stats))?;

            shards.push(Shard {
                index,
                pair: BufferPair::new(config.buffer_capacity, first_id)?,
                gate: Mutex::new(worker),
                health,
            });
        }

        Ok(Self {
            shards,
            stats,
            closed: AtomicBool::new(false),
            run_dir: None,
            io_mode: None,
            upload: None,
        })
    }

    /// Writes a record to a randomly chosen shard.
    ///
    /// Returns true if the record was accepted.
    pub fn write(&self, bytes: &[u8]) -> bool {
        self.try_write(bytes).is_accepted()
    }

    /// Writes a record to a randomly chosen shard and reports what happened.
    pub fn try_write(&self, bytes: &[u8]) -> WriteOutcome {
        let index = match self.shards.len() {
            1 => 0,
            n => rand::thread_rng().gen_range(0..n),
        };
        self.write_shard(&self.shards[index], bytes)
    }

    /// Writes a record to a specific shard.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShardOutOfRange`] if `shard` does not exist.
    pub fn try_write_to(&self, shard: usize, bytes: &[u8]) -> CoreResult<WriteOutcome> {
        let target = self.shards.get(shard).ok_or(CoreError::ShardOutOfRange {
            shard,
            shard_count: self.shards.len(),
        })?;
        Ok(self.write_shard(target, bytes))
    }

    fn write_shard(&self, shard: &Shard, bytes: &[u8]) -> WriteOutcome {
        self.stats.record_attempt();
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_rejected_closed();
            return WriteOutcome::Closed;
        }
        if shard.health.is_failed() {
            self.stats.record_rejected_failed();
            return WriteOutcome::ShardFailed;
        }

        let buffer = shard.pair.active();
        // Read before writing: a reset after the rejection must not make a
        // reused buffer look like the one that overflowed.
        let cycle = (buffer.id(), buffer.generation());
        if buffer.write(bytes).is_accepted() {
            self.stats.record_accepted(bytes.len());
            return WriteOutcome::Accepted;
        }
        self.handle_overflow(shard, cycle, bytes)
    }

    /// `full` is the id and generation of the buffer that rejected the write.
    fn handle_overflow(&self, shard: &Shard, full: (u32, u64), bytes: &[u8]) -> WriteOutcome {
        let worker = shard.gate.lock();
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_rejected_closed();
            return WriteOutcome::Closed;
        }
        if shard.health.is_failed() {
            self.stats.record_rejected_failed();
            return WriteOutcome::ShardFailed;
        }

        let active = shard.pair.active();
        let retry = if (active.id(), active.generation()) == full {
            let swap = shard.pair.swap_blocking();
            self.stats.record_swap(swap.spins > 0);
            if !worker.submit(Arc::clone(&swap.retired), AfterFlush::Reset) {
                discard(shard, &swap.retired);
                self.stats.record_rejected_failed();
                return WriteOutcome::ShardFailed;
            }
            shard.pair.active().write(bytes)
        } else {
            drop(worker);
            shard.pair.active().write(bytes)
        };

        if retry.is_accepted() {
            self.stats.record_accepted(bytes.len());
            WriteOutcome::Accepted
        } else {
            self.stats.record_dropped();
            WriteOutcome::Dropped
        }
    }

    /// Stops accepting writes and flushes everything buffered.
    ///
    /// Every non-empty buffer is handed to its shard's worker, the workers
    /// drain their queues, and each target is closed. Calling `close` again
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first error seen: a target that failed to close, a worker
    /// that panicked, or [`CoreError::ShardFailed`] for a shard whose flush
    /// path failed while the router was running.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for shard in &self.shards {
            if let Err(e) = close_shard(shard) {
                warn!(shard = shard.index, error = %e, "shard did not close cleanly");
                first_error.get_or_insert(e);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            accepted = stats.writes_accepted,
            dropped = stats.writes_dropped,
            flushes = stats.flushes,
            flush_errors = stats.flush_errors,
            "closed shard router"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the router's statistics.
    #[must_use]
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the error that failed `shard`, if it has failed.
    #[must_use]
    pub fn shard_error(&self, shard: usize) -> Option<String> {
        self.shards.get(shard).and_then(|s| s.health.error())
    }

    /// Returns a receiver for completed file paths, if the upload queue is
    /// enabled.
    #[must_use]
    pub fn upload_receiver(&self) -> Option<UploadReceiver> {
        self.upload.clone()
    }

    /// Returns the run directory of a router opened with [`open`](Self::open).
    #[must_use]
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// Returns the I/O mode of a router opened with [`open`](Self::open).
    #[must_use]
    pub fn io_mode(&self) -> Option<IoMode> {
        self.io_mode
    }
}

impl Drop for ShardRouter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing shard router on drop");
        }
    }
}

impl std::fmt::Debug for ShardRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRouter")
            .field("shards", &self.shards.len())
            .field("closed", &self.is_closed())
            .field("run_dir", &self.run_dir)
            .field("io_mode", &self.io_mode)
            .finish_non_exhaustive()
    }
}

fn close_shard(shard: &Shard) -> CoreResult<()> {
    let mut worker = shard.gate.lock();

    let inactive = shard.pair.inactive();
    spin_until(|| !inactive.is_ready_for_flush());

    // Sealed buffers stay sealed, so a producer that raced past the closed
    // check is rejected instead of writing into a buffer nobody will flush.
    for buffer in [inactive, shard.pair.active()] {
        if buffer.seal() > 0 && !worker.submit(Arc::clone(buffer), AfterFlush::KeepSealed) {
            shard.health.fail("flush worker stopped before close");
        }
    }

    let finished = worker.finish(shard.index);
    drop(worker);
    finished?;

    match shard.health.error() {
        Some(message) => Err(CoreError::shard_failed(shard.index, message)),
        None => Ok(()),
    }
}

/// Drops a retired buffer's contents when its worker is gone, so the next
/// swap into it does not wait forever.
fn discard(shard: &Shard, buffer: &AppendBuffer) {
    shard.health.fail("flush worker stopped");
    buffer.drain_into(AfterFlush::Reset, |_, _| ());
}

fn resolve_io_mode(config: &RouterConfig, dir: &Path) -> IoMode {
    if let Some(mode) = config.io_mode {
        return mode;
    }
    let detected = IoMode::detect(dir);
    if detected.is_direct() && !is_block_aligned(config.buffer_capacity) {
        warn!(
            buffer_capacity = config.buffer_capacity,
            "direct I/O is available but buffer capacity is not block aligned, using buffered I/O"
        );
        return IoMode::Buffered;
    }
    detected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};
    use swaplog_storage::InMemoryTarget;

    fn memory_router(shards: usize, capacity: usize) -> (ShardRouter, Vec<InMemoryTarget>) {
        let observers: Vec<_> = (0..shards).map(|_| InMemoryTarget::new()).collect();
        let targets = observers
            .iter()
            .map(|t| Box::new(t.clone()) as Box<dyn FlushTarget>)
            .collect();
        let config = RouterConfig::default()
            .shard_count(shards)
            .buffer_capacity(capacity);
        (ShardRouter::with_targets(config, targets).unwrap(), observers)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn accepted_write_stays_buffered() {
        let (router, targets) = memory_router(1, 64);
        assert!(router.write(b"hello"));
        assert_eq!(router.stats().writes_accepted(), 1);
        assert_eq!(router.stats().bytes_accepted(), 5);
        assert_eq!(targets[0].write_count(), 0);
    }

    #[test]
    fn overflow_swaps_and_retries() {
        let (router, targets) = memory_router(1, 100);

        for _ in 0..4 {
            assert_eq!(router.try_write(&[1; 25]), WriteOutcome::Accepted);
        }
        // Fifth write overflows, swaps, and lands in the other buffer.
        assert_eq!(router.try_write(&[2; 25]), WriteOutcome::Accepted);
        assert_eq!(router.stats().swaps(), 1);

        wait_for(|| targets[0].write_count() == 1);
        assert_eq!(targets[0].data(), vec![1; 100]);

        router.close().unwrap();
        let data = targets[0].data();
        assert_eq!(data.len(), 200);
        assert_eq!(&data[100..125], &[2; 25]);
        assert!(data[125..].iter().all(|&b| b == 0));
    }

    #[test]
    fn late_overflow_does_not_retire_reused_buffer() {
        let (router, targets) = memory_router(1, 100);
        let shard = &router.shards[0];
        let first = shard.pair.active();
        let stale = (first.id(), first.generation());

        // Two swaps bring the first buffer back as active, holding one record.
        for _ in 0..9 {
            assert_eq!(router.try_write(&[1; 25]), WriteOutcome::Accepted);
        }
        assert_eq!(router.stats().swaps(), 2);
        assert_eq!(shard.pair.active().id(), stale.0);

        // A writer that saw the first cycle overflow arrives at the gate late.
        assert_eq!(
            router.handle_overflow(shard, stale, &[3; 25]),
            WriteOutcome::Accepted
        );
        assert_eq!(router.stats().swaps(), 2);

        router.close().unwrap();
        assert_eq!(targets[0].write_count(), 3);
        let data = targets[0].data();
        assert_eq!(&data[200..225], &[1; 25]);
        assert_eq!(&data[225..250], &[3; 25]);
        assert!(data[250..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_record_is_dropped() {
        let (router, _targets) = memory_router(1, 64);
        assert_eq!(router.try_write(&[0; 65]), WriteOutcome::Dropped);
        assert_eq!(router.stats().writes_dropped(), 1);
        assert!(router.write(&[0; 64]));
    }

    #[test]
    fn empty_write_is_accepted() {
        let (router, _targets) = memory_router(2, 64);
        assert!(router.write(b""));
        assert_eq!(router.stats().bytes_accepted(), 0);
    }

    #[test]
    fn write_to_specific_shard() {
        let (router, targets) = memory_router(3, 16);
        assert_eq!(router.try_write_to(2, b"x").unwrap(), WriteOutcome::Accepted);
        assert!(matches!(
            router.try_write_to(3, b"x"),
            Err(CoreError::ShardOutOfRange { shard: 3, shard_count: 3 })
        ));

        router.close().unwrap();
        assert!(targets[0].data().is_empty());
        assert!(targets[1].data().is_empty());
        assert_eq!(targets[2].data()[0], b'x');
    }

    #[test]
    fn close_flushes_partial_buffers_and_rejects_writes() {
        let (router, targets) = memory_router(2, 32);
        router.try_write_to(0, b"zero").unwrap();
        router.try_write_to(1, b"one").unwrap();

        router.close().unwrap();
        assert!(router.is_closed());
        assert!(targets.iter().all(InMemoryTarget::is_closed));
        assert_eq!(&targets[0].data()[..4], b"zero");
        assert_eq!(&targets[1].data()[..3], b"one");

        assert_eq!(router.try_write(b"late"), WriteOutcome::Closed);
        assert_eq!(router.stats().writes_rejected_closed(), 1);
        assert!(router.close().is_ok());
    }

    #[test]
    fn close_skips_empty_buffers() {
        let (router, targets) = memory_router(2, 32);
        router.close().unwrap();
        assert!(targets.iter().all(|t| t.write_count() == 0));
    }

    #[test]
    fn failed_shard_stops_accepting() {
        let (router, targets) = memory_router(1, 16);
        targets[0].set_fail_writes(true);

        router.write(&[1; 16]);
        router.write(&[2; 8]);
        wait_for(|| router.shard_error(0).is_some());

        assert_eq!(router.try_write(b"more"), WriteOutcome::ShardFailed);
        assert_eq!(router.stats().writes_rejected_failed(), 1);
        assert_eq!(router.stats().flush_errors(), 1);

        let err = router.close().unwrap_err();
        assert!(matches!(err, CoreError::ShardFailed { shard: 0, .. }));
    }

    #[test]
    fn failed_shard_leaves_others_running() {
        let (router, targets) = memory_router(2, 16);
        targets[0].set_fail_writes(true);

        router.try_write_to(0, &[1; 16]).unwrap();
        router.try_write_to(0, &[1; 1]).unwrap();
        wait_for(|| router.shard_error(0).is_some());

        assert_eq!(router.try_write_to(1, b"ok").unwrap(), WriteOutcome::Accepted);
        assert!(router.shard_error(1).is_none());
        assert!(router.close().is_err());
        assert_eq!(&targets[1].data()[..2], b"ok");
    }

    #[test]
    fn mismatched_target_count_rejected() {
        let config = RouterConfig::default().shard_count(2).buffer_capacity(64);
        let targets: Vec<Box<dyn FlushTarget>> = vec![Box::new(InMemoryTarget::new())];
        assert!(matches!(
            ShardRouter::with_targets(config, targets),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn buffer_ids_are_unique_per_shard() {
        let (router, _targets) = memory_router(3, 16);
        let ids: Vec<_> = router
            .shards
            .iter()
            .flat_map(|s| [s.pair.active().id(), s.pair.inactive().id()])
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_writers_lose_nothing_accepted() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2000;
        const RECORD: usize = 16;
        let (router, targets) = memory_router(4, 1024);
        let router = Arc::new(router);

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let router = Arc::clone(&router);
                thread::spawn(move || {
                    let mut accepted = 0usize;
                    for seq in 0..PER_THREAD {
                        let mut record = [0u8; RECORD];
                        record[0] = 0xA5;
                        record[1] = u8::try_from(t).unwrap();
                        record[8..].copy_from_slice(&(seq as u64).to_le_bytes());
                        if router.write(&record) {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        router.close().unwrap();

        // Records are 16 bytes and buffers hold 64 of them, so every flushed
        // buffer is a run of whole records followed by zeroes.
        let found: usize = targets
            .iter()
            .flat_map(|t| t.data())
            .collect::<Vec<_>>()
            .chunks(RECORD)
            .filter(|r| r.iter().any(|&b| b != 0))
            .count();
        assert_eq!(found, accepted);
        assert_eq!(router.stats().writes_accepted() as usize, accepted);
    }
}
