//! Per-shard flush workers.
//!
//! Each shard owns one worker thread and one flush target. Retired buffers
//! arrive over a channel; the worker drains each one into the target and
//! resets it so the shard can swap back into it. Workers never touch the
//! producer path.

use crate::buffer::{AfterFlush, AppendBuffer};
use crate::error::{CoreError, CoreResult};
use crate::stats::RouterStats;
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use swaplog_storage::{FlushTarget, StorageError, StorageResult};
use tracing::{debug, error};

/// A retired buffer on its way to the target.
#[derive(Debug)]
pub(crate) struct FlushJob {
    pub(crate) buffer: Arc<AppendBuffer>,
    pub(crate) then: AfterFlush,
}

/// Failure state of one shard, shared by its worker and the router.
#[derive(Debug, Default)]
pub(crate) struct ShardHealth {
    failed: AtomicBool,
    error: Mutex<Option<String>>,
}

impl ShardHealth {
    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Marks the shard failed. The first message wins.
    pub(crate) fn fail(&self, message: impl Into<String>) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(message.into());
        }
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

/// Handle to a running flush worker.
#[derive(Debug)]
pub(crate) struct FlushWorker {
    tx: Option<Sender<FlushJob>>,
    handle: Option<JoinHandle<StorageResult<()>>>,
}

impl FlushWorker {
    /// Starts the worker thread for `shard`.
    pub(crate) fn spawn(
        shard: usize,
        target: Box<dyn FlushTarget>,
        health: Arc<ShardHealth>,
        stats: Arc<RouterStats>,
    ) -> CoreResult<Self> {
        let (tx, rx) = channel::unbounded::<FlushJob>();

        let handle = thread::Builder::new()
            .name(format!("swaplog-flush-{shard}"))
            .spawn(move || {
                let mut target = target;
                for job in rx {
                    flush_one(shard, target.as_mut(), &job, &health, &stats);
                }
                debug!(shard, "flush queue closed, closing target");
                target.close()
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queues a buffer. Returns false if the worker is gone.
    pub(crate) fn submit(&self, buffer: Arc<AppendBuffer>, then: AfterFlush) -> bool {
        match &self.tx {
            Some(tx) => tx.send(FlushJob { buffer, then }).is_ok(),
            None => false,
        }
    }

    /// Stops accepting jobs and waits for the queue to drain and the target
    /// to close.
    pub(crate) fn finish(&mut self, shard: usize) -> CoreResult<()> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(CoreError::from),
                Err(_) => Err(CoreError::FlushWorkerPanicked { shard }),
            },
            None => Ok(()),
        }
    }
}

fn flush_one(
    shard: usize,
    target: &mut dyn FlushTarget,
    job: &FlushJob,
    health: &ShardHealth,
    stats: &RouterStats,
) {
    let started = Instant::now();
    let failed = health.is_failed();

    let result = job.buffer.drain_into(job.then, |data, filled| {
        if failed || filled == 0 {
            // Nothing to persist, or the shard already lost its target.
            return Ok(None);
        }
        panic::catch_unwind(AssertUnwindSafe(|| target.write(data)))
            .unwrap_or_else(|_| {
                Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "flush target panicked",
                )))
            })
            .map(|written| Some((written, filled)))
    });

    match result {
        Ok(Some((written, filled))) => {
            let elapsed = started.elapsed();
            stats.record_flush(written, elapsed);
            debug!(
                shard,
                buffer = job.buffer.id(),
                bytes = written,
                filled,
                elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
                "flushed buffer"
            );
        }
        Ok(None) => {}
        Err(e) => {
            stats.record_flush_error();
            error!(shard, buffer = job.buffer.id(), error = %e, "flush failed, shard stops accepting writes");
            health.fail(e.to_string());
        }
    }
}
