//! Stress tests for SwapLog.
//!
//! These drive a router from many producers at once and check that every
//! accepted record reaches a flush target exactly once.

use crate::generators::{parse_flushed, record, RecordId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use swaplog_core::ShardRouter;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Accepted writes.
    pub successful_ops: usize,
    /// Writes that were dropped or refused.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
    /// Identities of the accepted records.
    pub accepted: HashSet<RecordId>,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(accepted: HashSet<RecordId>, failed: usize, duration: Duration) -> Self {
        let successful = accepted.len();
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
            accepted,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Accepted: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }

    /// Checks flushed output against the accepted records.
    ///
    /// # Errors
    ///
    /// Returns a description of the first record that is malformed,
    /// duplicated, missing, or was never accepted.
    pub fn verify(&self, flushed: &[u8], buffer_capacity: usize) -> Result<(), String> {
        let mut seen = HashSet::with_capacity(self.accepted.len());
        for id in parse_flushed(flushed, buffer_capacity)? {
            if !self.accepted.contains(&id) {
                return Err(format!("flushed record {id:?} was never accepted"));
            }
            if !seen.insert(id) {
                return Err(format!("record {id:?} flushed twice"));
            }
        }
        if seen.len() != self.accepted.len() {
            return Err(format!(
                "{} accepted records missing from flushed output",
                self.accepted.len() - seen.len()
            ));
        }
        Ok(())
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writes to perform across all threads.
    pub operations: usize,
    /// Number of concurrent producer threads.
    pub threads: usize,
    /// Payload bytes per record, excluding the header.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            payload_size: 64,
        }
    }
}

/// Run a single-producer write stress test.
pub fn stress_sequential_writes(router: &ShardRouter, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut accepted = HashSet::new();
    let mut failed = 0usize;

    for seq in 0..config.operations {
        let seq = seq as u32;
        if router.write(&record(0, seq, config.payload_size)) {
            accepted.insert(RecordId {
                producer: 0,
                sequence: seq,
            });
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(accepted, failed, start.elapsed())
}

/// Run a concurrent write stress test, one producer per thread.
pub fn stress_concurrent_writes(
    router: Arc<ShardRouter>,
    config: &StressConfig,
) -> StressTestResult {
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let router = Arc::clone(&router);
            let failed = Arc::clone(&failed);
            let payload_size = config.payload_size;

            thread::spawn(move || {
                let producer = t as u32;
                let mut accepted = Vec::with_capacity(ops_per_thread);
                for seq in 0..ops_per_thread {
                    let sequence = seq as u32;
                    if router.write(&record(producer, sequence, payload_size)) {
                        accepted.push(RecordId { producer, sequence });
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                accepted
            })
        })
        .collect();

    let mut accepted = HashSet::new();
    for handle in handles {
        accepted.extend(handle.join().expect("Thread panicked"));
    }

    StressTestResult::new(accepted, failed.load(Ordering::Relaxed), start.elapsed())
}
