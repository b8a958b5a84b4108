//! Test fixtures and router helpers.
//!
//! Provides routers backed by memory or by files in a temporary directory,
//! and access to everything they flushed.

use std::fs;
use std::io;
use std::path::Path;
use swaplog_core::{FlushTarget, InMemoryTarget, IoMode, RouterConfig, ShardRouter};
use swaplog_storage::SegmentNaming;
use tempfile::TempDir;

/// A test router with automatic cleanup.
pub struct TestRouter {
    /// The router instance.
    pub router: ShardRouter,
    buffer_capacity: usize,
    targets: Vec<InMemoryTarget>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestRouter {
    /// Creates a router whose shards flush into [`InMemoryTarget`]s.
    pub fn memory(shards: usize, buffer_capacity: usize) -> Self {
        let targets: Vec<_> = (0..shards).map(|_| InMemoryTarget::new()).collect();
        let boxed = targets
            .iter()
            .map(|t| Box::new(t.clone()) as Box<dyn FlushTarget>)
            .collect();
        let config = RouterConfig::default()
            .shard_count(shards)
            .buffer_capacity(buffer_capacity);

        Self {
            router: ShardRouter::with_targets(config, boxed).expect("Failed to open memory router"),
            buffer_capacity,
            targets,
            _temp_dir: None,
        }
    }

    /// Creates a router writing buffered files under a temporary directory.
    pub fn file(shards: usize, buffer_capacity: usize, file_capacity: u64) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = RouterConfig::new(temp_dir.path())
            .shard_count(shards)
            .buffer_capacity(buffer_capacity)
            .file_capacity(file_capacity)
            .io_mode(IoMode::Buffered)
            .upload_queue_capacity(1024);

        Self {
            router: ShardRouter::open(config).expect("Failed to open file router"),
            buffer_capacity,
            targets: Vec::new(),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the configured buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Returns the memory targets, empty for a file router.
    pub fn targets(&self) -> &[InMemoryTarget] {
        &self.targets
    }

    /// Returns every byte flushed for `shard`, in order.
    ///
    /// For a file router this concatenates the shard's files in rotation
    /// order.
    pub fn flushed(&self, shard: usize) -> Vec<u8> {
        if let Some(target) = self.targets.get(shard) {
            return target.data();
        }
        match self.router.run_dir() {
            Some(dir) => read_segments(dir, shard).expect("Failed to read segment files"),
            None => Vec::new(),
        }
    }

    /// Returns every byte flushed across all shards, shard by shard.
    pub fn flushed_all(&self) -> Vec<u8> {
        (0..self.router.shard_count())
            .flat_map(|shard| self.flushed(shard))
            .collect()
    }
}

impl std::ops::Deref for TestRouter {
    type Target = ShardRouter;

    fn deref(&self) -> &Self::Target {
        &self.router
    }
}

/// Reads a shard's files from `dir` in rotation order.
///
/// # Errors
///
/// Returns an error if a file exists but cannot be read.
pub fn read_segments(dir: &Path, shard: usize) -> io::Result<Vec<u8>> {
    let naming = SegmentNaming::new(dir.to_path_buf(), shard);
    let mut data = Vec::new();
    for sequence in 0.. {
        match fs::read(naming.path(sequence)) {
            Ok(bytes) => data.extend(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e),
        }
    }
    Ok(data)
}

/// Runs a test with a single-shard memory router.
///
/// # Example
///
/// ```rust
/// use swaplog_testkit::with_memory_router;
///
/// with_memory_router(1024, |router| {
///     assert!(router.write(b"record"));
/// });
/// ```
pub fn with_memory_router<F, R>(buffer_capacity: usize, f: F) -> R
where
    F: FnOnce(&ShardRouter) -> R,
{
    let test_router = TestRouter::memory(1, buffer_capacity);
    f(&test_router.router)
}

/// Runs a test with a single-shard file router.
pub fn with_file_router<F, R>(buffer_capacity: usize, file_capacity: u64, f: F) -> R
where
    F: FnOnce(&ShardRouter, &Path) -> R,
{
    let test_router = TestRouter::file(1, buffer_capacity, file_capacity);
    let dir = test_router
        .router
        .run_dir()
        .expect("File router should have a run directory")
        .to_path_buf();
    f(&test_router.router, &dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_router_flushes_on_close() {
        let router = TestRouter::memory(2, 64);
        router.try_write_to(1, b"abc").unwrap();
        router.close().unwrap();

        assert!(router.flushed(0).is_empty());
        assert_eq!(&router.flushed(1)[..3], b"abc");
        assert_eq!(router.flushed_all().len(), 64);
    }

    #[test]
    fn file_router_reads_rotated_files() {
        let router = TestRouter::file(1, 4096, 4096);
        for byte in 1..=3u8 {
            assert!(router.write(&[byte; 4096]));
        }
        router.close().unwrap();

        let data = router.flushed(0);
        assert_eq!(data.len(), 3 * 4096);
        assert!(data[..4096].iter().all(|&b| b == 1));
        assert!(data[8192..].iter().all(|&b| b == 3));
    }

    #[test]
    fn with_file_router_exposes_run_dir() {
        with_file_router(4096, 8192, |router, dir| {
            assert!(dir.join("swap_shard_0.bin").exists());
            assert!(router.write(b"x"));
        });
    }
}
