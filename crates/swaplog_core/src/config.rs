//! Router configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use swaplog_storage::{FileWriterOptions, IoMode, DIRECT_IO_BLOCK_SIZE};

/// Configuration for opening a [`crate::ShardRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Number of independent shards, each with its own buffer pair and file.
    pub shard_count: usize,

    /// Capacity of each append buffer in bytes.
    pub buffer_capacity: usize,

    /// Size at which a shard's file is rotated.
    pub file_capacity: u64,

    /// Fraction of `file_capacity` at which the next file is prepared.
    pub fill_threshold: f64,

    /// Directory under which a timestamped run directory is created.
    pub base_dir: PathBuf,

    /// Forces an I/O mode. `None` detects it from `base_dir`.
    pub io_mode: Option<IoMode>,

    /// Capacity of the completed-file queue. `None` disables it.
    pub upload_queue_capacity: Option<usize>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            shard_count: 8,
            buffer_capacity: 8 * 1024 * 1024,  // 8 MiB
            file_capacity: 256 * 1024 * 1024, // 256 MiB
            fill_threshold: 0.9,
            base_dir: PathBuf::from("swaplog"),
            io_mode: None,
            upload_queue_capacity: None,
        }
    }
}

impl RouterConfig {
    /// Creates a configuration with default values writing under `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the number of shards.
    #[must_use]
    pub const fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Sets the capacity of each append buffer.
    #[must_use]
    pub const fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Sets the rotation size of each shard's file.
    #[must_use]
    pub const fn file_capacity(mut self, bytes: u64) -> Self {
        self.file_capacity = bytes;
        self
    }

    /// Sets the fraction of a file at which the next one is prepared.
    #[must_use]
    pub fn fill_threshold(mut self, fraction: f64) -> Self {
        self.fill_threshold = fraction;
        self
    }

    /// Forces direct or buffered I/O instead of detecting it.
    #[must_use]
    pub const fn io_mode(mut self, mode: IoMode) -> Self {
        self.io_mode = Some(mode);
        self
    }

    /// Enables the completed-file queue with room for `capacity` paths.
    #[must_use]
    pub const fn upload_queue_capacity(mut self, capacity: usize) -> Self {
        self.upload_queue_capacity = Some(capacity);
        self
    }

    /// Checks that the configuration can be used to open a router.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.shard_count == 0 {
            return Err(CoreError::invalid_config("shard_count must be at least 1"));
        }
        if self.buffer_capacity == 0 {
            return Err(CoreError::invalid_config(
                "buffer_capacity must be at least 1 byte",
            ));
        }
        if self.file_capacity < self.buffer_capacity as u64 {
            return Err(CoreError::invalid_config(format!(
                "file_capacity ({}) must be at least buffer_capacity ({})",
                self.file_capacity, self.buffer_capacity
            )));
        }
        if self.fill_threshold.is_nan() || self.fill_threshold <= 0.0 || self.fill_threshold > 1.0 {
            return Err(CoreError::invalid_config(format!(
                "fill_threshold must be in (0, 1], got {}",
                self.fill_threshold
            )));
        }
        if self.base_dir.as_os_str().is_empty() {
            return Err(CoreError::invalid_config("base_dir must not be empty"));
        }
        if self.io_mode == Some(IoMode::Direct) && !is_block_aligned(self.buffer_capacity) {
            return Err(CoreError::invalid_config(format!(
                "direct I/O needs buffer_capacity to be a multiple of {DIRECT_IO_BLOCK_SIZE}, got {}",
                self.buffer_capacity
            )));
        }
        if self.upload_queue_capacity == Some(0) {
            return Err(CoreError::invalid_config(
                "upload_queue_capacity must be at least 1 when enabled",
            ));
        }
        Ok(())
    }

    /// Options for one shard's file writer in the given mode.
    #[must_use]
    pub fn file_writer_options(&self, mode: IoMode) -> FileWriterOptions {
        FileWriterOptions::new()
            .capacity(self.file_capacity)
            .fill_threshold(self.fill_threshold)
            .mode(mode)
    }
}

/// Returns true if `len` is a whole number of direct I/O blocks.
pub(crate) const fn is_block_aligned(len: usize) -> bool {
    len % DIRECT_IO_BLOCK_SIZE == 0
}
