//! On-disk layout for flushed buffers.
//!
//! ```text
//! <base_dir>/
//! └─ 2026-10-18-14-03-59/        # one directory per router start
//!    ├─ swap_shard_0.bin         # first file of shard 0
//!    ├─ swap_shard_0.1.bin       # after the first rotation
//!    ├─ swap_shard_1.bin
//!    └─ ...
//! ```
//!
//! Files are raw concatenations of flushed buffers with no header or footer.

use crate::error::StorageResult;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name prefix for segment files.
pub const SEGMENT_PREFIX: &str = "swap_shard_";

/// File name extension for segment files.
pub const SEGMENT_EXTENSION: &str = "bin";

/// Timestamp format used for run directory names.
const RUN_DIR_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Upper bound on suffixed attempts when a run directory name is taken.
const MAX_RUN_DIR_ATTEMPTS: u32 = 1024;

/// A timestamped directory holding every file written by one router run.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Creates a fresh run directory under `base`.
    ///
    /// The name is the local start time. If that directory already exists
    /// (two runs within the same second) a `-<n>` suffix is appended, so a
    /// new run never truncates files from a previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` cannot be created or no free name is found.
    pub fn create(base: &Path) -> StorageResult<Self> {
        fs::create_dir_all(base)?;

        let stamp = chrono::Local::now().format(RUN_DIR_FORMAT).to_string();
        for attempt in 0..MAX_RUN_DIR_ATTEMPTS {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let path = base.join(name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free run directory name under {}", base.display()),
        )
        .into())
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the naming scheme for one shard's files in this run.
    #[must_use]
    pub fn segment_naming(&self, shard: usize) -> SegmentNaming {
        SegmentNaming::new(self.path.clone(), shard)
    }
}

/// Deterministic file names for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNaming {
    dir: PathBuf,
    shard: usize,
}

impl SegmentNaming {
    /// Creates a naming scheme for `shard` inside `dir`.
    #[must_use]
    pub fn new(dir: PathBuf, shard: usize) -> Self {
        Self { dir, shard }
    }

    /// Returns the shard index.
    #[must_use]
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Returns the directory files are created in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the `sequence`-th file; sequence 0 is the initial file.
    #[must_use]
    pub fn path(&self, sequence: u64) -> PathBuf {
        let name = if sequence == 0 {
            format!("{SEGMENT_PREFIX}{}.{SEGMENT_EXTENSION}", self.shard)
        } else {
            format!("{SEGMENT_PREFIX}{}.{sequence}.{SEGMENT_EXTENSION}", self.shard)
        };
        self.dir.join(name)
    }
}
