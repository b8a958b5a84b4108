//! I/O mode selection and segment file opening.
//!
//! ## Alignment Contract
//!
//! In [`IoMode::Direct`] the page cache is bypassed, so every write must have
//! a length, file offset and buffer address that are multiples of
//! [`DIRECT_IO_BLOCK_SIZE`]. File capacities are rounded up to the block size
//! before preallocation. [`IoMode::Buffered`] is the portable fallback with
//! no alignment requirements and no preallocation.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::debug;

/// Block size required for direct I/O writes.
pub const DIRECT_IO_BLOCK_SIZE: usize = 4096;

/// Name of the throwaway file used to probe for direct I/O support.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const PROBE_FILE: &str = ".swaplog-direct-probe";

/// Rounds `n` up to the next multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(n: u64, align: u64) -> u64 {
    (n + align - 1) & !(align - 1)
}

/// How segment files are opened and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Unbuffered, synchronous writes (`O_DIRECT | O_DSYNC`) into
    /// preallocated files.
    Direct,
    /// Ordinary buffered writes. Available everywhere.
    Buffered,
}

impl IoMode {
    /// Detects the best mode for files created under `dir`.
    ///
    /// On Linux a probe file is opened with `O_DIRECT`; filesystems that
    /// reject the flag (tmpfs, some network mounts) fall back to
    /// [`IoMode::Buffered`]. Other platforms always use buffered I/O.
    pub fn detect(dir: &Path) -> Self {
        let mode = probe_direct(dir);
        debug!(dir = %dir.display(), ?mode, "detected I/O mode");
        mode
    }

    /// Returns true for [`IoMode::Direct`].
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Direct)
    }

    /// Alignment that write lengths and buffer addresses must satisfy.
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::Direct => DIRECT_IO_BLOCK_SIZE,
            Self::Buffered => 1,
        }
    }

    /// Rounds a file capacity to what this mode will actually preallocate.
    #[must_use]
    pub const fn file_capacity(self, requested: u64) -> u64 {
        match self {
            Self::Direct => align_up(requested, DIRECT_IO_BLOCK_SIZE as u64),
            Self::Buffered => requested,
        }
    }
}

#[cfg(target_os = "linux")]
fn probe_direct(dir: &Path) -> IoMode {
    let probe = dir.join(PROBE_FILE);
    let result = open_segment(&probe, IoMode::Direct);
    let _ = std::fs::remove_file(&probe);
    match result {
        Ok(_) => IoMode::Direct,
        Err(_) => IoMode::Buffered,
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_direct(_dir: &Path) -> IoMode {
    IoMode::Buffered
}

/// Creates (truncating) a segment file for writing in the given mode.
pub(crate) fn open_segment(path: &Path, mode: IoMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    #[cfg(target_os = "linux")]
    {
        if mode.is_direct() {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_DIRECT | libc::O_DSYNC);
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        if mode.is_direct() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "direct I/O is only supported on Linux",
            ));
        }
    }

    options.open(path)
}

/// Reserves `len` bytes of disk space for `file`.
pub(crate) fn preallocate(file: &File, len: u64) -> io::Result<()> {
    fs2::FileExt::allocate(file, len)
}

/// Writes all of `data` at `offset` without moving a shared cursor.
#[cfg(unix)]
pub(crate) fn write_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

/// Writes all of `data` at `offset`.
#[cfg(not(unix))]
pub(crate) fn write_at(mut file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}
