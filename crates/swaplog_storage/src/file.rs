//! Rotating, block-aligned file writer.

use crate::direct::{self, IoMode};
use crate::error::{StorageError, StorageResult};
use crate::layout::SegmentNaming;
use crate::target::FlushTarget;
use crate::upload::UploadQueue;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Options for an [`AlignedFileWriter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileWriterOptions {
    /// Bytes per file before rotating. Rounded up to the block size in
    /// direct mode.
    pub capacity: u64,

    /// Fraction of `capacity` at which the next file is prepared.
    pub fill_threshold: f64,

    /// How files are opened and written.
    pub mode: IoMode,
}

impl Default for FileWriterOptions {
    fn default() -> Self {
        Self {
            capacity: 256 * 1024 * 1024, // 256 MB
            fill_threshold: 0.9,
            mode: IoMode::Buffered,
        }
    }
}

impl FileWriterOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-file capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the fill threshold for preparing the next file.
    #[must_use]
    pub fn fill_threshold(mut self, fraction: f64) -> Self {
        self.fill_threshold = fraction;
        self
    }

    /// Sets the I/O mode.
    #[must_use]
    pub const fn mode(mut self, mode: IoMode) -> Self {
        self.mode = mode;
        self
    }
}

/// An open segment file and how much of it has been written.
#[derive(Debug)]
struct Segment {
    file: File,
    path: PathBuf,
    offset: u64,
}

/// A flush target that streams buffers into a rotating sequence of files.
///
/// Each write lands at the current file offset with a positional write.
/// When a write would overflow the file, the writer rotates to a file that
/// was prepared ahead of time, once the current file crossed the fill
/// threshold. Rotation syncs the finished file, truncates away unused
/// preallocation and publishes its path to the optional upload queue.
///
/// # Direct I/O
///
/// In [`IoMode::Direct`] files are opened with `O_DIRECT | O_DSYNC` and
/// preallocated to the block-aligned capacity. Every buffer must be
/// block-aligned in length and address; misaligned writes are rejected with
/// [`StorageError::Misaligned`] rather than copied.
///
/// # Example
///
/// ```no_run
/// use swaplog_storage::{AlignedFileWriter, FileWriterOptions, FlushTarget, RunDirectory};
/// use std::path::Path;
///
/// let run = RunDirectory::create(Path::new("logs")).unwrap();
/// let options = FileWriterOptions::new().capacity(64 * 1024 * 1024);
/// let mut writer = AlignedFileWriter::create(run.segment_naming(0), options, None).unwrap();
/// writer.write(&[0u8; 4096]).unwrap();
/// writer.close().unwrap();
/// ```
#[derive(Debug)]
pub struct AlignedFileWriter {
    naming: SegmentNaming,
    mode: IoMode,
    capacity: u64,
    threshold: u64,
    current: Option<Segment>,
    next: Option<Segment>,
    next_sequence: u64,
    upload: Option<UploadQueue>,
    rotations: u64,
    bytes_written: u64,
}

impl AlignedFileWriter {
    /// Creates the first file for a shard and returns a writer for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or, in direct mode,
    /// preallocated.
    pub fn create(
        naming: SegmentNaming,
        options: FileWriterOptions,
        upload: Option<UploadQueue>,
    ) -> StorageResult<Self> {
        let capacity = options.mode.file_capacity(options.capacity);
        let threshold = threshold_bytes(capacity, options.fill_threshold);

        fs::create_dir_all(naming.dir())?;
        let path = naming.path(0);
        let file = direct::open_segment(&path, options.mode)?;
        if options.mode.is_direct() {
            direct::preallocate(&file, capacity)?;
        }

        debug!(
            shard = naming.shard(),
            path = %path.display(),
            capacity,
            mode = ?options.mode,
            "opened segment file"
        );

        Ok(Self {
            naming,
            mode: options.mode,
            capacity,
            threshold,
            current: Some(Segment {
                file,
                path,
                offset: 0,
            }),
            next: None,
            next_sequence: 1,
            upload,
            rotations: 0,
            bytes_written: 0,
        })
    }

    /// Path of the file currently being written, or `None` once closed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }

    /// Write offset within the current file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current.as_ref().map_or(0, |s| s.offset)
    }

    /// Effective per-file capacity (block-aligned in direct mode).
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The I/O mode in use.
    #[must_use]
    pub fn mode(&self) -> IoMode {
        self.mode
    }

    /// Returns true if a next file is prepared for rotation.
    #[must_use]
    pub fn has_next_file(&self) -> bool {
        self.next.is_some()
    }

    /// Path of the prepared next file, if any.
    #[must_use]
    pub fn next_path(&self) -> Option<&Path> {
        self.next.as_ref().map(|s| s.path.as_path())
    }

    /// Number of rotations performed so far.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Creates and preallocates the next file, if one is not already prepared.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn prepare_next(&mut self) -> StorageResult<()> {
        if self.next.is_some() {
            return Ok(());
        }

        let path = self.naming.path(self.next_sequence);
        let file = direct::open_segment(&path, self.mode)?;
        self.next_sequence += 1;

        if self.mode.is_direct() {
            if let Err(e) = direct::preallocate(&file, self.capacity) {
                warn!(
                    path = %path.display(),
                    capacity = self.capacity,
                    error = %e,
                    "preallocation failed, continuing without it"
                );
            }
        }

        debug!(shard = self.naming.shard(), path = %path.display(), "prepared next segment file");
        self.next = Some(Segment {
            file,
            path,
            offset: 0,
        });
        Ok(())
    }

    /// Switches to the prepared next file.
    ///
    /// The current file is synced, truncated to the bytes actually written,
    /// closed and published to the upload queue.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NextFileMissing`] if no next file was prepared;
    /// the writer keeps writing to the current file in that case. Returns an
    /// I/O error if the finished file cannot be synced.
    pub fn rotate(&mut self) -> StorageResult<()> {
        if self.current.is_none() {
            return Err(StorageError::Closed);
        }
        let Some(next) = self.next.take() else {
            let path = self.path().map(Path::to_path_buf).unwrap_or_default();
            error!(path = %path.display(), "rotation requested without a prepared next file");
            return Err(StorageError::NextFileMissing { path });
        };

        let finished = self.current.replace(next);
        self.rotations += 1;
        debug!(
            shard = self.naming.shard(),
            rotations = self.rotations,
            path = ?self.path(),
            "rotated segment file"
        );

        match finished {
            Some(segment) => self.finish(segment),
            None => Ok(()),
        }
    }

    fn finish(&self, segment: Segment) -> StorageResult<()> {
        segment.file.sync_all()?;
        if segment.file.metadata()?.len() > segment.offset {
            segment.file.set_len(segment.offset)?;
        }
        let Segment { file, path, offset } = segment;
        drop(file);

        if offset > 0 {
            if let Some(upload) = &self.upload {
                upload.offer(path);
            }
        }
        Ok(())
    }

    /// Prepares the next file once a write ending at `end` crosses the
    /// threshold. Failure is logged; the rotation itself reports it.
    fn prepare_next_if_needed(&mut self, end: u64) {
        if self.next.is_some() || end < self.threshold {
            return;
        }
        if let Err(e) = self.prepare_next() {
            warn!(shard = self.naming.shard(), error = %e, "failed to prepare next segment file");
        }
    }

    fn check_alignment(&self, data: &[u8]) -> StorageResult<()> {
        let alignment = self.mode.alignment();
        if alignment == 1 {
            return Ok(());
        }
        if data.len() % alignment != 0 {
            return Err(StorageError::Misaligned {
                what: "length",
                value: data.len(),
                alignment,
            });
        }
        let address = data.as_ptr() as usize;
        if address % alignment != 0 {
            return Err(StorageError::Misaligned {
                what: "address",
                value: address,
                alignment,
            });
        }
        Ok(())
    }
}

impl FlushTarget for AlignedFileWriter {
    fn write(&mut self, data: &[u8]) -> StorageResult<usize> {
        let offset = self.current.as_ref().ok_or(StorageError::Closed)?.offset;
        if data.is_empty() {
            return Ok(0);
        }
        self.check_alignment(data)?;

        let len = data.len() as u64;
        if len > self.capacity {
            return Err(StorageError::WriteTooLarge {
                len: data.len(),
                capacity: self.capacity,
            });
        }

        let end = offset + len;
        self.prepare_next_if_needed(end);
        if end > self.capacity {
            self.rotate()?;
            self.prepare_next_if_needed(len);
        }

        let segment = self.current.as_mut().ok_or(StorageError::Closed)?;
        direct::write_at(&segment.file, data, segment.offset)?;
        segment.offset += len;
        self.bytes_written += len;
        Ok(data.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let segment = self.current.as_ref().ok_or(StorageError::Closed)?;
        segment.file.sync_data()?;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        let finished = match self.current.take() {
            Some(segment) => self.finish(segment),
            None => return Ok(()),
        };

        if let Some(unused) = self.next.take() {
            let Segment { file, path, .. } = unused;
            drop(file);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove unused segment file"),
            }
        }

        debug!(shard = self.naming.shard(), bytes = self.bytes_written, "closed segment writer");
        finished
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

fn threshold_bytes(capacity: u64, fraction: f64) -> u64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        1.0
    };
    (capacity as f64 * fraction) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RunDirectory;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn buffered(capacity: u64) -> FileWriterOptions {
        FileWriterOptions::new()
            .capacity(capacity)
            .mode(IoMode::Buffered)
    }

    fn writer_in(dir: &Path, options: FileWriterOptions) -> AlignedFileWriter {
        let run = RunDirectory::create(dir).unwrap();
        AlignedFileWriter::create(run.segment_naming(0), options, None).unwrap()
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let writer = writer_in(dir.path(), buffered(1000));

        let path = writer.path().unwrap();
        assert!(path.exists());
        assert!(path.ends_with("swap_shard_0.bin"));
        assert_eq!(writer.offset(), 0);
        assert!(!writer.has_next_file());
    }

    #[test]
    fn file_write_advances_offset() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(1000));

        assert_eq!(writer.write(b"hello").unwrap(), 5);
        assert_eq!(writer.write(b" world").unwrap(), 6);
        assert_eq!(writer.offset(), 11);
        assert_eq!(writer.bytes_written(), 11);

        let path = writer.path().unwrap().to_path_buf();
        writer.close().unwrap();
        assert_eq!(fs::read(path).unwrap(), b"hello world");
    }

    #[test]
    fn file_empty_write() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(1000));

        assert_eq!(writer.write(b"").unwrap(), 0);
        assert_eq!(writer.offset(), 0);
    }

    #[test]
    fn next_file_prepared_at_threshold() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));

        writer.write(&[1u8; 80]).unwrap();
        assert!(!writer.has_next_file());

        writer.write(&[2u8; 10]).unwrap();
        assert!(writer.has_next_file());
        assert!(writer.next_path().unwrap().ends_with("swap_shard_0.1.bin"));
        assert_eq!(writer.rotations(), 0);
    }

    #[test]
    fn overflowing_write_rotates_once() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));
        let first = writer.path().unwrap().to_path_buf();

        writer.write(&[1u8; 60]).unwrap();
        writer.write(&[2u8; 30]).unwrap();
        writer.write(&[3u8; 30]).unwrap();

        assert_eq!(writer.rotations(), 1);
        assert_eq!(writer.offset(), 30);
        assert_ne!(writer.path().unwrap(), first);

        let mut expected = vec![1u8; 60];
        expected.extend_from_slice(&[2u8; 30]);
        assert_eq!(fs::read(&first).unwrap(), expected);
    }

    #[test]
    fn rotation_resets_offset_to_zero() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));

        writer.write(&[1u8; 95]).unwrap();
        assert!(writer.has_next_file());
        writer.rotate().unwrap();

        assert_eq!(writer.offset(), 0);
        assert_eq!(writer.rotations(), 1);
        assert!(!writer.has_next_file());
    }

    #[test]
    fn large_writes_rotate_before_threshold() {
        // 60 + 60 > 100 while 60 < 90: the next file is prepared just in time.
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));

        writer.write(&[1u8; 60]).unwrap();
        writer.write(&[2u8; 60]).unwrap();
        assert_eq!(writer.rotations(), 1);
        assert_eq!(writer.offset(), 60);
    }

    #[test]
    fn rotate_without_next_file_fails() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));
        writer.write(b"abc").unwrap();
        let path = writer.path().unwrap().to_path_buf();

        let result = writer.rotate();
        assert!(matches!(result, Err(StorageError::NextFileMissing { .. })));

        // State is untouched; writes continue in the same file.
        assert_eq!(writer.path().unwrap(), path);
        assert_eq!(writer.offset(), 3);
        assert_eq!(writer.rotations(), 0);
        writer.write(b"def").unwrap();
        writer.close().unwrap();
        assert_eq!(fs::read(path).unwrap(), b"abcdef");
    }

    #[test]
    fn write_larger_than_file_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(10));

        let result = writer.write(&[0u8; 11]);
        assert!(matches!(result, Err(StorageError::WriteTooLarge { len: 11, .. })));
        assert_eq!(writer.offset(), 0);
    }

    #[test]
    fn rotation_truncates_and_publishes() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create(dir.path()).unwrap();
        let (queue, rx) = UploadQueue::bounded(8);
        let mut writer =
            AlignedFileWriter::create(run.segment_naming(2), buffered(100), Some(queue)).unwrap();

        writer.write(&[7u8; 95]).unwrap();
        writer.write(&[8u8; 50]).unwrap();

        let completed = rx.try_recv().unwrap();
        assert!(completed.ends_with("swap_shard_2.bin"));
        assert_eq!(fs::metadata(&completed).unwrap().len(), 95);

        writer.close().unwrap();
        let last = rx.try_recv().unwrap();
        assert!(last.ends_with("swap_shard_2.1.bin"));
        assert_eq!(fs::metadata(&last).unwrap().len(), 50);
    }

    #[test]
    fn close_removes_unused_next_file() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));

        writer.write(&[1u8; 95]).unwrap();
        let next = writer.next_path().unwrap().to_path_buf();
        assert!(next.exists());

        writer.close().unwrap();
        assert!(!next.exists());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));
        writer.write(b"x").unwrap();

        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.path().is_none());
        assert!(matches!(writer.write(b"y"), Err(StorageError::Closed)));
        assert!(matches!(writer.sync(), Err(StorageError::Closed)));
        assert!(matches!(writer.rotate(), Err(StorageError::Closed)));
    }

    #[test]
    fn empty_file_not_published() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create(dir.path()).unwrap();
        let (queue, rx) = UploadQueue::bounded(8);
        let mut writer =
            AlignedFileWriter::create(run.segment_naming(0), buffered(100), Some(queue)).unwrap();

        writer.close().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn threshold_fraction_is_clamped() {
        assert_eq!(threshold_bytes(1000, 0.9), 900);
        assert_eq!(threshold_bytes(1000, 1.5), 1000);
        assert_eq!(threshold_bytes(1000, -1.0), 0);
        assert_eq!(threshold_bytes(1000, f64::NAN), 1000);
    }

    #[test]
    fn sync_flushes_buffered_file() {
        let dir = tempdir().unwrap();
        let mut writer = writer_in(dir.path(), buffered(100));

        writer.write(b"durable").unwrap();
        writer.sync().unwrap();
        assert_eq!(&fs::read(writer.path().unwrap()).unwrap()[..7], b"durable");
    }

    /// One direct I/O block, aligned the way the router's buffers are.
    #[repr(C, align(4096))]
    struct Block([u8; 4096]);

    /// Returns false, and says so, when `dir` cannot be opened with `O_DIRECT`.
    fn direct_available(dir: &Path) -> bool {
        if IoMode::detect(dir) == IoMode::Direct {
            return true;
        }
        eprintln!(
            "skipping: {} does not support O_DIRECT; run the ignored direct_mode_* tests on a disk-backed filesystem",
            dir.display()
        );
        false
    }

    fn exercise_direct_writer(dir: &Path) {
        let options = FileWriterOptions::new()
            .capacity(2 * 4096)
            .mode(IoMode::Direct);
        let mut writer = writer_in(dir, options);
        assert_eq!(writer.capacity(), 2 * 4096);

        let result = writer.write(&[0u8; 100]);
        assert!(matches!(
            result,
            Err(StorageError::Misaligned { what: "length", .. })
        ));
        assert_eq!(writer.offset(), 0);

        let block = Box::new(Block([7u8; 4096]));
        for _ in 0..3 {
            assert_eq!(writer.write(&block.0).unwrap(), 4096);
        }
        writer.sync().unwrap();
        assert_eq!(writer.rotations(), 1);

        let first = writer.naming.path(0);
        writer.close().unwrap();
        assert_eq!(fs::metadata(first).unwrap().len(), 2 * 4096);
    }

    #[test]
    fn direct_mode_rejects_misaligned_length() {
        let dir = tempdir().unwrap();
        if direct_available(dir.path()) {
            exercise_direct_writer(dir.path());
        }
    }

    #[test]
    #[ignore = "requires a filesystem that supports O_DIRECT"]
    fn direct_mode_on_disk_backed_dir() {
        let base = std::env::var_os("SWAPLOG_DIRECT_DIR")
            .map_or_else(std::env::temp_dir, PathBuf::from);
        let dir = tempfile::tempdir_in(base).unwrap();
        assert_eq!(
            IoMode::detect(dir.path()),
            IoMode::Direct,
            "set SWAPLOG_DIRECT_DIR to a directory on a filesystem with O_DIRECT"
        );
        exercise_direct_writer(dir.path());
    }

    proptest! {
        #[test]
        fn rotated_files_hold_every_write(lens in prop::collection::vec(1usize..=256, 1..40)) {
            let dir = tempdir().unwrap();
            let run = RunDirectory::create(dir.path()).unwrap();
            let naming = run.segment_naming(0);
            let mut writer =
                AlignedFileWriter::create(naming.clone(), buffered(256), None).unwrap();

            let mut expected = Vec::new();
            for (i, len) in lens.iter().enumerate() {
                let chunk = vec![(i % 251) as u8 + 1; *len];
                prop_assert_eq!(writer.write(&chunk).unwrap(), *len);
                expected.extend_from_slice(&chunk);
            }
            writer.close().unwrap();

            let mut written = Vec::new();
            for sequence in 0.. {
                match fs::read(naming.path(sequence)) {
                    Ok(bytes) => {
                        prop_assert!(bytes.len() <= 256);
                        written.extend(bytes);
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                    Err(e) => panic!("reading segment {sequence}: {e}"),
                }
            }
            prop_assert_eq!(written, expected);
        }
    }
}
