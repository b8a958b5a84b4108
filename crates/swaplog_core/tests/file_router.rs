//! Router tests against real files.

use std::fs;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};
use swaplog_core::{CoreError, IoMode, RouterConfig, ShardRouter, WriteOutcome};
use tempfile::tempdir;

const BLOCK: usize = 4096;

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting");
        thread::sleep(Duration::from_millis(1));
    }
}

fn buffered(base: &std::path::Path) -> RouterConfig {
    RouterConfig::new(base)
        .shard_count(1)
        .buffer_capacity(BLOCK)
        .file_capacity(1024 * 1024)
        .io_mode(IoMode::Buffered)
}

#[test]
fn overflow_hands_first_buffer_to_file() {
    let dir = tempdir().unwrap();
    let router = ShardRouter::open(buffered(dir.path())).unwrap();
    let file = router.run_dir().unwrap().join("swap_shard_0.bin");

    // Four writers fill the buffer exactly.
    for byte in 1..=4u8 {
        assert_eq!(router.try_write(&[byte; BLOCK / 4]), WriteOutcome::Accepted);
    }
    assert_eq!(router.stats().swaps(), 0);

    // The fifth overflows, swaps, and its retry succeeds.
    assert_eq!(router.try_write(&[5; 100]), WriteOutcome::Accepted);
    assert_eq!(router.stats().swaps(), 1);

    wait_for(|| router.stats().flushes() == 1);
    let data = fs::read(&file).unwrap();
    assert_eq!(data.len(), BLOCK);
    for (i, chunk) in data.chunks(BLOCK / 4).enumerate() {
        assert!(chunk.iter().all(|&b| usize::from(b) == i + 1));
    }

    router.close().unwrap();
    let data = fs::read(&file).unwrap();
    assert_eq!(data.len(), 2 * BLOCK);
    assert_eq!(&data[BLOCK..BLOCK + 100], &[5; 100]);
    assert!(data[BLOCK + 100..].iter().all(|&b| b == 0));
}

#[test]
fn concurrent_fill_then_overflow_hands_first_buffer_to_file() {
    const WRITERS: usize = 8;
    const CHUNK: usize = BLOCK / WRITERS;

    let dir = tempdir().unwrap();
    let router = ShardRouter::open(buffered(dir.path())).unwrap();
    let file = router.run_dir().unwrap().join("swap_shard_0.bin");
    let barrier = Barrier::new(WRITERS);

    thread::scope(|scope| {
        for writer in 1..=WRITERS {
            let (router, barrier) = (&router, &barrier);
            scope.spawn(move || {
                let byte = u8::try_from(writer).unwrap();
                barrier.wait();
                assert_eq!(router.try_write(&[byte; CHUNK]), WriteOutcome::Accepted);
            });
        }
    });
    assert_eq!(router.stats().swaps(), 0);

    assert_eq!(router.try_write(&[0xEE; 10]), WriteOutcome::Accepted);
    assert_eq!(router.stats().swaps(), 1);

    wait_for(|| router.stats().flushes() == 1);
    let data = fs::read(&file).unwrap();
    assert_eq!(data.len(), BLOCK);

    let mut owners: Vec<u8> = data
        .chunks(CHUNK)
        .map(|chunk| {
            assert!(chunk.iter().all(|&b| b == chunk[0]), "interleaved chunk");
            chunk[0]
        })
        .collect();
    owners.sort_unstable();
    assert_eq!(owners, (1..=WRITERS as u8).collect::<Vec<_>>());

    router.close().unwrap();
    let data = fs::read(&file).unwrap();
    assert_eq!(data.len(), 2 * BLOCK);
    assert_eq!(&data[BLOCK..BLOCK + 10], &[0xEE; 10]);
}

#[test]
fn close_publishes_final_files() {
    let dir = tempdir().unwrap();
    let config = buffered(dir.path()).shard_count(2).upload_queue_capacity(8);
    let router = ShardRouter::open(config).unwrap();
    let uploads = router.upload_receiver().unwrap();

    router.try_write_to(0, b"first shard").unwrap();
    router.try_write_to(1, b"second shard").unwrap();
    router.close().unwrap();

    let mut published: Vec<_> = uploads.try_iter().collect();
    published.sort();
    let run = router.run_dir().unwrap();
    assert_eq!(
        published,
        vec![run.join("swap_shard_0.bin"), run.join("swap_shard_1.bin")]
    );
    assert_eq!(&fs::read(&published[1]).unwrap()[..12], b"second shard");
}

#[test]
fn empty_shard_file_is_not_published() {
    let dir = tempdir().unwrap();
    let config = buffered(dir.path()).shard_count(2).upload_queue_capacity(8);
    let router = ShardRouter::open(config).unwrap();
    let uploads = router.upload_receiver().unwrap();

    router.try_write_to(1, b"only shard one").unwrap();
    router.close().unwrap();

    let published: Vec<_> = uploads.try_iter().collect();
    assert_eq!(published, vec![router.run_dir().unwrap().join("swap_shard_1.bin")]);
    let empty = router.run_dir().unwrap().join("swap_shard_0.bin");
    assert_eq!(fs::metadata(empty).unwrap().len(), 0);
}

#[test]
fn files_rotate_by_size() {
    let dir = tempdir().unwrap();
    let config = buffered(dir.path())
        .file_capacity(2 * BLOCK as u64)
        .fill_threshold(0.5)
        .upload_queue_capacity(8);
    let router = ShardRouter::open(config).unwrap();
    let uploads = router.upload_receiver().unwrap();

    // Five full buffers: two files of two buffers each, then one more.
    for byte in 1..=5u8 {
        assert!(router.write(&[byte; BLOCK]));
    }
    router.close().unwrap();

    let run = router.run_dir().unwrap();
    let published: Vec<_> = uploads.try_iter().collect();
    assert_eq!(
        published,
        vec![
            run.join("swap_shard_0.bin"),
            run.join("swap_shard_0.1.bin"),
            run.join("swap_shard_0.2.bin"),
        ]
    );
    assert_eq!(fs::metadata(&published[0]).unwrap().len(), 2 * BLOCK as u64);
    assert_eq!(fs::metadata(&published[1]).unwrap().len(), 2 * BLOCK as u64);
    assert_eq!(fs::read(&published[2]).unwrap(), vec![5; BLOCK]);
}

#[test]
fn runs_never_share_a_directory() {
    let dir = tempdir().unwrap();
    let first = ShardRouter::open(buffered(dir.path())).unwrap();
    let second = ShardRouter::open(buffered(dir.path())).unwrap();
    assert_ne!(first.run_dir(), second.run_dir());
}

#[test]
fn detected_mode_falls_back_for_unaligned_buffers() {
    let dir = tempdir().unwrap();
    let config = RouterConfig::new(dir.path())
        .shard_count(1)
        .buffer_capacity(1000)
        .file_capacity(10_000);
    let router = ShardRouter::open(config).unwrap();
    assert_eq!(router.io_mode(), Some(IoMode::Buffered));

    assert!(router.write(b"unaligned buffers still work"));
    router.close().unwrap();
}

#[test]
fn detected_mode_round_trips() {
    let dir = tempdir().unwrap();
    let config = RouterConfig::new(dir.path())
        .shard_count(1)
        .buffer_capacity(BLOCK)
        .file_capacity(16 * BLOCK as u64);
    let router = ShardRouter::open(config).unwrap();
    let file = router.run_dir().unwrap().join("swap_shard_0.bin");

    for byte in 1..=3u8 {
        assert!(router.write(&[byte; BLOCK]));
    }
    router.close().unwrap();

    // Same bytes whichever mode the filesystem supports.
    let data = fs::read(file).unwrap();
    assert_eq!(data.len(), 3 * BLOCK);
    assert!(data[2 * BLOCK..].iter().all(|&b| b == 3));
}

#[test]
fn invalid_config_is_rejected_before_touching_disk() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("never-created");
    let err = ShardRouter::open(RouterConfig::new(&base).shard_count(0)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig { .. }));
    assert!(!base.exists());
}
