//! Fixed-capacity append buffer with lock-free reservation.
//!
//! ## Reservation
//!
//! A writer claims `len` bytes with a single `fetch_add` on the offset. The
//! returned start and `start + len` bound a range no other writer can be
//! given, so the copy into it needs no lock. If the range ends past the
//! capacity the reservation is rejected and nothing is copied, but the
//! counter stays advanced: the tail of the buffer is wasted until the next
//! reset.
//!
//! ## Draining
//!
//! Every writer counts itself in `inflight` before reserving and out again
//! after copying (or after being rejected). A flush seals the buffer by
//! pushing the offset past the capacity, so no later reservation can
//! succeed, then waits for `inflight` to reach zero. At that point every
//! accepted copy has completed and the bytes may be read.
//!
//! ## Layout
//!
//! ```text
//! data:  [ accepted records ......... | wasted tail | ]
//!        0                          filled       capacity
//! ```
//!
//! The data region is aligned to the direct I/O block size so it can be
//! handed to an unbuffered file without copying.

use crate::error::{CoreError, CoreResult};
use crate::wait::spin_until;
use crossbeam::utils::CachePadded;
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use swaplog_storage::DIRECT_IO_BLOCK_SIZE;
use tracing::error;

/// Alignment of every buffer's data region.
pub const BUFFER_ALIGNMENT: usize = DIRECT_IO_BLOCK_SIZE;

/// Result of [`AppendBuffer::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The bytes were copied. Holds the number of bytes written.
    Accepted(usize),
    /// The buffer is full; other writers are still copying into it.
    RejectedFull,
    /// The buffer is full and this was the last writer inside it, so it can
    /// be flushed without waiting.
    RejectedFullAndDrained,
}

impl AppendOutcome {
    /// Returns true if the bytes were copied.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Returns true if the reservation ran past the capacity.
    #[must_use]
    pub const fn overflowed(self) -> bool {
        !self.is_accepted()
    }

    /// Number of bytes written; zero for a rejected write.
    #[must_use]
    pub const fn bytes_written(self) -> usize {
        match self {
            Self::Accepted(n) => n,
            Self::RejectedFull | Self::RejectedFullAndDrained => 0,
        }
    }
}

/// What a flush leaves behind once the bytes have been handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterFlush {
    /// Empty the buffer and clear its ready-for-flush flag.
    Reset,
    /// Leave the buffer sealed so every later write is rejected.
    KeepSealed,
}

/// A fixed-capacity byte region shared by concurrent writers.
pub struct AppendBuffer {
    offset: CachePadded<AtomicUsize>,
    inflight: CachePadded<AtomicI64>,
    /// End of the accepted prefix, recorded by the first rejected reservation.
    filled: AtomicUsize,
    ready_for_flush: AtomicBool,
    /// Held by whoever is draining or resetting the buffer.
    exclusive: AtomicBool,
    /// Bumped on every reset.
    generation: AtomicU64,
    capacity: usize,
    id: u32,
    data: AlignedRegion,
}

impl AppendBuffer {
    /// Allocates a zeroed buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `capacity` is zero or too large
    /// to allocate with block alignment.
    pub fn new(capacity: usize, id: u32) -> CoreResult<Self> {
        Ok(Self {
            offset: CachePadded::new(AtomicUsize::new(0)),
            inflight: CachePadded::new(AtomicI64::new(0)),
            filled: AtomicUsize::new(capacity),
            ready_for_flush: AtomicBool::new(false),
            exclusive: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            capacity,
            id,
            data: AlignedRegion::zeroed(capacity)?,
        })
    }

    /// Returns the buffer's identity.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns how many times the buffer has been emptied for reuse.
    ///
    /// Together with [`id`](Self::id) this tells apart two fill cycles of the
    /// same buffer.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the fixed capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the raw reservation counter. May exceed the capacity.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset.load(Ordering::SeqCst)
    }

    /// Returns the number of bytes still free. Advisory only.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.offset())
    }

    /// Returns true if nothing has been reserved since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset() == 0
    }

    /// Returns the number of writers currently inside the buffer.
    #[must_use]
    pub fn inflight(&self) -> i64 {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Returns true once the buffer has been retired and not yet reset.
    #[must_use]
    pub fn is_ready_for_flush(&self) -> bool {
        self.ready_for_flush.load(Ordering::SeqCst)
    }

    /// Reserves space for `bytes` and copies them in.
    ///
    /// Empty input is accepted with no side effect. Safe to call from any
    /// number of threads at once.
    pub fn write(&self, bytes: &[u8]) -> AppendOutcome {
        let len = bytes.len();
        if len == 0 {
            return AppendOutcome::Accepted(0);
        }

        self.inflight.fetch_add(1, Ordering::SeqCst);
        let start = self.offset.fetch_add(len, Ordering::SeqCst);

        match start.checked_add(len) {
            Some(end) if end <= self.capacity => {
                // SAFETY: `[start, end)` lies inside the region and was handed
                // out by the fetch_add above to this writer alone. The buffer
                // cannot be read or reset until `inflight` drops back, and a
                // caller's slice never aliases the region because reads only
                // happen while the buffer is sealed.
                unsafe {
                    ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.as_ptr().add(start), len);
                }
                self.inflight.fetch_sub(1, Ordering::SeqCst);
                AppendOutcome::Accepted(len)
            }
            _ => {
                if start <= self.capacity {
                    // Only the reservation straddling the capacity lands here.
                    self.filled.store(start, Ordering::SeqCst);
                }
                if self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    AppendOutcome::RejectedFullAndDrained
                } else {
                    AppendOutcome::RejectedFull
                }
            }
        }
    }

    /// Empties the buffer for reuse.
    ///
    /// The caller must guarantee that no writer is inside the buffer. A
    /// violation panics in debug builds and is logged in release builds.
    pub fn reset(&self) {
        self.lock_exclusive();
        let inflight = self.inflight();
        if inflight != 0 {
            error!(
                buffer = self.id,
                inflight, "append buffer reset while writers are still copying"
            );
        }
        debug_assert_eq!(inflight, 0, "append buffer reset with active writers");
        self.clear();
        self.unlock_exclusive();
    }

    pub(crate) fn mark_ready_for_flush(&self) {
        self.ready_for_flush.store(true, Ordering::SeqCst);
    }

    /// Makes every later reservation fail and returns the accepted length
    /// known so far.
    pub(crate) fn seal(&self) -> usize {
        let previous = self.offset.fetch_max(self.capacity + 1, Ordering::SeqCst);
        if previous <= self.capacity {
            // The seal is the first rejection of this cycle.
            self.filled.store(previous, Ordering::SeqCst);
            previous
        } else {
            self.filled.load(Ordering::SeqCst).min(self.capacity)
        }
    }

    /// Seals the buffer, waits for in-flight copies, and passes the whole
    /// region with its filled length to `f`.
    ///
    /// Bytes past the filled length are zeroed first so a reused buffer never
    /// hands stale records to its target.
    pub(crate) fn drain_into<R>(&self, then: AfterFlush, f: impl FnOnce(&[u8], usize) -> R) -> R {
        self.lock_exclusive();
        self.seal();
        spin_until(|| self.inflight.load(Ordering::SeqCst) == 0);

        let filled = self.filled.load(Ordering::SeqCst).min(self.capacity);
        // SAFETY: the buffer is sealed and drained, so no writer holds or can
        // obtain a range, and `exclusive` keeps other drains and resets out.
        // Late writers that still bump `inflight` are rejected before copying.
        let data = unsafe {
            ptr::write_bytes(self.data.as_ptr().add(filled), 0, self.capacity - filled);
            slice::from_raw_parts(self.data.as_ptr().cast_const(), self.capacity)
        };
        let result = f(data, filled);

        if then == AfterFlush::Reset {
            self.clear();
        }
        self.unlock_exclusive();
        result
    }

    fn clear(&self) {
        self.filled.store(self.capacity, Ordering::SeqCst);
        self.offset.store(0, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.ready_for_flush.store(false, Ordering::SeqCst);
    }

    fn lock_exclusive(&self) {
        spin_until(|| {
            self.exclusive
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        });
    }

    fn unlock_exclusive(&self) {
        self.exclusive.store(false, Ordering::Release);
    }
}

impl fmt::Debug for AppendBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("offset", &self.offset())
            .field("inflight", &self.inflight())
            .field("generation", &self.generation())
            .field("ready_for_flush", &self.is_ready_for_flush())
            .finish()
    }
}

/// Heap region aligned to [`BUFFER_ALIGNMENT`], zeroed on allocation.
struct AlignedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedRegion {
    fn zeroed(len: usize) -> CoreResult<Self> {
        if len == 0 {
            return Err(CoreError::invalid_config(
                "buffer capacity must be at least 1 byte",
            ));
        }
        let layout = Layout::from_size_align(len, BUFFER_ALIGNMENT)
            .map_err(|e| CoreError::invalid_config(format!("buffer of {len} bytes: {e}")))?;

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };
        Ok(Self { ptr, layout })
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `alloc_zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the region is a plain heap allocation with no thread affinity.
// `AppendBuffer` confines writers to disjoint reserved ranges and only reads
// the region once it is sealed and drained.
unsafe impl Send for AlignedRegion {}
unsafe impl Sync for AlignedRegion {}
