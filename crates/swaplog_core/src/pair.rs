//! Active/inactive buffer pair and the swap protocol.
//!
//! Each slot moves through `Idle -> Active -> ReadyForFlush -> Flushing ->
//! Idle`. Exactly one slot is active. A swap marks the active slot ready for
//! flush and makes the other slot active; producers never write into a slot
//! that is still waiting for its flush.
//!
//! Swaps are not synchronized with each other. Callers serialize them (the
//! router does so with a per-shard gate).

use crate::buffer::{AppendBuffer, AppendOutcome};
use crate::error::CoreResult;
use crate::wait::spin_until;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

/// Result of [`BufferPair::swap_blocking`].
#[derive(Debug)]
pub struct Swap {
    /// The slot that was active before the swap, now ready for flush.
    pub retired: Arc<AppendBuffer>,
    /// How many times the swap had to wait for the other slot's flush.
    pub spins: usize,
}

/// Two append buffers with one active at a time.
#[derive(Debug)]
pub struct BufferPair {
    slots: [Arc<AppendBuffer>; 2],
    active: AtomicUsize,
}

impl BufferPair {
    /// Allocates two buffers of `capacity` bytes with ids `first_id` and
    /// `first_id + 1`. Slot 0 starts active.
    ///
    /// # Errors
    ///
    /// Returns an error if either buffer cannot be allocated.
    pub fn new(capacity: usize, first_id: u32) -> CoreResult<Self> {
        Ok(Self {
            slots: [
                Arc::new(AppendBuffer::new(capacity, first_id)?),
                Arc::new(AppendBuffer::new(capacity, first_id.wrapping_add(1))?),
            ],
            active: AtomicUsize::new(0),
        })
    }

    /// Writes into the active slot.
    pub fn write(&self, bytes: &[u8]) -> AppendOutcome {
        self.active().write(bytes)
    }

    /// Index of the active slot.
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The slot producers currently write into.
    #[must_use]
    pub fn active(&self) -> &Arc<AppendBuffer> {
        &self.slots[self.active_index()]
    }

    /// The slot that is idle or waiting for its flush.
    #[must_use]
    pub fn inactive(&self) -> &Arc<AppendBuffer> {
        &self.slots[1 - self.active_index()]
    }

    /// Retires the active slot and activates the other without waiting.
    ///
    /// The caller must know the other slot is not pending flush. A violation
    /// panics in debug builds and is logged in release builds.
    pub fn swap(&self) -> Arc<AppendBuffer> {
        let current = self.active_index();
        let next = 1 - current;

        let retired = &self.slots[current];
        retired.mark_ready_for_flush();

        let pending = self.slots[next].is_ready_for_flush();
        if pending {
            error!(
                buffer = self.slots[next].id(),
                "swapped into a buffer that is still waiting for its flush"
            );
        }
        debug_assert!(!pending, "swapped into a buffer pending flush");

        self.active.store(next, Ordering::SeqCst);
        Arc::clone(retired)
    }

    /// Retires the active slot, waits until the other slot's flush has
    /// completed, then activates it.
    pub fn swap_blocking(&self) -> Swap {
        let current = self.active_index();
        let next = 1 - current;

        let retired = &self.slots[current];
        retired.mark_ready_for_flush();

        let incoming = &self.slots[next];
        let spins = spin_until(|| !incoming.is_ready_for_flush());

        self.active.store(next, Ordering::SeqCst);
        Swap {
            retired: Arc::clone(retired),
            spins,
        }
    }
}
