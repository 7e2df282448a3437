//! The block ring: bounded FIFO between planner and stepper.
//!
//! Capacity is a power of two so index arithmetic is a mask. The planner
//! owns `head` and fills slots; the stepper owns `tail` and latches the tail
//! slot by setting its `busy` flag, leaving the slot occupied until the block
//! retires. Mutual exclusion is a single mutex over the slot array; the
//! handful of values that must stay readable without blocking (queue depth,
//! motor positions, endstop results, the quick-stop countdown) live beside
//! the lock as atomics.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::kinematics::NUM_AXIS;
use crate::stepper::EndstopHits;

use super::block::Block;

/// Interrupts consumed by a quick stop before the engine resumes popping
/// blocks, letting the motors shed inertia.
pub(crate) const CLEANUP_TICKS: u32 = 5000;

/// Slot storage plus head/tail indices, all guarded by one lock.
#[derive(Debug)]
pub(crate) struct RingState<const CAP: usize> {
    pub blocks: [Block; CAP],
    pub head: usize,
    pub tail: usize,
    /// The stepper holds a latched copy of the tail block.
    pub executing: bool,
}

impl<const CAP: usize> RingState<CAP> {
    #[inline]
    pub fn next(i: usize) -> usize {
        (i + 1) & (CAP - 1)
    }

    #[inline]
    pub fn prev(i: usize) -> usize {
        (i + CAP - 1) & (CAP - 1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.head + CAP - self.tail) & (CAP - 1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        Self::next(self.head) == self.tail
    }
}

/// Shared hub between the two halves of the core.
#[derive(Debug)]
pub struct BlockRing<const CAP: usize> {
    state: Mutex<RingState<CAP>>,
    /// Signalled by the stepper on every tail advance.
    space: Condvar,
    /// Signalled by the stepper when the queue runs dry.
    drained: Condvar,
    queued: AtomicUsize,
    executing: AtomicBool,
    cleanup: AtomicU32,
    abort_current: AtomicBool,
    disable_request: AtomicBool,
    count_position: [AtomicI64; NUM_AXIS],
    endstop_trigsteps: [AtomicI64; 3],
    endstop_hits: AtomicU16,
    append_stalls: AtomicU32,
}

impl<const CAP: usize> BlockRing<CAP> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RingState {
                blocks: [Block::default(); CAP],
                head: 0,
                tail: 0,
                executing: false,
            }),
            space: Condvar::new(),
            drained: Condvar::new(),
            queued: AtomicUsize::new(0),
            executing: AtomicBool::new(false),
            cleanup: AtomicU32::new(0),
            abort_current: AtomicBool::new(false),
            disable_request: AtomicBool::new(false),
            count_position: Default::default(),
            endstop_trigsteps: Default::default(),
            endstop_hits: AtomicU16::new(0),
            append_stalls: AtomicU32::new(0),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RingState<CAP>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of blocks in the ring, including the one being executed.
    #[inline]
    pub fn moves_planned(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Whether any motion is queued or in flight.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.moves_planned() > 0 || self.executing.load(Ordering::SeqCst)
    }

    /// Times an append had to wait for the stepper to free a slot.
    #[inline]
    pub fn append_stalls(&self) -> u32 {
        self.append_stalls.load(Ordering::SeqCst)
    }

    /// Lock the ring, waiting until there is room for one more block.
    pub(crate) fn wait_for_space(&self) -> MutexGuard<'_, RingState<CAP>> {
        let mut guard = self.lock();
        while guard.is_full() {
            self.append_stalls.fetch_add(1, Ordering::SeqCst);
            guard = self
                .space
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        guard
    }

    /// Refresh the lock-free mirrors after mutating head/tail under the lock.
    pub(crate) fn publish(&self, state: &RingState<CAP>) {
        self.queued.store(state.len(), Ordering::SeqCst);
        self.executing.store(state.executing, Ordering::SeqCst);
    }

    /// Wake the producer after a tail advance; called with the lock held.
    pub(crate) fn notify_space(&self) {
        self.space.notify_all();
    }

    /// Wake synchronizers once the queue has drained; called with the lock
    /// held.
    pub(crate) fn notify_drained(&self) {
        self.drained.notify_all();
    }

    /// Block the caller until every buffered step has executed.
    pub fn synchronize(&self) {
        let mut guard = self.lock();
        while !guard.is_empty() || guard.executing {
            guard = self
                .drained
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drop every queued block and abort the one in flight.
    ///
    /// The stepper observes the cleanup countdown and emits no steps until it
    /// elapses. Safe to call from either context.
    pub fn quick_stop(&self) {
        self.cleanup.store(CLEANUP_TICKS, Ordering::SeqCst);
        self.abort_current.store(true, Ordering::SeqCst);
        let mut guard = self.lock();
        while !guard.is_empty() {
            let tail = guard.tail;
            guard.blocks[tail].busy = false;
            guard.tail = RingState::<CAP>::next(tail);
        }
        guard.executing = false;
        self.publish(&guard);
        self.notify_space();
        self.notify_drained();
    }

    pub(crate) fn cleanup_pending(&self) -> bool {
        let remaining = self.cleanup.load(Ordering::SeqCst);
        if remaining > 0 {
            self.cleanup.store(remaining - 1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub(crate) fn take_abort(&self) -> bool {
        self.abort_current.swap(false, Ordering::SeqCst)
    }

    /// Ask the stepper to power down all motors once the queue drains.
    pub fn request_disable(&self) {
        self.disable_request.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_disable_request(&self) -> bool {
        self.disable_request.swap(false, Ordering::SeqCst)
    }

    /// Authoritative motor position in steps, as executed.
    #[inline]
    pub fn count_position(&self, slot: usize) -> i64 {
        self.count_position[slot].load(Ordering::SeqCst)
    }

    pub(crate) fn set_count_position(&self, slot: usize, value: i64) {
        self.count_position[slot].store(value, Ordering::SeqCst);
    }

    /// Motor position of the linear axis at the last endstop trigger.
    #[inline]
    pub fn endstop_trigsteps(&self, slot: usize) -> i64 {
        self.endstop_trigsteps[slot].load(Ordering::SeqCst)
    }

    pub(crate) fn set_endstop_trigsteps(&self, slot: usize, value: i64) {
        self.endstop_trigsteps[slot].store(value, Ordering::SeqCst);
    }

    /// Endstops that have triggered since the last clear.
    #[inline]
    pub fn endstop_hits(&self) -> EndstopHits {
        EndstopHits::from_bits_truncate(self.endstop_hits.load(Ordering::SeqCst))
    }

    pub(crate) fn record_endstop_hit(&self, hits: EndstopHits) {
        self.endstop_hits.fetch_or(hits.bits(), Ordering::SeqCst);
    }

    /// Acknowledge recorded endstop hits (after homing, typically).
    pub fn clear_endstop_hits(&self) {
        self.endstop_hits.store(0, Ordering::SeqCst);
    }

    /// Snapshot of the queued blocks, oldest first. Diagnostic; the copy is
    /// consistent but stale the moment it returns.
    pub fn queued_blocks(&self) -> std::vec::Vec<Block> {
        let guard = self.lock();
        let n = guard.len();
        (0..n)
            .map(|k| guard.blocks[(guard.tail + k) & (CAP - 1)])
            .collect()
    }
}
