//! Per-worker Chase-Lev work-stealing deque.
//!
//! No teacher module implements this (the Flux crate's `producer.rs` /
//! `consumer.rs` are empty stubs), so the orderings below are taken
//! directly from the classic Chase-Lev algorithm rather than adapted from
//! existing code; the surrounding style (padded atomics, `Result`-free hot
//! path, `#[cfg(test)]` placement) follows the ring buffer module next to
//! it. These orderings are load-bearing: weakening or over-strengthening
//! them changes the algorithm's correctness or its throughput profile.

use std::cell::UnsafeCell;
use std::sync::atomic::{ AtomicI64, AtomicUsize, Ordering };

use crossbeam::utils::CachePadded;

/// A claimed-but-not-yet-processed frame, handed from the ring buffer's
/// `claim_batch` into a worker's deque. 24 bytes: two `u64` offsets plus
/// two `u32` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Offset into the ring's backing buffer (`linear_pos & mask`).
    pub ring_offset: u64,
    /// Monotonic linear position, used to advance `read_pos` once
    /// processed.
    pub linear_pos: u64,
    /// Frame size in bytes (header + payload).
    pub size: u32,
    /// Opaque routing tag copied from the frame header.
    pub msg_type: u32,
}

/// Single-owner, many-thief lock-free deque.
///
/// `push`/`pop` are only sound when called from the owning worker thread.
/// `steal` is sound from any thread. Capacity is fixed at construction and
/// is not resized; a full deque causes `push` to drop the item silently,
/// exactly as the spec's sizing guidance (deque capacity should be at
/// least the worker batch size) is meant to make impossible in practice.
pub struct Deque {
    buffer: UnsafeCell<Box<[CachePadded<Option<WorkItem>>]>>,
    mask: usize,
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    len_hint: CachePadded<AtomicUsize>,
}

unsafe impl Send for Deque {}
unsafe impl Sync for Deque {}

impl Deque {
    /// Create a deque with `capacity` slots (must be a power of two).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "deque capacity must be a power of two");

        let buffer = (0..capacity).map(|_| CachePadded::new(None)).collect::<Vec<_>>().into_boxed_slice();

        Self {
            buffer: UnsafeCell::new(buffer),
            mask: capacity - 1,
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            len_hint: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Approximate occupancy, for the statistics snapshot. Not
    /// linearizable with concurrent `steal`s.
    pub fn len_hint(&self) -> usize {
        self.len_hint.load(Ordering::Relaxed)
    }

    /// Owner-only. Push `item` at the bottom; silently dropped if the
    /// deque is already at capacity.
    pub fn push(&self, item: WorkItem) {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);

        if bottom - top >= (self.mask as i64) + 1 {
            return;
        }

        let index = (bottom as usize) & self.mask;
        unsafe {
            let slot = &mut (*self.buffer.get())[index];
            *slot = CachePadded::new(Some(item));
        }

        self.bottom.store(bottom + 1, Ordering::Release);
        self.len_hint.fetch_add(1, Ordering::Relaxed);
    }

    /// Owner-only. Pop the most recently pushed item.
    pub fn pop(&self) -> Option<WorkItem> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(bottom, Ordering::Relaxed);

        std::sync::atomic::fence(Ordering::SeqCst);

        let top = self.top.load(Ordering::Relaxed);

        if top > bottom {
            // Deque was already empty; restore bottom.
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }

        let index = (bottom as usize) & self.mask;
        let item = unsafe { (*self.buffer.get())[index].take() };

        if top == bottom {
            // Last element: race with thieves via CAS on top.
            let won = self.top
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }

        if item.is_some() {
            self.len_hint.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    /// Any-thread. Steal the oldest item from the top of the deque.
    pub fn steal(&self) -> Option<WorkItem> {
        let top = self.top.load(Ordering::Acquire);
        std::sync::atomic::fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if top >= bottom {
            return None;
        }

        let index = (top as usize) & self.mask;
        let item = unsafe { (*self.buffer.get())[index].clone_inner() };

        if
            self.top.compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed).is_ok()
        {
            self.len_hint.fetch_sub(1, Ordering::Relaxed);
            item
        } else {
            None
        }
    }
}

trait ClonedInner {
    fn clone_inner(&self) -> Option<WorkItem>;
}

impl ClonedInner for CachePadded<Option<WorkItem>> {
    fn clone_inner(&self) -> Option<WorkItem> {
        // Work items are POD; reading a slot concurrently with a winning
        // steal's CAS is benign, and a losing steal's read is simply
        // discarded (spec §4.C: "the stale-item read on a lost steal race
        // is benign, the consumed position is never reused").
        **self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u64) -> WorkItem {
        WorkItem { ring_offset: n, linear_pos: n, size: 8, msg_type: 0 }
    }

    #[test]
    fn test_push_pop_lifo_order() {
        let deque = Deque::new(8);
        deque.push(item(1));
        deque.push(item(2));
        deque.push(item(3));

        assert_eq!(deque.pop(), Some(item(3)));
        assert_eq!(deque.pop(), Some(item(2)));
        assert_eq!(deque.pop(), Some(item(1)));
        assert_eq!(deque.pop(), None);
    }

    #[test]
    fn test_steal_fifo_order() {
        let deque = Deque::new(8);
        deque.push(item(1));
        deque.push(item(2));
        deque.push(item(3));

        assert_eq!(deque.steal(), Some(item(1)));
        assert_eq!(deque.steal(), Some(item(2)));
        assert_eq!(deque.steal(), Some(item(3)));
        assert_eq!(deque.steal(), None);
    }

    #[test]
    fn test_pop_and_steal_do_not_double_deliver() {
        let deque = Deque::new(8);
        for n in 0..4 {
            deque.push(item(n));
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(i) = deque.pop().or_else(|| deque.steal()) {
            assert!(seen.insert(i.linear_pos));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_push_beyond_capacity_is_dropped_silently() {
        let deque = Deque::new(2);
        deque.push(item(1));
        deque.push(item(2));
        deque.push(item(3));

        let mut count = 0;
        while deque.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_concurrent_steal_is_at_most_once() {
        use std::sync::Arc;
        use std::thread;

        let deque = Arc::new(Deque::new(256));
        for n in 0..200u64 {
            deque.push(item(n));
        }

        let mut handles = Vec::new();
        let collected = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for _ in 0..4 {
            let deque = Arc::clone(&deque);
            let collected = Arc::clone(&collected);
            handles.push(
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while let Some(i) = deque.steal() {
                        local.push(i.linear_pos);
                    }
                    collected.lock().extend(local);
                })
            );
        }

        while let Some(i) = deque.pop() {
            collected.lock().push(i.linear_pos);
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut all = collected.lock().clone();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "every item must be delivered at most once");
    }
}
