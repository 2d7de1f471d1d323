//! Power-of-two byte-addressed ring buffer: the reserve/commit producer
//! protocol and the atomic claim_batch/advance_read consumer protocol.
//!
//! Counters (`reserved_pos`, `write_pos`, `claim_pos`, `read_pos`) are
//! monotonic and never wrap; only `counter & mask` addresses the backing
//! buffer. Each lives on its own cache line via `CachePadded` to keep
//! producer-side and consumer-side counters from false-sharing.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod portable;

use std::sync::atomic::{ AtomicU64, Ordering };

use crossbeam::utils::CachePadded;

use crate::constants::HEADER_SIZE;
use crate::deque::WorkItem;
use crate::error::{ BusError, Result };
use crate::frame::{ self, MessageHeader };

#[cfg(target_os = "linux")]
use linux::allocate as allocate_backing;
#[cfg(not(target_os = "linux"))]
use portable::allocate as allocate_backing;

/// Backing memory for a [`RingBuffer`], owning either an `mmap`'d region
/// (Linux) or a page-aligned heap allocation (portable fallback).
pub(crate) struct RingAllocation {
    ptr: *mut u8,
    len: usize,
    drop_fn: unsafe fn(*mut u8, usize),
}

unsafe impl Send for RingAllocation {}
unsafe impl Sync for RingAllocation {}

impl RingAllocation {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for RingAllocation {
    fn drop(&mut self) {
        unsafe {
            (self.drop_fn)(self.ptr, self.len);
        }
    }
}

/// Advisory, relaxed-ordered counters exposed through a statistics
/// snapshot. None of these participate in the ring's correctness protocol.
/// Point-in-time read of [`RingBuffer::stats_snapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RingStatsSnapshot {
    pub messages: u64,
    pub bytes: u64,
    pub dropped_full: u64,
    pub corrupt_frames: u64,
}

#[derive(Default)]
pub(crate) struct RingStats {
    pub messages: CachePadded<AtomicU64>,
    pub bytes: CachePadded<AtomicU64>,
    pub dropped_full: CachePadded<AtomicU64>,
    pub corrupt_frames: CachePadded<AtomicU64>,
}

/// The lock-free multi-producer / multi-consumer ring buffer.
///
/// Safety: `buffer` is shared mutable memory. Producers are only permitted
/// to write into a span they have exclusively reserved via [`reserve`], and
/// publication order is enforced by [`commit`]'s spin-wait on `write_pos`.
/// Consumers only read `[read_pos, write_pos)`, a span guaranteed to be
/// fully written. These invariants, not the type system, are what make
/// concurrent access to the raw buffer sound.
pub struct RingBuffer {
    allocation: RingAllocation,
    mask: usize,
    capacity: usize,
    reserved_pos: CachePadded<AtomicU64>,
    write_pos: CachePadded<AtomicU64>,
    claim_pos: CachePadded<AtomicU64>,
    read_pos: CachePadded<AtomicU64>,
    stats: RingStats,
}

impl RingBuffer {
    /// Allocate a ring of `capacity_bytes` (must be a power of two),
    /// optionally huge-page backed and `mlock`ed.
    pub fn new(capacity_bytes: usize, use_huge_pages: bool, lock_memory: bool) -> Result<Self> {
        if !capacity_bytes.is_power_of_two() {
            return Err(BusError::config("ring capacity must be a power of two"));
        }

        let allocation = allocate_backing(capacity_bytes, use_huge_pages, lock_memory)?;

        Ok(Self {
            allocation,
            mask: capacity_bytes - 1,
            capacity: capacity_bytes,
            reserved_pos: CachePadded::new(AtomicU64::new(0)),
            write_pos: CachePadded::new(AtomicU64::new(0)),
            claim_pos: CachePadded::new(AtomicU64::new(0)),
            read_pos: CachePadded::new(AtomicU64::new(0)),
            stats: RingStats::default(),
        })
    }

    /// Total backing capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current `write_pos - read_pos` backlog, for the statistics snapshot.
    pub fn backlog(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire).saturating_sub(self.read_pos.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Advisory counters: `(total messages, total bytes, dropped_full,
    /// corrupt_frames)`. Relaxed ordering; may be torn mid-flight but
    /// converges once producers and workers quiesce.
    pub fn stats_snapshot(&self) -> RingStatsSnapshot {
        RingStatsSnapshot {
            messages: self.stats.messages.load(Ordering::Relaxed),
            bytes: self.stats.bytes.load(Ordering::Relaxed),
            dropped_full: self.stats.dropped_full.load(Ordering::Relaxed),
            corrupt_frames: self.stats.corrupt_frames.load(Ordering::Relaxed),
        }
    }

    /// Reserve `size` contiguous bytes for a producer. Returns the
    /// pre-advance linear position on success.
    pub fn reserve(&self, size: usize) -> Result<u64> {
        let mut current = self.reserved_pos.load(Ordering::Relaxed);
        loop {
            let read = self.read_pos.load(Ordering::Acquire);
            if current + (size as u64) - read > (self.capacity as u64) {
                self.stats.dropped_full.fetch_add(1, Ordering::Relaxed);
                return Err(BusError::Full);
            }

            match
                self.reserved_pos.compare_exchange_weak(
                    current,
                    current + (size as u64),
                    Ordering::AcqRel,
                    Ordering::Relaxed
                )
            {
                Ok(_) => {
                    return Ok(current);
                }
                Err(observed) => {
                    current = observed;
                }
            }
        }
    }

    /// Copy `bytes` into the reserved span starting at `linear_pos`,
    /// handling wrap-around, then publish by spin-waiting for
    /// `write_pos == linear_pos` and releasing the new `write_pos`.
    pub fn commit(&self, linear_pos: u64, bytes: &[u8]) {
        self.write_span(linear_pos, bytes);

        while self.write_pos.load(Ordering::Acquire) != linear_pos {
            std::hint::spin_loop();
        }

        self.write_pos.store(linear_pos + (bytes.len() as u64), Ordering::Release);
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
    }

    /// Claim up to `max_count` frames published since the last claim,
    /// appending them to `out`. Returns the number of frames claimed.
    pub fn claim_batch(&self, max_count: usize, out: &mut Vec<WorkItem>) -> usize {
        let limit = self.write_pos.load(Ordering::Acquire);
        let mut claimed = 0;
        let mut current = self.claim_pos.load(Ordering::Relaxed);

        while claimed < max_count {
            if current >= limit {
                break;
            }

            let header = match self.read_header_at(current) {
                Ok(header) => header,
                Err(_) => {
                    // Corrupt header: resync by a fixed one-header-width skip.
                    let resynced = current + (HEADER_SIZE as u64);
                    match
                        self.claim_pos.compare_exchange(
                            current,
                            resynced,
                            Ordering::AcqRel,
                            Ordering::Relaxed
                        )
                    {
                        Ok(_) => {
                            self.stats.corrupt_frames.fetch_add(1, Ordering::Relaxed);
                            current = resynced;
                        }
                        Err(observed) => {
                            current = observed;
                        }
                    }
                    continue;
                }
            };

            let frame_size = (HEADER_SIZE as u64) + (header.length as u64);
            if current + frame_size > limit {
                break;
            }

            let next = current + frame_size;
            match
                self.claim_pos.compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    out.push(WorkItem {
                        ring_offset: current & (self.mask as u64),
                        linear_pos: current,
                        size: frame_size as u32,
                        msg_type: header.msg_type,
                    });
                    claimed += 1;
                    current = next;
                }
                Err(observed) => {
                    current = observed;
                }
            }
        }

        claimed
    }

    /// Release bytes `[read_pos, new_linear_pos)` back to producers. Legal
    /// to call with a value lower than the current `read_pos` (no-op).
    pub fn advance_read(&self, new_linear_pos: u64) {
        let mut current = self.read_pos.load(Ordering::Relaxed);
        loop {
            if current >= new_linear_pos {
                return;
            }
            match
                self.read_pos.compare_exchange_weak(
                    current,
                    new_linear_pos,
                    Ordering::Release,
                    Ordering::Relaxed
                )
            {
                Ok(_) => {
                    return;
                }
                Err(observed) => {
                    current = observed;
                }
            }
        }
    }

    /// Decode the header at `linear_pos`, materializing it in full even if
    /// it straddles the buffer's wrap boundary.
    pub fn read_header_at(&self, linear_pos: u64) -> Result<MessageHeader> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.read_span(linear_pos, &mut header_bytes);
        frame::decode_header(&header_bytes)
    }

    /// Copy `len` payload bytes starting at `linear_pos` into a fresh
    /// `Vec<u8>`, handling wrap-around.
    pub fn read_payload_at(&self, linear_pos: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_span(linear_pos, &mut out);
        out
    }

    pub(crate) fn write_span(&self, linear_pos: u64, bytes: &[u8]) {
        let start = (linear_pos as usize) & self.mask;
        let base = self.allocation.as_ptr();
        let len = bytes.len();

        unsafe {
            if start + len <= self.capacity {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), len);
            } else {
                let first = self.capacity - start;
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), first);
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, len - first);
            }
        }
    }

    fn read_span(&self, linear_pos: u64, out: &mut [u8]) {
        let start = (linear_pos as usize) & self.mask;
        let base = self.allocation.as_ptr();
        let len = out.len();

        unsafe {
            if start + len <= self.capacity {
                std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), len);
            } else {
                let first = self.capacity - start;
                std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), len - first);
            }
        }
    }
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ Crc32Checksum, FLAG_CHECKSUM_PRESENT, MessageHeader };

    fn test_ring(capacity: usize) -> RingBuffer {
        RingBuffer::new(capacity, false, false).unwrap()
    }

    fn encode_sample(msg_type: u32, payload: &[u8]) -> Vec<u8> {
        let header = MessageHeader {
            magic: crate::constants::FRAME_MAGIC,
            msg_type,
            length: payload.len() as u32,
            timestamp: 0,
            source: 1,
            target: 0,
            flags: FLAG_CHECKSUM_PRESENT,
            checksum: 0,
            priority: 0,
        };
        frame::encode(&header, payload, &Crc32Checksum).unwrap()
    }

    #[test]
    fn test_reserve_commit_claim_roundtrip() {
        let ring = test_ring(1 << 16);
        let bytes = encode_sample(1, b"hello");
        let pos = ring.reserve(bytes.len()).unwrap();
        ring.commit(pos, &bytes);

        let mut out = Vec::new();
        let claimed = ring.claim_batch(10, &mut out);
        assert_eq!(claimed, 1);
        assert_eq!(out[0].linear_pos, 0);
        assert_eq!(out[0].size as usize, bytes.len());
    }

    #[test]
    fn test_reserve_fails_when_full() {
        let ring = test_ring(128);
        let big = vec![0u8; 200];
        assert!(matches!(ring.reserve(big.len()), Err(BusError::Full)));
    }

    #[test]
    fn test_claim_is_monotonic_and_exhausts() {
        let ring = test_ring(1 << 16);
        for i in 0..5u32 {
            let bytes = encode_sample(i, b"x");
            let pos = ring.reserve(bytes.len()).unwrap();
            ring.commit(pos, &bytes);
        }

        let mut out = Vec::new();
        let claimed = ring.claim_batch(100, &mut out);
        assert_eq!(claimed, 5);
        for w in out.windows(2) {
            assert!(w[1].linear_pos > w[0].linear_pos);
        }

        let mut out2 = Vec::new();
        assert_eq!(ring.claim_batch(100, &mut out2), 0);
    }

    #[test]
    fn test_advance_read_frees_capacity() {
        let ring = test_ring(256);
        let bytes = encode_sample(1, &[0u8; 100]);
        let pos = ring.reserve(bytes.len()).unwrap();
        ring.commit(pos, &bytes);

        assert!(ring.reserve(bytes.len()).is_err());

        ring.advance_read(pos + (bytes.len() as u64));
        assert!(ring.reserve(bytes.len()).is_ok());
    }

    #[test]
    fn test_claim_resyncs_past_corrupt_header() {
        let ring = test_ring(1 << 16);
        let good1 = encode_sample(1, b"a");
        let good2 = encode_sample(2, b"b");

        let pos1 = ring.reserve(good1.len()).unwrap();
        ring.commit(pos1, &good1);
        let pos2 = ring.reserve(good2.len()).unwrap();
        ring.commit(pos2, &good2);

        // Corrupt the magic of the first frame in place.
        ring.write_span(pos1, &[0xff, 0xff, 0xff, 0xff]);

        let mut out = Vec::new();
        let claimed = ring.claim_batch(10, &mut out);
        assert_eq!(claimed, 1);
        assert_eq!(ring.stats.corrupt_frames.load(Ordering::Relaxed), 1);
    }
}
