//! Tuning constants shared across the ring buffer, deque, and scheduler.

/// Magic bytes identifying a valid frame header ("AGEN"), used to
/// resynchronize the claim cursor after a corrupted header is observed.
pub const FRAME_MAGIC: u32 = 0x4147454e;

/// Fixed size of a [`crate::frame::MessageHeader`] in bytes: the sum of its
/// nine fields (magic, type, length, timestamp, source, target, flags,
/// checksum, priority). See DESIGN.md for the field-by-field accounting.
pub const HEADER_SIZE: usize = 40;

/// Maximum payload length accepted by a single frame.
pub const MAX_PAYLOAD_LEN: u32 = 2048;

/// Cache line size for alignment optimizations (64 bytes on most modern CPUs).
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum number of frames a producer may stage in one batch.
pub const MAX_PRODUCER_BATCH: usize = 64;

/// Maximum number of frames a worker may claim in one batch.
pub const MAX_WORKER_BATCH: usize = 64;

/// Default ring buffer capacity in bytes (256 MiB).
pub const DEFAULT_RING_CAPACITY_BYTES: usize = 256 * 1024 * 1024;

/// Default per-worker deque capacity (slots), must be a power of two.
pub const DEFAULT_DEQUE_CAPACITY: usize = 256;

/// Huge page size (2 MiB on most Linux systems).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Regular page size used for the portable allocation fallback.
pub const PAGE_SIZE: usize = 4096;

/// Default number of performance-class cores when unset, capped by the
/// number of configured workers: `min(C, 12)` per spec §4.F.
pub const DEFAULT_PERFORMANCE_CORE_CAP: usize = 12;

/// Number of iterations a producer runs before yielding once, to avoid
/// starving other threads during a sustained burst.
pub const PRODUCER_YIELD_INTERVAL: u64 = 1000;

/// Maximum number of producers accepted by configuration.
pub const MAX_PRODUCERS: usize = 16;

/// Maximum number of workers accepted by configuration.
pub const MAX_WORKERS: usize = 32;

/// Validate internal consistency of the constants above.
pub fn validate_constants() -> Result<(), &'static str> {
    if !DEFAULT_DEQUE_CAPACITY.is_power_of_two() {
        return Err("DEFAULT_DEQUE_CAPACITY must be a power of 2");
    }
    if !DEFAULT_RING_CAPACITY_BYTES.is_power_of_two() {
        return Err("DEFAULT_RING_CAPACITY_BYTES must be a power of 2");
    }
    if HEADER_SIZE == 0 {
        return Err("HEADER_SIZE must be greater than 0");
    }
    if MAX_PAYLOAD_LEN == 0 {
        return Err("MAX_PAYLOAD_LEN must be greater than 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validation() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn test_ring_capacity_is_power_of_two() {
        assert!(DEFAULT_RING_CAPACITY_BYTES.is_power_of_two());
        assert!(DEFAULT_DEQUE_CAPACITY.is_power_of_two());
    }
}
