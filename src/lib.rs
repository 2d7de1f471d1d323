//! Lock-free ring buffer and work-stealing scheduler for coordinating a
//! fixed fleet of agent worker threads on a single host.

pub mod config;
pub mod constants;
pub mod deque;
pub mod error;
pub mod frame;
pub mod monitoring;
pub mod producer;
pub mod ring;
pub mod runtime;
pub mod topology;
pub mod worker;

pub use config::RuntimeConfig;
pub use deque::{ Deque, WorkItem };
pub use error::{ BusError, InitError, Result };
pub use frame::{ Checksum, Crc32Checksum, MessageHeader };
pub use monitoring::{ Monitor, StatisticsSnapshot };
pub use ring::RingBuffer;
pub use runtime::Runtime;
pub use topology::{ CoreClass, CorePlacement };
pub use worker::Dispatcher;

/// Crate version, re-exported for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ Crc32Checksum, FLAG_CHECKSUM_PRESENT };

    #[test]
    fn test_ring_buffer_creation() {
        let ring = RingBuffer::new(1 << 16, false, false);
        assert!(ring.is_ok());
    }

    #[test]
    fn test_end_to_end_single_frame() {
        let ring = RingBuffer::new(1 << 16, false, false).unwrap();
        let header = MessageHeader {
            magic: constants::FRAME_MAGIC,
            msg_type: 1,
            length: 5,
            timestamp: 0,
            source: 1,
            target: 0,
            flags: FLAG_CHECKSUM_PRESENT,
            checksum: 0,
            priority: 0,
        };
        let encoded = frame::encode(&header, b"hello", &Crc32Checksum).unwrap();
        let pos = ring.reserve(encoded.len()).unwrap();
        ring.commit(pos, &encoded);

        let mut claimed = Vec::new();
        assert_eq!(ring.claim_batch(10, &mut claimed), 1);

        let decoded_header = ring.read_header_at(claimed[0].linear_pos).unwrap();
        let payload = ring.read_payload_at(
            claimed[0].linear_pos + (constants::HEADER_SIZE as u64),
            decoded_header.length as usize
        );
        assert_eq!(payload, b"hello");
    }
}
