//! Property-based tests for the testable invariants in spec.md §8: claim
//! monotonicity and at-most-once delivery across randomly sized batches of
//! randomly sized frames.

use std::collections::HashSet;

use proptest::prelude::*;

use agentmesh::RingBuffer;
use agentmesh::frame::{ Crc32Checksum, FLAG_CHECKSUM_PRESENT, MessageHeader, encode };

fn encode_frame(source: u32, sequence: u64, payload_len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; payload_len];
    if payload_len >= 16 {
        payload[0..8].copy_from_slice(&(source as u64).to_ne_bytes());
        payload[8..16].copy_from_slice(&sequence.to_ne_bytes());
    }
    let header = MessageHeader {
        magic: agentmesh::constants::FRAME_MAGIC,
        msg_type: 1,
        length: payload.len() as u32,
        timestamp: 0,
        source,
        target: 0,
        flags: FLAG_CHECKSUM_PRESENT,
        checksum: 0,
        priority: 0,
    };
    encode(&header, &payload, &Crc32Checksum).unwrap()
}

proptest! {
    /// Claimed `linear_pos` values are strictly increasing, and every
    /// committed frame is claimed exactly once, for any sequence of
    /// payload sizes that fits within the ring without ever hitting `Full`.
    #[test]
    fn claim_is_monotonic_and_lossless(payload_lens in proptest::collection::vec(0usize..200, 1..64)) {
        let ring = RingBuffer::new(1 << 20, false, false).unwrap();

        let mut committed = 0usize;
        for (seq, &len) in payload_lens.iter().enumerate() {
            let bytes = encode_frame(0, seq as u64, len);
            let pos = ring.reserve(bytes.len()).unwrap();
            ring.commit(pos, &bytes);
            committed += 1;
        }

        let mut claimed = Vec::new();
        loop {
            let mut batch = Vec::new();
            let n = ring.claim_batch(16, &mut batch);
            if n == 0 {
                break;
            }
            claimed.extend(batch);
        }

        prop_assert_eq!(claimed.len(), committed);
        for pair in claimed.windows(2) {
            prop_assert!(pair[1].linear_pos > pair[0].linear_pos);
        }

        let mut seen = HashSet::new();
        for item in &claimed {
            prop_assert!(seen.insert(item.linear_pos), "linear_pos claimed twice: {}", item.linear_pos);
        }
    }

    /// Every claimed byte range is disjoint from every other: no two
    /// claimed frames can overlap in the ring regardless of claim batch
    /// size used to drain them.
    #[test]
    fn claimed_frames_never_overlap(
        payload_lens in proptest::collection::vec(0usize..200, 1..64),
        batch_size in 1usize..8,
    ) {
        let ring = RingBuffer::new(1 << 20, false, false).unwrap();

        for (seq, &len) in payload_lens.iter().enumerate() {
            let bytes = encode_frame(0, seq as u64, len);
            let pos = ring.reserve(bytes.len()).unwrap();
            ring.commit(pos, &bytes);
        }

        let mut claimed = Vec::new();
        loop {
            let mut batch = Vec::new();
            let n = ring.claim_batch(batch_size, &mut batch);
            if n == 0 {
                break;
            }
            claimed.extend(batch);
        }

        for pair in claimed.windows(2) {
            let end_of_first = pair[0].linear_pos + (pair[0].size as u64);
            prop_assert!(end_of_first <= pair[1].linear_pos);
        }
    }
}
