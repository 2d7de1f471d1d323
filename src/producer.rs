//! Producer loop: batch-construct frames, reserve a contiguous span, copy,
//! publish in sequence order.
//!
//! The teacher's own `Producer` is an empty marker struct; this is built
//! directly from the reserve/commit contract in the ring buffer module,
//! following the same pause-hint-and-retry discipline that module
//! documents for `Full`.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::time::Instant;

use once_cell::sync::Lazy;
use tracing::{ debug_span, warn };

use crate::constants::{ FRAME_MAGIC, MAX_PRODUCER_BATCH, PRODUCER_YIELD_INTERVAL };
use crate::error::{ BusError, Result };
use crate::frame::{ Checksum, FLAG_CHECKSUM_PRESENT, MessageHeader, encode };
use crate::ring::RingBuffer;

/// Fixed reference point captured at first use; every `timestamp` field is
/// nanoseconds elapsed since this instant, so the field is monotonic for the
/// life of the process even across NTP/wall-clock adjustments — unlike
/// `SystemTime`, `Instant` is guaranteed non-decreasing on this platform.
static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// A single staged frame awaiting reservation and commit.
struct StagedFrame {
    bytes: Vec<u8>,
}

/// One producer thread's state: identity, pinned core, run flag, and a
/// staging buffer of up to [`MAX_PRODUCER_BATCH`] frames.
pub struct ProducerState {
    pub producer_id: u32,
    next_sequence: AtomicU64,
    batch: Vec<StagedFrame>,
}

impl ProducerState {
    pub fn new(producer_id: u32) -> Self {
        Self {
            producer_id,
            next_sequence: AtomicU64::new(0),
            batch: Vec::with_capacity(MAX_PRODUCER_BATCH),
        }
    }
}

/// A single payload to be enqueued: either synthetic load-test data or a
/// host-supplied message.
pub enum Payload<'a> {
    Synthetic {
        size: usize,
    },
    Bytes(&'a [u8]),
}

fn now_ns() -> u64 {
    CLOCK_ORIGIN.elapsed().as_nanos() as u64
}

/// Encode and append `payload` to `state`'s staging batch, ready for
/// [`flush_batch`].
fn stage(
    state: &mut ProducerState,
    msg_type: u32,
    priority: u32,
    payload: Payload<'_>,
    checksum: &dyn Checksum
) -> Result<()> {
    let sequence = state.next_sequence.fetch_add(1, Ordering::Relaxed);

    // Synthetic payloads carry their (source, sequence) pair in the first
    // 16 bytes so load-test scenarios can identify frames without a
    // separate side channel; `Payload::Bytes` skips this entirely.
    let bytes: Vec<u8> = match payload {
        Payload::Synthetic { size } => {
            let mut buf = vec![0xabu8; size.max(16)];
            buf[0..8].copy_from_slice(&(state.producer_id as u64).to_ne_bytes());
            buf[8..16].copy_from_slice(&sequence.to_ne_bytes());
            buf
        }
        Payload::Bytes(b) => b.to_vec(),
    };

    let header = MessageHeader {
        magic: FRAME_MAGIC,
        msg_type,
        length: bytes.len() as u32,
        timestamp: now_ns(),
        source: state.producer_id,
        target: 0,
        flags: FLAG_CHECKSUM_PRESENT,
        checksum: 0,
        priority,
    };

    let encoded = encode(&header, &bytes, checksum)?;
    state.batch.push(StagedFrame { bytes: encoded });
    Ok(())
}

/// Reserve and commit every staged frame in `state.batch`, in order,
/// clearing the batch as it goes. Backs off with a CPU pause hint on
/// `Full` and retries indefinitely until `running` clears.
fn flush_batch(state: &mut ProducerState, ring: &RingBuffer, running: &AtomicBool) {
    for staged in state.batch.drain(..) {
        loop {
            match ring.reserve(staged.bytes.len()) {
                Ok(linear_pos) => {
                    ring.commit(linear_pos, &staged.bytes);
                    break;
                }
                Err(BusError::Full) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    std::hint::spin_loop();
                }
                Err(other) => {
                    warn!(error = %other, "producer reserve failed with a non-Full error");
                    break;
                }
            }
        }
    }
}

/// Run a producer's main loop until `running` clears: populate up to
/// `batch_size` synthetic frames, flush them, and periodically yield.
///
/// `payload_size` is the synthetic payload size used for load-test mode;
/// real deployments call [`enqueue_one`] instead of running this loop.
pub fn run_producer_loop(
    producer_id: u32,
    ring: &RingBuffer,
    running: Arc<AtomicBool>,
    batch_size: usize,
    payload_size: usize,
    checksum: &dyn Checksum
) {
    let _span = debug_span!("producer", id = producer_id).entered();
    let mut state = ProducerState::new(producer_id);
    let mut iterations: u64 = 0;

    while running.load(Ordering::Relaxed) {
        for _ in 0..batch_size {
            if
                stage(&mut state, 0, 0, Payload::Synthetic { size: payload_size }, checksum).is_err()
            {
                break;
            }
        }

        flush_batch(&mut state, ring, &running);

        iterations += 1;
        if iterations % PRODUCER_YIELD_INTERVAL == 0 {
            std::thread::yield_now();
        }
    }

    // Flush any partial batch staged before the run flag cleared.
    flush_batch(&mut state, ring, &running);
}

/// Encode and enqueue a single host-supplied message (the `enqueue`
/// external-interface entry point). Blocks only on the same pause-and-retry
/// discipline the producer loop uses; callers that cannot tolerate the
/// retry should check `Full` themselves via `ring.reserve`.
pub fn enqueue_one(
    ring: &RingBuffer,
    source: u32,
    msg_type: u32,
    payload: &[u8],
    priority: u32,
    checksum: &dyn Checksum
) -> Result<()> {
    let header = MessageHeader {
        magic: FRAME_MAGIC,
        msg_type,
        length: payload.len() as u32,
        timestamp: now_ns(),
        source,
        target: 0,
        flags: FLAG_CHECKSUM_PRESENT,
        checksum: 0,
        priority,
    };

    let encoded = encode(&header, payload, checksum)?;
    let linear_pos = ring.reserve(encoded.len())?;
    ring.commit(linear_pos, &encoded);
    Ok(())
}
