//! Worker main loop: local pop, claim from the ring, steal from peers,
//! idle. Dispatch is delegated to a [`Dispatcher`] chosen by the worker's
//! [`CoreClass`].
//!
//! The teacher's `Consumer` is an empty marker struct; this loop is built
//! directly from the ring buffer and deque contracts those modules expose.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Instant;

use rand::Rng;
use tracing::{ debug_span, warn };

use crate::constants::HEADER_SIZE;
use crate::deque::{ Deque, WorkItem };
use crate::frame::{ Checksum, verify };
use crate::monitoring::Monitor;
use crate::ring::RingBuffer;
use crate::topology::CoreClass;

/// The host-supplied callback invoked once per delivered message. Called on
/// the worker thread; must not block on the ring.
pub trait Dispatcher: Send + Sync {
    /// Path taken for messages processed by a performance-class worker.
    fn dispatch_performance(&self, msg_type: u32, payload: &[u8]);
    /// Path taken for messages processed by an efficiency-class worker.
    /// Must be functionally equivalent to `dispatch_performance`; the
    /// difference is instruction-mix, not semantics.
    fn dispatch_efficiency(&self, msg_type: u32, payload: &[u8]);
}

/// A worker thread's identity and shared references for its main loop.
pub struct WorkerState {
    pub worker_id: usize,
    pub class: CoreClass,
    pub deque: Deque,
}

impl WorkerState {
    pub fn new(worker_id: usize, class: CoreClass, deque_capacity: usize) -> Self {
        Self { worker_id, class, deque: Deque::new(deque_capacity) }
    }
}

fn process_item(
    worker: &WorkerState,
    ring: &RingBuffer,
    item: WorkItem,
    dispatcher: &dyn Dispatcher,
    checksum: &dyn Checksum,
    monitor: &Monitor
) {
    let started = Instant::now();

    let header = match ring.read_header_at(item.linear_pos) {
        Ok(header) => header,
        Err(_) => {
            // Header was already validated by claim_batch; a failure here
            // would indicate a logic error, not a corrupt stream.
            return;
        }
    };

    let payload_pos = item.linear_pos + (HEADER_SIZE as u64);
    let payload = ring.read_payload_at(payload_pos, header.length as usize);

    if verify(&header, &payload, checksum).is_err() {
        monitor.record_checksum_drop(header.priority);
        ring.advance_read(item.linear_pos + (item.size as u64));
        return;
    }

    match worker.class {
        CoreClass::Performance => dispatcher.dispatch_performance(header.msg_type, &payload),
        CoreClass::Efficiency => dispatcher.dispatch_efficiency(header.msg_type, &payload),
    }

    ring.advance_read(item.linear_pos + (item.size as u64));
    monitor.counters(worker.worker_id).processed.fetch_add(1, Ordering::Relaxed);
    monitor.record_processing_latency(worker.worker_id, started.elapsed().as_nanos() as u64);
}

/// Run a worker's main loop until `running` clears.
///
/// `peers` is every worker's deque other than `worker`'s own, used for
/// stealing; `worker_batch` bounds how many frames are claimed from the
/// ring per empty-deque attempt.
pub fn run_worker_loop(
    worker: &WorkerState,
    ring: &RingBuffer,
    peers: &[&Deque],
    dispatcher: &dyn Dispatcher,
    checksum: &dyn Checksum,
    monitor: &Monitor,
    running: Arc<AtomicBool>,
    worker_batch: usize,
    drain_on_shutdown: bool
) {
    let _span = debug_span!("worker", id = worker.worker_id).entered();
    let mut claim_buf = Vec::with_capacity(worker_batch);
    let mut rng = rand::thread_rng();

    while running.load(Ordering::Relaxed) {
        if let Some(item) = worker.deque.pop() {
            process_item(worker, ring, item, dispatcher, checksum, monitor);
            continue;
        }

        claim_buf.clear();
        let claimed = ring.claim_batch(worker_batch, &mut claim_buf);
        if claimed > 0 {
            let mut iter = claim_buf.drain(..);
            if let Some(first) = iter.next() {
                process_item(worker, ring, first, dispatcher, checksum, monitor);
            }
            for rest in iter {
                worker.deque.push(rest);
            }
            continue;
        }

        if !peers.is_empty() {
            monitor.counters(worker.worker_id).steal_attempts.fetch_add(1, Ordering::Relaxed);
            let peer_index = rng.gen_range(0..peers.len());
            if let Some(item) = peers[peer_index].steal() {
                monitor.counters(worker.worker_id).stolen.fetch_add(1, Ordering::Relaxed);
                process_item(worker, ring, item, dispatcher, checksum, monitor);
                continue;
            }
        }

        monitor.counters(worker.worker_id).idle_cycles.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }

    if drain_on_shutdown {
        if let Err(error) = drain_local_deque(worker, ring, dispatcher, checksum, monitor) {
            warn!(worker_id = worker.worker_id, %error, "error draining local deque on shutdown");
        }
    }
}

/// Process every item remaining in this worker's local deque. Used by an
/// orderly shutdown when `drain_on_shutdown` is set; never touches the
/// ring itself (in-flight ring frames may be dropped on shutdown, per the
/// runtime's configuration choice).
fn drain_local_deque(
    worker: &WorkerState,
    ring: &RingBuffer,
    dispatcher: &dyn Dispatcher,
    checksum: &dyn Checksum,
    monitor: &Monitor
) -> Result<(), &'static str> {
    while let Some(item) = worker.deque.pop() {
        process_item(worker, ring, item, dispatcher, checksum, monitor);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Crc32Checksum;
    use crate::producer::enqueue_one;
    use std::sync::atomic::AtomicUsize;

    struct CountingDispatcher {
        performance_hits: AtomicUsize,
        efficiency_hits: AtomicUsize,
    }

    impl Dispatcher for CountingDispatcher {
        fn dispatch_performance(&self, _msg_type: u32, _payload: &[u8]) {
            self.performance_hits.fetch_add(1, Ordering::Relaxed);
        }
        fn dispatch_efficiency(&self, _msg_type: u32, _payload: &[u8]) {
            self.efficiency_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_process_item_dispatches_by_class() {
        let ring = RingBuffer::new(1 << 16, false, false).unwrap();
        enqueue_one(&ring, 1, 9, b"hello", 0, &Crc32Checksum).unwrap();

        let mut claimed = Vec::new();
        ring.claim_batch(1, &mut claimed);
        let item = claimed[0];

        let worker = WorkerState::new(0, CoreClass::Performance, 16);
        let dispatcher = CountingDispatcher {
            performance_hits: AtomicUsize::new(0),
            efficiency_hits: AtomicUsize::new(0),
        };
        let monitor = Monitor::new(1);

        process_item(&worker, &ring, item, &dispatcher, &Crc32Checksum, &monitor);

        assert_eq!(dispatcher.performance_hits.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.counters(0).processed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_process_item_drops_on_checksum_mismatch() {
        let ring = RingBuffer::new(1 << 16, false, false).unwrap();
        enqueue_one(&ring, 1, 9, b"hello", 1, &Crc32Checksum).unwrap();

        let mut claimed = Vec::new();
        ring.claim_batch(1, &mut claimed);
        let item = claimed[0];

        // Corrupt the payload in place so verify() fails.
        ring.write_span(item.linear_pos + (HEADER_SIZE as u64), &[0xff]);

        let worker = WorkerState::new(0, CoreClass::Efficiency, 16);
        let dispatcher = CountingDispatcher {
            performance_hits: AtomicUsize::new(0),
            efficiency_hits: AtomicUsize::new(0),
        };
        let monitor = Monitor::new(1);

        process_item(&worker, &ring, item, &dispatcher, &Crc32Checksum, &monitor);

        assert_eq!(dispatcher.efficiency_hits.load(Ordering::Relaxed), 0);
        assert_eq!(monitor.snapshot(0, 0, 0, 0, 0).dropped_by_priority[1], 1);
    }
}
