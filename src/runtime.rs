//! Public entry point: owns the ring buffer, worker/producer threads, and
//! the process-wide run flag.
//!
//! No component in the teacher assembles these pieces into a single file —
//! its equivalent wiring lives loose in `main.rs`. This module is the
//! "explicit, passed-by-reference value owned by the host" re-architecture
//! target: there is no global mutable singleton ring pointer. The host owns
//! one `Arc<Runtime>`; `start()` clones it into a single driver thread, which
//! in turn borrows the runtime's fields for the scope of its own
//! `std::thread::scope` call that spawns every producer/worker thread.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{ info, info_span };

use crate::config::RuntimeConfig;
use crate::deque::Deque;
use crate::error::{ InitError, Result };
use crate::frame::{ Checksum, Crc32Checksum };
use crate::monitoring::{ Monitor, StatisticsSnapshot };
use crate::producer::{ enqueue_one, run_producer_loop };
use crate::ring::RingBuffer;
use crate::topology::{ self, CorePlacement };
use crate::worker::{ Dispatcher, WorkerState, run_worker_loop };

/// A fully initialized, not-yet-started runtime.
///
/// `start()` spawns one driver thread that in turn scopes every producer and
/// worker thread, and returns immediately; `stop()` clears the run flag and
/// joins that driver thread, blocking until every producer/worker thread it
/// owns has exited its loop. This matches the external-interface contract
/// (`start()`, `stop()` idempotent and blocking-until-joined) rather than
/// having the calling thread itself block inside `start()`.
pub struct Runtime {
    config: RuntimeConfig,
    ring: RingBuffer,
    monitor: Monitor,
    checksum: Box<dyn Checksum>,
    workers: Vec<WorkerState>,
    worker_placements: Vec<CorePlacement>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Validate `config` against the host's detected topology, allocate the
    /// ring buffer, and construct one [`WorkerState`] per configured
    /// worker. Does not spawn any threads; call [`Runtime::start`] for that.
    pub fn init(config: RuntimeConfig) -> Result<Self> {
        let logical_cores = topology::detect_logical_cores();

        config.validate_against_topology(logical_cores).map_err(|_| InitError::CoreCountExceeded)?;

        let placements = topology
            ::compute_placement(config.num_workers, config.performance_core_count, logical_cores)
            .map_err(|_| InitError::CoreCountExceeded)?;

        let ring = RingBuffer::new(
            config.ring_capacity_bytes,
            config.use_huge_pages,
            config.lock_memory
        ).map_err(|_| InitError::AllocationFailed)?;

        let workers = placements
            .iter()
            .map(|p| WorkerState::new(p.worker_index, p.class, config.deque_capacity))
            .collect();

        let monitor = Monitor::new(config.num_workers);

        Ok(Self {
            config,
            ring,
            monitor,
            checksum: Box::new(Crc32Checksum),
            workers,
            worker_placements: placements,
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            driver: Mutex::new(None),
        })
    }

    /// Spawn all producer and worker threads, pinning each to its assigned
    /// core, and return immediately. The fleet keeps running until `stop()`
    /// is called. Runs the given `dispatcher` on every delivered message.
    ///
    /// Takes `self` behind an `Arc` so the driver thread (and, through it,
    /// every producer/worker thread it scopes) can outlive this call without
    /// the runtime needing a 'static lifetime of its own or a global
    /// singleton pointer.
    pub fn start(self: &Arc<Self>, dispatcher: Arc<dyn Dispatcher>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(true, Ordering::Release);

        let runtime = Arc::clone(self);
        let handle = std::thread::Builder
            ::new()
            .name("agentmesh-driver".into())
            .spawn(move || {
                let _span = info_span!("runtime").entered();
                info!(
                    num_producers = runtime.config.num_producers,
                    num_workers = runtime.config.num_workers,
                    "starting runtime"
                );

                std::thread::scope(|scope| {
                    for producer_id in 0..runtime.config.num_producers {
                        let running = Arc::clone(&runtime.running);
                        let ring = &runtime.ring;
                        let checksum = runtime.checksum.as_ref();
                        let batch_size = runtime.config.batch_size_producer;

                        scope.spawn(move || {
                            run_producer_loop(
                                producer_id as u32,
                                ring,
                                running,
                                batch_size,
                                128,
                                checksum
                            );
                        });
                    }

                    for (index, worker) in runtime.workers.iter().enumerate() {
                        let running = Arc::clone(&runtime.running);
                        let ring = &runtime.ring;
                        let checksum = runtime.checksum.as_ref();
                        let monitor = &runtime.monitor;
                        let worker_batch = runtime.config.batch_size_worker;
                        let drain_on_shutdown = runtime.config.drain_on_shutdown;
                        let placement = runtime.worker_placements[index];
                        let peers: Vec<&Deque> = runtime.workers
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .map(|(_, w)| &w.deque)
                            .collect();
                        let dispatcher = Arc::clone(&dispatcher);

                        scope.spawn(move || {
                            if let Err(error) = topology::pin_current_thread(placement.core_id) {
                                tracing::error!(
                                    worker_id = index,
                                    %error,
                                    "failed to pin worker thread"
                                );
                            }
                            run_worker_loop(
                                worker,
                                ring,
                                &peers,
                                dispatcher.as_ref(),
                                checksum,
                                monitor,
                                running,
                                worker_batch,
                                drain_on_shutdown
                            );
                        });
                    }
                });

                info!("runtime stopped");
            })
            .expect("failed to spawn runtime driver thread");

        *self.driver.lock() = Some(handle);
    }

    /// Clear the run flag and block until the driver thread (and every
    /// producer/worker thread it scoped) has exited. Idempotent: a second
    /// call observes no driver handle and returns immediately.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.join();
        }
    }

    /// Enqueue a single host-supplied message. Internally performs a
    /// reserve/commit of one frame.
    pub fn enqueue(&self, msg_type: u32, payload: &[u8], priority: u32) -> Result<()> {
        enqueue_one(&self.ring, u32::MAX, msg_type, payload, priority, self.checksum.as_ref())
    }

    /// Point-in-time statistics snapshot, the sole supported observability
    /// channel.
    pub fn statistics(&self) -> StatisticsSnapshot {
        let stats = self.ring.stats();
        self.monitor.snapshot(
            stats.messages.load(Ordering::Relaxed),
            stats.bytes.load(Ordering::Relaxed),
            stats.dropped_full.load(Ordering::Relaxed),
            stats.corrupt_frames.load(Ordering::Relaxed),
            self.ring.backlog()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingDispatcher {
        hits: AtomicUsize,
    }

    impl Dispatcher for CountingDispatcher {
        fn dispatch_performance(&self, _msg_type: u32, _payload: &[u8]) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        fn dispatch_efficiency(&self, _msg_type: u32, _payload: &[u8]) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_init_rejects_oversubscribed_core_count() {
        let logical_cores = topology::detect_logical_cores();
        let config = RuntimeConfig::new(logical_cores + 10, 1 << 16).unwrap();
        assert!(Runtime::init(config).is_err());
    }

    #[test]
    fn test_smoke_enqueue_and_process() {
        let config = RuntimeConfig::new(1, 1 << 20)
            .unwrap()
            .with_producers(1)
            .unwrap()
            .with_batch_size_worker(16)
            .unwrap();
        let runtime = Arc::new(Runtime::init(config).unwrap());

        for i in 0..10u32 {
            runtime.enqueue(1, &i.to_ne_bytes(), 0).unwrap();
        }

        let dispatcher = Arc::new(CountingDispatcher { hits: AtomicUsize::new(0) });
        runtime.start(Arc::clone(&dispatcher) as Arc<dyn Dispatcher>);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while
            runtime.statistics().per_worker[0].processed < 10 &&
            std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        runtime.stop();

        assert_eq!(dispatcher.hits.load(Ordering::Relaxed), 10);
        assert_eq!(runtime.statistics().per_worker[0].processed, 10);
    }
}
