//! Runtime configuration, built and validated eagerly before any thread
//! spawns — mirrors the builder shape used throughout this crate's ring and
//! deque constructors.

use crate::constants::{
    DEFAULT_DEQUE_CAPACITY,
    DEFAULT_PERFORMANCE_CORE_CAP,
    DEFAULT_RING_CAPACITY_BYTES,
    MAX_PRODUCER_BATCH,
    MAX_PRODUCERS,
    MAX_WORKER_BATCH,
    MAX_WORKERS,
};
use crate::error::{ BusError, Result };

/// Full configuration for a [`crate::runtime::Runtime`].
///
/// Construct with [`RuntimeConfig::new`], then narrow with the `with_*`
/// methods; each validates its argument immediately rather than deferring
/// to `Runtime::init`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub(crate) ring_capacity_bytes: usize,
    pub(crate) num_producers: usize,
    pub(crate) num_workers: usize,
    pub(crate) performance_core_count: usize,
    pub(crate) deque_capacity: usize,
    pub(crate) batch_size_producer: usize,
    pub(crate) batch_size_worker: usize,
    pub(crate) use_huge_pages: bool,
    pub(crate) lock_memory: bool,
    pub(crate) drain_on_shutdown: bool,
}

impl RuntimeConfig {
    /// Start a configuration with `num_workers` workers and
    /// `ring_capacity_bytes` of ring buffer storage, everything else
    /// defaulted. `ring_capacity_bytes` must be a power of two.
    pub fn new(num_workers: usize, ring_capacity_bytes: usize) -> Result<Self> {
        if !ring_capacity_bytes.is_power_of_two() {
            return Err(BusError::config("ring_capacity_bytes must be a power of two"));
        }
        if num_workers == 0 || num_workers > MAX_WORKERS {
            return Err(BusError::config(format!("num_workers must be in 1..={MAX_WORKERS}")));
        }

        let performance_core_count = num_workers.min(DEFAULT_PERFORMANCE_CORE_CAP);

        Ok(Self {
            ring_capacity_bytes,
            num_producers: 1,
            num_workers,
            performance_core_count,
            deque_capacity: DEFAULT_DEQUE_CAPACITY,
            batch_size_producer: MAX_PRODUCER_BATCH,
            batch_size_worker: MAX_WORKER_BATCH,
            use_huge_pages: false,
            lock_memory: false,
            drain_on_shutdown: false,
        })
    }

    /// Set the number of producer threads (`1..=MAX_PRODUCERS`).
    pub fn with_producers(mut self, num_producers: usize) -> Result<Self> {
        if num_producers == 0 || num_producers > MAX_PRODUCERS {
            return Err(BusError::config(format!("num_producers must be in 1..={MAX_PRODUCERS}")));
        }
        self.num_producers = num_producers;
        Ok(self)
    }

    /// Set how many of the first cores are treated as performance cores.
    /// Must not exceed `num_workers`.
    pub fn with_performance_core_count(mut self, count: usize) -> Result<Self> {
        if count > self.num_workers {
            return Err(BusError::config("performance_core_count cannot exceed num_workers"));
        }
        self.performance_core_count = count;
        Ok(self)
    }

    /// Set the per-worker Chase-Lev deque capacity. Must be a power of two.
    pub fn with_deque_capacity(mut self, capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(BusError::config("deque_capacity must be a power of two"));
        }
        self.deque_capacity = capacity;
        Ok(self)
    }

    /// Set the maximum batch size a producer stages before committing.
    pub fn with_batch_size_producer(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(BusError::config("batch_size_producer must be greater than 0"));
        }
        self.batch_size_producer = batch_size;
        Ok(self)
    }

    /// Set the maximum batch size a worker claims per ring draw.
    pub fn with_batch_size_worker(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(BusError::config("batch_size_worker must be greater than 0"));
        }
        self.batch_size_worker = batch_size;
        Ok(self)
    }

    /// Back the ring buffer with huge pages (Linux only; no-op elsewhere).
    pub fn with_huge_pages(mut self, enabled: bool) -> Self {
        self.use_huge_pages = enabled;
        self
    }

    /// `mlock` the ring buffer's backing memory once allocated.
    pub fn with_locked_memory(mut self, enabled: bool) -> Self {
        self.lock_memory = enabled;
        self
    }

    /// If set, `Runtime::stop` blocks until every worker's local deque is
    /// empty before joining threads. In-flight ring frames that have not
    /// yet been claimed by any worker are still not guaranteed delivery.
    pub fn with_drain_on_shutdown(mut self, enabled: bool) -> Self {
        self.drain_on_shutdown = enabled;
        self
    }

    /// Validate cross-field invariants that can only be checked once all
    /// fields are set: worker/producer counts against the detected logical
    /// core count. Called by `Runtime::init`, not by the builder methods
    /// above (which only validate their own argument).
    pub fn validate_against_topology(&self, logical_cores: usize) -> Result<()> {
        if self.num_workers + self.num_producers > logical_cores {
            return Err(
                BusError::config(
                    format!(
                        "num_workers ({}) + num_producers ({}) exceeds detected logical cores ({})",
                        self.num_workers,
                        self.num_producers,
                        logical_cores
                    )
                )
            );
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(4, DEFAULT_RING_CAPACITY_BYTES).expect("default configuration is always valid")
    }
}
