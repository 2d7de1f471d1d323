//! Statistics snapshot: the sole supported observability channel.
//!
//! Expands the teacher's `PerformanceMonitor`/`PerformanceStats` (which
//! hardcodes placeholder percentiles) into a snapshot backed by a real
//! `hdrhistogram::Histogram` per worker, merged on demand, plus the
//! per-component counters the runtime's external interface promises:
//! total messages, total bytes, drops by cause, per-worker
//! processed/stolen/steal_attempts/idle_cycles, per-priority drop
//! counters, and the current ring backlog.

use std::sync::atomic::{ AtomicU64, Ordering };

use crossbeam::utils::CachePadded;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

const MAX_PRIORITY_CLASSES: usize = 5;

/// Per-worker counters, cache-line padded to avoid false sharing between
/// workers sharing a statistics array.
#[derive(Default)]
pub struct WorkerCounters {
    pub processed: CachePadded<AtomicU64>,
    pub stolen: CachePadded<AtomicU64>,
    pub steal_attempts: CachePadded<AtomicU64>,
    pub idle_cycles: CachePadded<AtomicU64>,
}

/// Owns all advisory counters plus a latency histogram per worker.
/// Relaxed ordering throughout: a monitor thread observing these mid-flight
/// may see torn snapshots, but they converge once producers/workers
/// quiesce.
pub struct Monitor {
    worker_counters: Vec<WorkerCounters>,
    dropped_checksum: CachePadded<AtomicU64>,
    dropped_by_priority: Vec<CachePadded<AtomicU64>>,
    latency_histograms: Vec<Mutex<Histogram<u64>>>,
}

impl Monitor {
    /// Create a monitor sized for `num_workers` workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            worker_counters: (0..num_workers).map(|_| WorkerCounters::default()).collect(),
            dropped_checksum: CachePadded::new(AtomicU64::new(0)),
            dropped_by_priority: (0..MAX_PRIORITY_CLASSES)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
            latency_histograms: (0..num_workers)
                .map(|_| {
                    Mutex::new(
                        Histogram::new_with_bounds(1, 60_000_000_000, 3).expect(
                            "fixed histogram bounds are always valid"
                        )
                    )
                })
                .collect(),
        }
    }

    pub fn counters(&self, worker_index: usize) -> &WorkerCounters {
        &self.worker_counters[worker_index]
    }

    pub fn record_checksum_drop(&self, priority: u32) {
        self.dropped_checksum.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.dropped_by_priority.get(priority as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_processing_latency(&self, worker_index: usize, latency_ns: u64) {
        if let Some(histogram) = self.latency_histograms.get(worker_index) {
            let mut histogram = histogram.lock();
            let _ = histogram.record(latency_ns.max(1));
        }
    }

    /// Build a point-in-time [`StatisticsSnapshot`].
    pub fn snapshot(
        &self,
        total_messages: u64,
        total_bytes: u64,
        dropped_full: u64,
        corrupt_frames: u64,
        backlog: u64
    ) -> StatisticsSnapshot {
        let mut merged = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3).expect(
            "fixed histogram bounds are always valid"
        );
        for histogram in &self.latency_histograms {
            merged.add(&*histogram.lock()).expect("histograms share identical bounds");
        }

        let per_worker = self.worker_counters
            .iter()
            .map(|c| WorkerSnapshot {
                processed: c.processed.load(Ordering::Relaxed),
                stolen: c.stolen.load(Ordering::Relaxed),
                steal_attempts: c.steal_attempts.load(Ordering::Relaxed),
                idle_cycles: c.idle_cycles.load(Ordering::Relaxed),
            })
            .collect();

        let dropped_by_priority = self.dropped_by_priority
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        StatisticsSnapshot {
            total_messages,
            total_bytes,
            dropped_full,
            dropped_checksum: self.dropped_checksum.load(Ordering::Relaxed),
            corrupt_frames,
            backlog,
            per_worker,
            dropped_by_priority,
            p50_latency_ns: merged.value_at_quantile(0.50),
            p95_latency_ns: merged.value_at_quantile(0.95),
            p99_latency_ns: merged.value_at_quantile(0.99),
            p999_latency_ns: merged.value_at_quantile(0.999),
        }
    }
}

/// Per-worker counters at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSnapshot {
    pub processed: u64,
    pub stolen: u64,
    pub steal_attempts: u64,
    pub idle_cycles: u64,
}

/// Point-in-time observation of the runtime, the sole supported
/// observability channel (no tracing span carries equivalent detail).
#[derive(Debug, Clone)]
pub struct StatisticsSnapshot {
    pub total_messages: u64,
    pub total_bytes: u64,
    pub dropped_full: u64,
    pub dropped_checksum: u64,
    pub corrupt_frames: u64,
    pub backlog: u64,
    pub per_worker: Vec<WorkerSnapshot>,
    pub dropped_by_priority: Vec<u64>,
    pub p50_latency_ns: u64,
    pub p95_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub p999_latency_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_counters_isolated_per_worker() {
        let monitor = Monitor::new(2);
        monitor.counters(0).processed.fetch_add(5, Ordering::Relaxed);
        monitor.counters(1).processed.fetch_add(1, Ordering::Relaxed);

        let snapshot = monitor.snapshot(0, 0, 0, 0, 0);
        assert_eq!(snapshot.per_worker[0].processed, 5);
        assert_eq!(snapshot.per_worker[1].processed, 1);
    }

    #[test]
    fn test_checksum_drop_recorded_per_priority() {
        let monitor = Monitor::new(1);
        monitor.record_checksum_drop(2);
        monitor.record_checksum_drop(2);

        let snapshot = monitor.snapshot(0, 0, 0, 0, 0);
        assert_eq!(snapshot.dropped_checksum, 2);
        assert_eq!(snapshot.dropped_by_priority[2], 2);
    }

    #[test]
    fn test_latency_percentiles_reflect_recorded_values() {
        let monitor = Monitor::new(1);
        for ns in [100u64, 200, 300, 400, 500] {
            monitor.record_processing_latency(0, ns);
        }

        let snapshot = monitor.snapshot(0, 0, 0, 0, 0);
        assert!(snapshot.p50_latency_ns > 0);
        assert!(snapshot.p99_latency_ns >= snapshot.p50_latency_ns);
    }
}
