//! Load-generator / demo binary for the agent fleet message bus.
//!
//! Brings up a runtime with synthetic producers and workers, lets it run
//! for a fixed window, then prints the final statistics snapshot.

use std::sync::Arc;
use std::time::Duration;

use agentmesh::{ Dispatcher, Runtime, RuntimeConfig };

struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn dispatch_performance(&self, _msg_type: u32, _payload: &[u8]) {}
    fn dispatch_efficiency(&self, _msg_type: u32, _payload: &[u8]) {}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let logical_cores = agentmesh::topology::detect_logical_cores();
    let num_workers = logical_cores.saturating_sub(1).max(1);

    tracing::info!(logical_cores, num_workers, "detected host topology");

    let config = RuntimeConfig::new(num_workers, 1 << 26)?
        .with_producers(1)?
        .with_huge_pages(true)
        .with_locked_memory(false);

    let runtime = Arc::new(Runtime::init(config)?);
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(NoopDispatcher);

    runtime.start(dispatcher);
    std::thread::sleep(Duration::from_secs(3));
    runtime.stop();

    let snapshot = runtime.statistics();
    println!("messages processed: {}", snapshot.total_messages);
    println!("bytes processed: {}", snapshot.total_bytes);
    println!("dropped (full): {}", snapshot.dropped_full);
    println!("dropped (checksum): {}", snapshot.dropped_checksum);
    println!("corrupt frames: {}", snapshot.corrupt_frames);
    println!("p50/p99/p999 latency (ns): {}/{}/{}", snapshot.p50_latency_ns, snapshot.p99_latency_ns, snapshot.p999_latency_ns);
    for (i, worker) in snapshot.per_worker.iter().enumerate() {
        println!(
            "worker {i}: processed={} stolen={} steal_attempts={} idle_cycles={}",
            worker.processed,
            worker.stolen,
            worker.steal_attempts,
            worker.idle_cycles
        );
    }

    Ok(())
}
