//! Core detection and performance/efficiency placement.
//!
//! Worker `w` is assigned core `w` for the first `performance_core_count`
//! workers (performance class), and core
//! `P + ((w - P) mod (C - P))` for the rest (efficiency class), where `C`
//! is the detected logical core count. The mapping of core index to
//! physical performance/efficiency silicon is a configuration input, not
//! an assumption this module makes about hardware enumeration.

use nix::sched::{ CpuSet, sched_setaffinity };
use nix::unistd::Pid;

use crate::error::{ BusError, Result };

/// Which class of core a worker (or producer) was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreClass {
    /// One of the first `performance_core_count` cores.
    Performance,
    /// Any core beyond the performance set.
    Efficiency,
}

/// A single worker's placement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorePlacement {
    pub worker_index: usize,
    pub core_id: usize,
    pub class: CoreClass,
}

/// Detect the number of logical cores visible to this process.
pub fn detect_logical_cores() -> usize {
    num_cpus::get()
}

/// Compute the static placement table for `num_workers` workers given
/// `performance_core_count` performance cores out of `logical_cores`
/// total. `performance_core_count` must not exceed either `num_workers`
/// or `logical_cores`.
pub fn compute_placement(
    num_workers: usize,
    performance_core_count: usize,
    logical_cores: usize
) -> Result<Vec<CorePlacement>> {
    if performance_core_count > num_workers {
        return Err(BusError::config("performance_core_count cannot exceed num_workers"));
    }
    if num_workers > logical_cores {
        return Err(
            crate::error::InitError::CoreCountExceeded.into()
        );
    }

    let p = performance_core_count;
    let c = logical_cores;

    let placements = (0..num_workers)
        .map(|w| {
            if w < p {
                CorePlacement { worker_index: w, core_id: w, class: CoreClass::Performance }
            } else {
                let efficiency_span = (c - p).max(1);
                let core_id = p + (w - p) % efficiency_span;
                CorePlacement { worker_index: w, core_id, class: CoreClass::Efficiency }
            }
        })
        .collect();

    Ok(placements)
}

/// Pin the calling thread to `core_id`. Returns `Ok(())` even on platforms
/// without affinity support (the core runs correctly with reduced cache
/// locality, per the platform-abstracted pinning contract).
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core_id: usize) -> Result<()> {
    let mut cpu_set = CpuSet::new();
    cpu_set.set(core_id).map_err(BusError::CpuAffinity)?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(BusError::CpuAffinity)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core_id: usize) -> Result<()> {
    Ok(())
}
