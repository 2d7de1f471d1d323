//! Portable ring backing for non-Linux targets: a page-aligned heap
//! allocation. Huge pages and `mlock` are unavailable here and the
//! corresponding config flags are silently ignored, matching the
//! platform-abstracted pinning call's own fallback behavior.

use std::alloc::{ Layout, alloc_zeroed, dealloc };

use crate::constants::PAGE_SIZE;
use crate::error::{ BusError, Result };

use super::RingAllocation;

pub(super) fn allocate(len: usize, _use_huge_pages: bool, _lock_memory: bool) -> Result<RingAllocation> {
    let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|e|
        BusError::system_resource(format!("invalid ring layout: {e}"))
    )?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(BusError::system_resource("heap allocation failed"));
    }

    Ok(RingAllocation { ptr, len, drop_fn: dealloc_ring })
}

unsafe fn dealloc_ring(ptr: *mut u8, len: usize) {
    let layout = Layout::from_size_align(len, PAGE_SIZE).expect("layout was valid at allocation time");
    unsafe {
        dealloc(ptr, layout);
    }
}
