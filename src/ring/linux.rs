//! Linux ring backing: huge-page `mmap` with a plain anonymous mapping
//! fallback, optionally `mlock`ed.

use libc::{ MAP_ANONYMOUS, MAP_FAILED, MAP_HUGETLB, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void };

use crate::error::{ BusError, Result };

use super::RingAllocation;

pub(super) fn allocate(len: usize, use_huge_pages: bool, lock_memory: bool) -> Result<RingAllocation> {
    let ptr = if use_huge_pages {
        match mmap_anonymous(len, true) {
            Ok(ptr) => ptr,
            Err(_) => mmap_anonymous(len, false)?,
        }
    } else {
        mmap_anonymous(len, false)?
    };

    if lock_memory {
        let result = unsafe { libc::mlock(ptr as *const c_void, len) };
        if result != 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "mlock failed, continuing unlocked");
        }
    }

    Ok(RingAllocation { ptr, len, drop_fn: munmap })
}

fn mmap_anonymous(len: usize, huge_pages: bool) -> Result<*mut u8> {
    let flags = MAP_PRIVATE | MAP_ANONYMOUS | (if huge_pages { MAP_HUGETLB } else { 0 });

    let ptr = unsafe {
        libc::mmap(std::ptr::null_mut(), len, PROT_READ | PROT_WRITE, flags, -1, 0)
    };

    if ptr == MAP_FAILED {
        Err(BusError::system_resource(format!("mmap failed: {}", std::io::Error::last_os_error())))
    } else {
        Ok(ptr as *mut u8)
    }
}

unsafe fn munmap(ptr: *mut u8, len: usize) {
    let result = unsafe { libc::munmap(ptr as *mut c_void, len) };
    if result != 0 {
        tracing::warn!(error = %std::io::Error::last_os_error(), "munmap failed");
    }
}
