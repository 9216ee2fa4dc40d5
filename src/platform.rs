use std::io;
use std::ptr;

lazy_static! {
    pub static ref PAGE_SIZE: usize = {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            4096
        } else {
            size as usize
        }
    };
}

/// Rounds `size` up to a whole number of pages, or `None` on overflow.
pub fn round_to_page(size: usize) -> Option<usize> {
    let page = *PAGE_SIZE;
    size.checked_add(page - 1).map(|s| s / page * page)
}

/// Maps `size` bytes of private, zero-filled memory.
pub fn setup_stack(size: usize) -> io::Result<*mut [u8]> {
    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0
        )
    };
    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr::slice_from_raw_parts_mut(mem as *mut u8, size))
}

/// Makes the lowest page of `mem` inaccessible so that an overflow faults
/// instead of running into whatever is mapped below.
pub unsafe fn setup_stack_guard_page(mem: *mut [u8]) -> io::Result<()> {
    let base = mem as *mut u8 as *mut libc::c_void;
    if libc::mprotect(base, *PAGE_SIZE, libc::PROT_NONE) != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub unsafe fn free_stack(mem: *mut [u8]) {
    let len = mem.len();
    if libc::munmap(mem as *mut u8 as *mut libc::c_void, len) != 0 {
        warn!("munmap of a {} byte stack failed: {}", len, io::Error::last_os_error());
    }
}
