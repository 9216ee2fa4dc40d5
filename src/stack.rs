use std::io;
use crate::platform;

/// A private, fixed-size call stack with a guard page below it.
pub struct Stack {
    mem: *mut [u8]
}

impl Stack {
    /// Maps a stack with at least `stack_size` usable bytes.
    pub fn new(stack_size: usize) -> io::Result<Stack> {
        // Usable pages sit on top of a single PROT_NONE page.
        let mapped = platform::round_to_page(stack_size.max(1))
            .and_then(|usable| usable.checked_add(*platform::PAGE_SIZE))
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stack size {} overflows the address space", stack_size)
            ))?;
        let mem = platform::setup_stack(mapped)?;
        let stack = Stack {
            mem: mem
        };
        unsafe {
            platform::setup_stack_guard_page(stack.mem)?;
        }
        Ok(stack)
    }

    /// Lowest usable address, just above the guard page.
    pub fn base(&self) -> *mut u8 {
        unsafe { (self.mem as *mut u8).add(*platform::PAGE_SIZE) }
    }

    /// Usable size in bytes, excluding the guard page.
    pub fn len(&self) -> usize {
        self.mem.len() - *platform::PAGE_SIZE
    }

    pub fn initial_sp(&self) -> usize {
        self.base() as usize + self.len()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            platform::free_stack(self.mem);
        }
    }
}
