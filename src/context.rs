//! Execution-context transfer on top of the platform's `ucontext` facility.
//!
//! A `Context` stores a pointer into itself once captured (glibc keeps the
//! floating point state inside the struct), so contexts are always boxed and
//! never moved after `getcontext`.

use std::io;
use std::mem;
use std::os::raw::{c_int, c_uint, c_void};

use crate::stack::Stack;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("costack requires the ucontext functions of glibc on Linux");

/// First function executed on a primed context. The pointer argument is
/// delivered as two 32-bit halves since `makecontext` only forwards `int`s.
pub type Trampoline = extern "C" fn(hi: c_uint, lo: c_uint);

pub struct Context {
    uc: libc::ucontext_t
}

impl Context {
    pub fn new() -> Box<Context> {
        Box::new(Context {
            uc: unsafe { mem::zeroed() }
        })
    }

    /// Prepares this context to start `entry(arg)` on `stack` and to continue
    /// at `link` once `entry` returns.
    ///
    /// Both `stack` and `link` must outlive every switch into this context.
    pub unsafe fn prime(
        &mut self,
        stack: &Stack,
        link: *mut Context,
        entry: Trampoline,
        arg: *const c_void
    ) -> io::Result<()> {
        if libc::getcontext(&mut self.uc) != 0 {
            return Err(io::Error::last_os_error());
        }
        self.uc.uc_stack.ss_sp = stack.base() as *mut c_void;
        self.uc.uc_stack.ss_size = stack.len();
        self.uc.uc_stack.ss_flags = 0;
        self.uc.uc_link = &mut (*link).uc;

        let (hi, lo) = split_ptr(arg);
        let entry = mem::transmute::<Trampoline, extern "C" fn()>(entry);
        libc::makecontext(&mut self.uc, entry, 2 as c_int, hi, lo);
        Ok(())
    }

    /// Saves the running state into `from` and transfers control to `to`.
    /// Returns once some other switch names `from` as its target.
    pub unsafe fn switch(from: *mut Context, to: *const Context) -> io::Result<()> {
        if libc::swapcontext(&mut (*from).uc, &(*to).uc) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

pub fn split_ptr(p: *const c_void) -> (c_uint, c_uint) {
    let v = p as usize as u64;
    ((v >> 32) as c_uint, v as c_uint)
}

pub fn join_ptr(hi: c_uint, lo: c_uint) -> *const c_void {
    (((hi as u64) << 32) | lo as u64) as usize as *const c_void
}
