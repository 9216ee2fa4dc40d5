use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::io;
use std::os::raw::{c_uint, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::{self, Context};
use crate::scheduler::Scheduler;
use crate::stack::Stack;

/// Index of a coroutine slot inside its scheduler.
pub type CoroutineId = usize;

pub(crate) type Entry = Box<dyn FnOnce(&Scheduler)>;

/// Lifecycle of a coroutine: `Ready -> Running -> (Suspended -> Running)* -> Dead`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CoroutineStatus {
    /// Finished, deleted, or never created.
    Dead = 0,
    /// Created but never entered.
    Ready = 1,
    Running = 2,
    /// Parked in `yield_now`, waiting for `resume`.
    Suspended = 3
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            CoroutineStatus::Dead => "dead",
            CoroutineStatus::Ready => "ready",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Suspended => "suspended"
        };
        f.write_str(name)
    }
}

/// A coroutine record. Only the owning scheduler touches it.
///
/// Records are boxed and never move: the saved context points into itself
/// and into the record's stack.
pub struct Coroutine {
    entry: Cell<Option<Entry>>,
    stack: Cell<Option<Stack>>,
    ctx: UnsafeCell<Box<Context>>,
    status: Cell<CoroutineStatus>,
    panic_val: Cell<Option<Box<dyn Any + Send>>>
}

impl Coroutine {
    pub(crate) fn new(stack: Stack, entry: Entry) -> Box<Coroutine> {
        Box::new(Coroutine {
            entry: Cell::new(Some(entry)),
            stack: Cell::new(Some(stack)),
            ctx: UnsafeCell::new(Context::new()),
            status: Cell::new(CoroutineStatus::Ready),
            panic_val: Cell::new(None)
        })
    }

    /// Arranges for the first switch into this record to land in
    /// `trampoline`, and for its return to continue at `link`.
    pub(crate) unsafe fn prime(&self, link: *mut Context, sched: *const Scheduler) -> io::Result<()> {
        let stack = self.stack.take();
        let res = match stack {
            Some(ref s) => (*self.ctx.get()).prime(s, link, trampoline, sched as *const c_void),
            None => Err(io::Error::new(io::ErrorKind::Other, "coroutine has no stack"))
        };
        self.stack.set(stack);
        res
    }

    pub fn status(&self) -> CoroutineStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: CoroutineStatus) {
        self.status.set(status);
    }

    pub(crate) fn context(&self) -> *mut Context {
        unsafe { &mut **self.ctx.get() }
    }

    pub(crate) fn take_stack(&self) -> Option<Stack> {
        self.stack.take()
    }

    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic_val.take()
    }

    /// Runs the body to completion on the current (coroutine) stack and
    /// marks the record dead. Panics are kept for the host to re-raise.
    pub(crate) fn run_body(&self, sched: &Scheduler) {
        if let Some(f) = self.entry.take() {
            if let Err(e) = catch_unwind(AssertUnwindSafe(|| f(sched))) {
                self.panic_val.set(Some(e));
            }
        }
        self.status.set(CoroutineStatus::Dead);
    }
}

/// First frame of every coroutine stack. When it returns, the context link
/// carries control back to the scheduler's main context.
extern "C" fn trampoline(hi: c_uint, lo: c_uint) {
    let sched = unsafe { &*(context::join_ptr(hi, lo) as *const Scheduler) };
    sched.finish_active();
}
