//! C bindings for the costack scheduler.
//!
//! Statuses and ids use the integer encodings of the classic C API:
//! schedule FINISHED=0 RUNNING=1, coroutine DEAD=0 READY=1 RUNNING=2 SUSPEND=3.

extern crate costack;

use std::os::raw::{c_int, c_void};
use std::pin::Pin;
use costack::{CoroutineId, Scheduler, SchedulerConfig, StackPoolConfig};

pub type CoroutineEntry = extern "C" fn (s: *const Scheduler, args: *mut c_void);

fn to_id(id: c_int) -> Option<CoroutineId> {
    if id < 0 {
        None
    } else {
        Some(id as CoroutineId)
    }
}

fn from_id(id: CoroutineId) -> Option<c_int> {
    if id <= c_int::max_value() as CoroutineId {
        Some(id as c_int)
    } else {
        None
    }
}

fn into_raw(s: Pin<Box<Scheduler>>) -> *mut Scheduler {
    // Ownership moves to the caller, who never moves the value either.
    unsafe { Box::into_raw(Pin::into_inner_unchecked(s)) }
}

#[no_mangle]
pub extern "C" fn co_schedule_create() -> *mut Scheduler {
    into_raw(Scheduler::new())
}

/// `max_pool_size` bounds the cache of released stacks; 0 means unbounded.
#[no_mangle]
pub extern "C" fn co_schedule_create_with_config(stack_size: usize, max_pool_size: usize) -> *mut Scheduler {
    into_raw(Scheduler::with_config(SchedulerConfig {
        stack_pool: StackPoolConfig {
            default_stack_size: stack_size,
            max_pool_size: max_pool_size
        },
        ..SchedulerConfig::default()
    }))
}

#[no_mangle]
pub unsafe extern "C" fn co_schedule_close(s: *mut Scheduler) {
    if !s.is_null() {
        Pin::new_unchecked(Box::from_raw(s)).close();
    }
}

#[no_mangle]
pub extern "C" fn co_schedule_status(s: &Scheduler) -> c_int {
    s.status() as c_int
}

/// Returns the new id, or -1 if the coroutine could not be allocated.
/// `args` must stay valid for the coroutine's whole lifetime.
#[no_mangle]
pub extern "C" fn co_coroutine_create(
    s: &Scheduler,
    entry: CoroutineEntry,
    args: *mut c_void
) -> c_int {
    let res = s.spawn(move |s| {
        entry(s as *const Scheduler, args);
    });
    let id = match res {
        Ok(id) => id,
        Err(_) => return -1
    };
    match from_id(id) {
        Some(id) => id,
        None => {
            s.delete(id);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn co_coroutine_delete(s: &Scheduler, id: c_int) -> c_int {
    match to_id(id) {
        Some(id) => s.delete(id) as c_int,
        None => 0
    }
}

#[no_mangle]
pub extern "C" fn co_coroutine_run(s: &Scheduler, id: c_int) {
    if let Some(id) = to_id(id) {
        let _ = s.run(id);
    }
}

#[no_mangle]
pub extern "C" fn co_coroutine_yield(s: &Scheduler) {
    s.yield_now();
}

#[no_mangle]
pub extern "C" fn co_coroutine_resume(s: &Scheduler, id: c_int) {
    if let Some(id) = to_id(id) {
        let _ = s.resume(id);
    }
}

#[no_mangle]
pub extern "C" fn co_coroutine_status(s: &Scheduler, id: c_int) -> c_int {
    match to_id(id) {
        Some(id) => s.coroutine_status(id) as c_int,
        None => 0
    }
}
