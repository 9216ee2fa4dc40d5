//! Single-threaded, cooperative, stackful coroutines.
//!
//! A [`Scheduler`] owns a pool of coroutines, each running on its own
//! guard-paged stack. The host decides every transfer of control: `run`
//! enters a coroutine for the first time, `resume` continues one parked in
//! `yield_now`, and `status` reports when every coroutine has finished.
//!
//! ```
//! use costack::{Scheduler, ScheduleStatus};
//!
//! let s = Scheduler::new();
//! let id = s.spawn(|s| {
//!     for _ in 0..3 {
//!         s.yield_now();
//!     }
//! }).unwrap();
//!
//! s.run(id).unwrap();
//! while s.status() != ScheduleStatus::Finished {
//!     let _ = s.resume(id);
//! }
//! s.close();
//! ```

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod co;
pub mod context;
pub mod error;
pub mod scheduler;
pub mod stack;
pub mod stack_pool;
mod platform;

pub use co::{CoroutineId, CoroutineStatus};
pub use error::{Result, ScheduleError};
pub use scheduler::{ScheduleStatus, Scheduler, SchedulerConfig};
pub use stack::Stack;
pub use stack_pool::{StackPool, StackPoolConfig};
