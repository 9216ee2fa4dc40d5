use std::io;
use thiserror::Error;

use crate::co::{CoroutineId, CoroutineStatus};

/// Why a scheduler operation did nothing.
///
/// None of these leave the scheduler in a different state than before the
/// call; they only report the reason.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The id was never handed out, or its slot has been deleted.
    #[error("no coroutine with id {0}")]
    InvalidId(CoroutineId),

    #[error("coroutine {id} cannot be entered while {status}")]
    NotRunnable {
        id: CoroutineId,
        status: CoroutineStatus,
    },

    /// A transfer was requested from inside a coroutine body.
    #[error("coroutine {active} is running; transfers must start from the host context")]
    Busy {
        active: CoroutineId,
    },

    #[error("failed to allocate a coroutine stack: {0}")]
    StackAllocation(#[source] io::Error),

    #[error("execution context operation failed: {0}")]
    Context(#[source] io::Error),
}

pub type Result<T> = ::std::result::Result<T, ScheduleError>;
