use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::marker::PhantomPinned;
use std::panic::resume_unwind;
use std::pin::Pin;

use crate::co::{Coroutine, CoroutineId, CoroutineStatus};
use crate::context::Context;
use crate::error::{Result, ScheduleError};
use crate::stack_pool::{StackPool, StackPoolConfig};

/// Aggregate state reported by `Scheduler::status`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScheduleStatus {
    Finished = 0,
    Running = 1
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ScheduleStatus::Finished => f.write_str("finished"),
            ScheduleStatus::Running => f.write_str("running")
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Stack size and caching of released stacks.
    pub stack_pool: StackPoolConfig,
    /// Hand out ids of deleted slots again before growing the pool.
    pub reuse_slots: bool
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            stack_pool: StackPoolConfig::default(),
            reuse_slots: true
        }
    }
}

/// Owner of a pool of coroutines and mediator of every transfer of control
/// between them and the host.
///
/// A scheduler lives behind `Pin<Box<_>>`: primed coroutine contexts refer
/// to its address. All operations take `&self`, so coroutine bodies receive
/// the same `&Scheduler` the host uses.
pub struct Scheduler {
    main_ctx: UnsafeCell<Box<Context>>,
    slots: RefCell<Vec<Option<Box<Coroutine>>>>,
    free_slots: RefCell<Vec<CoroutineId>>,
    active: Cell<Option<CoroutineId>>,
    stacks: StackPool,
    reuse_slots: bool,
    _pinned: PhantomPinned
}

impl Scheduler {
    pub fn new() -> Pin<Box<Scheduler>> {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Pin<Box<Scheduler>> {
        debug!(
            "creating scheduler: stack_size={} reuse_slots={}",
            config.stack_pool.default_stack_size, config.reuse_slots
        );
        Box::pin(Scheduler {
            main_ctx: UnsafeCell::new(Context::new()),
            slots: RefCell::new(Vec::new()),
            free_slots: RefCell::new(Vec::new()),
            active: Cell::new(None),
            stacks: StackPool::new(config.stack_pool),
            reuse_slots: config.reuse_slots,
            _pinned: PhantomPinned
        })
    }

    /// Deletes every remaining coroutine, whatever its status, and releases
    /// the pool.
    pub fn close(self: Pin<Box<Self>>) {
        drop(self);
    }

    /// `Running` while a coroutine is active or any existing coroutine is
    /// not dead; `Finished` otherwise.
    pub fn status(&self) -> ScheduleStatus {
        if self.active.get().is_some() {
            return ScheduleStatus::Running;
        }
        let slots = self.slots.borrow();
        let live = slots.iter()
            .filter_map(|s| s.as_ref())
            .any(|c| c.status() != CoroutineStatus::Dead);
        if live {
            ScheduleStatus::Running
        } else {
            ScheduleStatus::Finished
        }
    }

    /// Creates a coroutine that will call `entry(scheduler, argument)` when
    /// first run.
    pub fn create<A: 'static>(&self, entry: fn(&Scheduler, A), argument: A) -> Result<CoroutineId> {
        self.spawn(move |s| entry(s, argument))
    }

    /// Creates a coroutine from a closure. The coroutine starts `Ready` and
    /// does not execute until `run` is called with the returned id.
    pub fn spawn<F: FnOnce(&Scheduler) + 'static>(&self, f: F) -> Result<CoroutineId> {
        let stack = self.stacks.get().map_err(ScheduleError::StackAllocation)?;
        let co = Coroutine::new(stack, Box::new(f));
        unsafe {
            co.prime(self.main_context(), self as *const Scheduler)
                .map_err(ScheduleError::Context)?;
        }

        let reused = if self.reuse_slots {
            self.free_slots.borrow_mut().pop()
        } else {
            None
        };
        let mut slots = self.slots.borrow_mut();
        let id = match reused {
            Some(id) => {
                debug_assert!(slots[id].is_none());
                slots[id] = Some(co);
                id
            },
            None => {
                slots.push(Some(co));
                slots.len() - 1
            }
        };
        debug!("created coroutine {} (reused slot: {})", id, reused.is_some());
        Ok(id)
    }

    /// Releases the slot `id`. Returns `true` for any id below the high-water
    /// mark, whether or not a coroutine occupied it.
    ///
    /// The currently active coroutine cannot be deleted; such a request is
    /// refused and `false` is returned.
    pub fn delete(&self, id: CoroutineId) -> bool {
        if id >= self.high_water_mark() {
            return false;
        }
        if self.active.get() == Some(id) {
            warn!("refusing to delete coroutine {} while it is running", id);
            return false;
        }

        let removed = self.slots.borrow_mut()[id].take();
        if let Some(co) = removed {
            if let Some(stack) = co.take_stack() {
                self.stacks.put(stack);
            }
            if self.reuse_slots {
                self.free_slots.borrow_mut().push(id);
            }
            debug!("deleted coroutine {} (was {})", id, co.status());
            // Dropped outside the slot borrow: an unstarted body may own values
            // whose destructors call back into the scheduler.
            drop(co);
        }
        true
    }

    /// First entry into a coroutine. Also continues a suspended one, like
    /// `resume`.
    pub fn run(&self, id: CoroutineId) -> Result<()> {
        let co = self.lookup(id)?;
        match unsafe { (*co).status() } {
            CoroutineStatus::Ready | CoroutineStatus::Suspended => self.transfer(id, co),
            status => Err(ScheduleError::NotRunnable { id: id, status: status })
        }
    }

    /// Continues a suspended coroutine right after its last `yield_now`.
    pub fn resume(&self, id: CoroutineId) -> Result<()> {
        let co = self.lookup(id)?;
        match unsafe { (*co).status() } {
            CoroutineStatus::Suspended => self.transfer(id, co),
            status => Err(ScheduleError::NotRunnable { id: id, status: status })
        }
    }

    /// Suspends the calling coroutine and returns control to the `run` or
    /// `resume` call that entered it. Does nothing outside a coroutine.
    pub fn yield_now(&self) {
        let id = match self.active.get() {
            Some(id) => id,
            None => {
                trace!("yield outside of any coroutine ignored");
                return;
            }
        };
        let co = match self.lookup(id) {
            Ok(co) => co,
            Err(_) => return
        };

        unsafe {
            (*co).set_status(CoroutineStatus::Suspended);
            self.active.set(None);
            trace!("coroutine {} yields", id);
            if let Err(e) = Context::switch((*co).context(), self.main_context()) {
                error!("coroutine {} failed to yield: {}", id, e);
                (*co).set_status(CoroutineStatus::Running);
                self.active.set(Some(id));
            }
        }
    }

    /// Status of coroutine `id`. Unknown and deleted ids report `Dead`; use
    /// `contains` to tell them apart from finished coroutines.
    pub fn coroutine_status(&self, id: CoroutineId) -> CoroutineStatus {
        match self.slots.borrow().get(id) {
            Some(Some(co)) => co.status(),
            _ => CoroutineStatus::Dead
        }
    }

    /// Whether `id` currently names a coroutine record (finished or not).
    pub fn contains(&self, id: CoroutineId) -> bool {
        match self.slots.borrow().get(id) {
            Some(slot) => slot.is_some(),
            None => false
        }
    }

    /// The coroutine control is currently inside, if any.
    pub fn active(&self) -> Option<CoroutineId> {
        self.active.get()
    }

    /// Number of slots ever allocated. Never decreases.
    pub fn high_water_mark(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body of the coroutine trampoline; runs on the coroutine's own stack.
    pub(crate) fn finish_active(&self) {
        let id = match self.active.get() {
            Some(id) => id,
            None => return
        };
        if let Ok(co) = self.lookup(id) {
            unsafe {
                (*co).run_body(self);
            }
        }
        self.active.set(None);
        trace!("coroutine {} returned", id);
    }

    fn main_context(&self) -> *mut Context {
        unsafe { &mut **self.main_ctx.get() }
    }

    /// Raw pointer to the record in slot `id`. Records are boxed, so the
    /// pointer stays valid until that slot is deleted.
    fn lookup(&self, id: CoroutineId) -> Result<*const Coroutine> {
        match self.slots.borrow().get(id) {
            Some(Some(co)) => Ok(&**co as *const Coroutine),
            _ => Err(ScheduleError::InvalidId(id))
        }
    }

    fn transfer(&self, id: CoroutineId, co: *const Coroutine) -> Result<()> {
        if let Some(active) = self.active.get() {
            return Err(ScheduleError::Busy { active: active });
        }

        let co = unsafe { &*co };
        let previous = co.status();
        co.set_status(CoroutineStatus::Running);
        self.active.set(Some(id));
        trace!("entering coroutine {} ({})", id, previous);

        if let Err(e) = unsafe { Context::switch(self.main_context(), co.context()) } {
            co.set_status(previous);
            self.active.set(None);
            return Err(ScheduleError::Context(e));
        }

        if co.status() == CoroutineStatus::Dead {
            debug!("coroutine {} finished", id);
            // Control is back on the main stack; the dead stack can be recycled.
            if let Some(stack) = co.take_stack() {
                self.stacks.put(stack);
            }
            if let Some(e) = co.take_panic() {
                resume_unwind(e);
            }
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let slots = ::std::mem::replace(self.slots.get_mut(), Vec::new());
        let remaining = slots.iter().filter(|s| s.is_some()).count();
        debug!("closing scheduler with {} coroutine(s) left", remaining);
        drop(slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;

    fn print_values(s: &Scheduler, (name, values, out): (&'static str, Vec<i32>, Rc<RefCell<Vec<String>>>)) {
        for v in values {
            out.borrow_mut().push(format!("{}:{}", name, v));
            s.yield_now();
        }
    }

    #[test]
    fn ids_should_grow_without_deletes() {
        let s = Scheduler::new();
        for k in 0..5 {
            assert_eq!(s.spawn(|_| {}).unwrap(), k);
        }
        assert_eq!(s.high_water_mark(), 5);
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn interleaving_should_follow_host_order() {
        let s = Scheduler::new();
        let out = Rc::new(RefCell::new(Vec::new()));
        let a = s.create(print_values, ("A", vec![1, 2, 3], out.clone())).unwrap();
        let b = s.create(print_values, ("B", vec![4, 5, 6], out.clone())).unwrap();

        s.run(a).unwrap();
        s.run(b).unwrap();
        while s.status() != ScheduleStatus::Finished {
            let _ = s.resume(a);
            let _ = s.resume(b);
        }

        assert_eq!(*out.borrow(), vec!["A:1", "B:4", "A:2", "B:5", "A:3", "B:6"]);
        assert_eq!(s.coroutine_status(a), CoroutineStatus::Dead);
        assert_eq!(s.coroutine_status(b), CoroutineStatus::Dead);
        s.close();
    }

    #[test]
    fn resume_should_preserve_locals() {
        let s = Scheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let id = s.spawn(move |s| {
            let mut acc = 0;
            for i in 1..=3 {
                acc += i;
                s.yield_now();
                seen2.borrow_mut().push(acc);
            }
        }).unwrap();

        s.run(id).unwrap();
        for _ in 0..3 {
            s.resume(id).unwrap();
        }
        assert_eq!(*seen.borrow(), vec![1, 3, 6]);
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
    }

    #[test]
    fn status_should_walk_the_state_machine() {
        let s = Scheduler::new();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let observed2 = observed.clone();
        let id = s.spawn(move |s| {
            let me = s.active().unwrap();
            observed2.borrow_mut().push(s.coroutine_status(me));
            s.yield_now();
            observed2.borrow_mut().push(s.coroutine_status(me));
        }).unwrap();

        assert_eq!(s.coroutine_status(id), CoroutineStatus::Ready);
        s.run(id).unwrap();
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Suspended);
        s.resume(id).unwrap();
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
        assert_eq!(*observed.borrow(), vec![CoroutineStatus::Running, CoroutineStatus::Running]);
    }

    #[test]
    fn n_resumes_should_finish_after_n_minus_one_yields() {
        let s = Scheduler::new();
        let id = s.spawn(|s| {
            for _ in 0..4 {
                s.yield_now();
            }
        }).unwrap();

        s.run(id).unwrap();
        for _ in 0..3 {
            assert_eq!(s.coroutine_status(id), CoroutineStatus::Suspended);
            s.resume(id).unwrap();
        }
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Suspended);
        s.resume(id).unwrap();
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
    }

    #[test]
    fn instant_termination_should_work() {
        let s = Scheduler::new();
        let id = s.spawn(|_| {}).unwrap();
        assert_eq!(s.status(), ScheduleStatus::Running);
        s.run(id).unwrap();
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
        assert_eq!(s.status(), ScheduleStatus::Finished);
        assert!(s.active().is_none());
    }

    #[test]
    fn empty_scheduler_should_be_finished() {
        let s = Scheduler::new();
        assert_eq!(s.status(), ScheduleStatus::Finished);
        assert!(s.is_empty());
    }

    #[test]
    fn invalid_ids_should_be_no_ops() {
        let s = Scheduler::new();
        let id = s.spawn(|s| s.yield_now()).unwrap();

        match s.run(7) {
            Err(ScheduleError::InvalidId(7)) => {},
            other => panic!("unexpected result: {:?}", other)
        }
        assert!(s.resume(7).is_err());
        assert_eq!(s.coroutine_status(7), CoroutineStatus::Dead);
        assert!(!s.contains(7));
        assert!(!s.delete(7));

        assert_eq!(s.coroutine_status(id), CoroutineStatus::Ready);
        assert_eq!(s.high_water_mark(), 1);
        assert!(s.active().is_none());
    }

    #[test]
    fn wrong_state_should_be_refused() {
        let s = Scheduler::new();
        let id = s.spawn(|_| {}).unwrap();

        // Resume only continues suspended coroutines.
        match s.resume(id) {
            Err(ScheduleError::NotRunnable { status: CoroutineStatus::Ready, .. }) => {},
            other => panic!("unexpected result: {:?}", other)
        }
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Ready);

        s.run(id).unwrap();
        assert!(s.run(id).is_err());
        assert!(s.resume(id).is_err());
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
    }

    #[test]
    fn run_should_continue_suspended() {
        let s = Scheduler::new();
        let steps = Rc::new(Cell::new(0));
        let steps2 = steps.clone();
        let id = s.spawn(move |s| {
            steps2.set(1);
            s.yield_now();
            steps2.set(2);
        }).unwrap();

        s.run(id).unwrap();
        s.run(id).unwrap();
        assert_eq!(steps.get(), 2);
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
    }

    #[test]
    fn yield_outside_coroutine_should_do_nothing() {
        let s = Scheduler::new();
        let id = s.spawn(|_| {}).unwrap();
        s.yield_now();
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Ready);
        assert!(s.active().is_none());
    }

    #[test]
    fn nested_transfer_should_be_refused() {
        let s = Scheduler::new();
        let refused = Rc::new(Cell::new(false));
        let refused2 = refused.clone();
        let other = s.spawn(|_| {}).unwrap();
        let id = s.spawn(move |s| {
            if let Err(ScheduleError::Busy { .. }) = s.run(other) {
                refused2.set(true);
            }
        }).unwrap();

        s.run(id).unwrap();
        assert!(refused.get());
        assert_eq!(s.coroutine_status(other), CoroutineStatus::Ready);
    }

    #[test]
    fn deleting_active_coroutine_should_be_refused() {
        let s = Scheduler::new();
        let deleted = Rc::new(Cell::new(true));
        let deleted2 = deleted.clone();
        let id = s.spawn(move |s| {
            let me = s.active().unwrap();
            deleted2.set(s.delete(me));
        }).unwrap();

        s.run(id).unwrap();
        assert!(!deleted.get());
        assert!(s.contains(id));
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
    }

    #[test]
    fn deletion_should_free_identity() {
        let s = Scheduler::new();
        let resumed = Rc::new(Cell::new(false));
        let resumed2 = resumed.clone();
        let id = s.spawn(move |s| {
            s.yield_now();
            resumed2.set(true);
        }).unwrap();

        s.run(id).unwrap();
        assert!(s.delete(id));
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
        assert!(!s.contains(id));
        assert!(s.resume(id).is_err());
        assert!(!resumed.get());

        // In range but empty still counts as a successful delete.
        assert!(s.delete(id));
        assert_eq!(s.status(), ScheduleStatus::Finished);
    }

    #[test]
    fn deleted_slots_should_be_reused() {
        let s = Scheduler::new();
        let a = s.spawn(|_| {}).unwrap();
        let b = s.spawn(|_| {}).unwrap();
        s.run(a).unwrap();

        // Dead but not deleted: the id still denotes the finished coroutine.
        assert_eq!(s.spawn(|_| {}).unwrap(), 2);

        assert!(s.delete(a));
        assert_eq!(s.spawn(|_| {}).unwrap(), a);
        assert_eq!(s.coroutine_status(a), CoroutineStatus::Ready);
        assert_eq!(s.coroutine_status(b), CoroutineStatus::Ready);
        assert_eq!(s.high_water_mark(), 3);
    }

    #[test]
    fn slots_should_grow_when_reuse_is_disabled() {
        let s = Scheduler::with_config(SchedulerConfig {
            reuse_slots: false,
            ..SchedulerConfig::default()
        });
        let a = s.spawn(|_| {}).unwrap();
        assert!(s.delete(a));
        assert_eq!(s.spawn(|_| {}).unwrap(), 1);
        assert_eq!(s.high_water_mark(), 2);
    }

    #[test]
    fn coroutines_should_spawn_coroutines() {
        let s = Scheduler::new();
        let child = Rc::new(Cell::new(None));
        let child2 = child.clone();
        let parent = s.spawn(move |s| {
            child2.set(Some(s.spawn(|s| s.yield_now()).unwrap()));
        }).unwrap();

        s.run(parent).unwrap();
        let child = child.get().unwrap();
        assert_eq!(s.coroutine_status(child), CoroutineStatus::Ready);
        assert_eq!(s.status(), ScheduleStatus::Running);
        s.run(child).unwrap();
        s.resume(child).unwrap();
        assert_eq!(s.status(), ScheduleStatus::Finished);
    }

    #[test]
    fn panics_should_propagate() {
        let s = Scheduler::new();
        let id = s.spawn(|_| {
            panic!("Test panic");
        }).unwrap();

        let e = catch_unwind(AssertUnwindSafe(|| {
            let _ = s.run(id);
        })).err().unwrap();
        let v: &&'static str = e.downcast_ref().unwrap();
        assert_eq!(*v, "Test panic");
        assert_eq!(s.coroutine_status(id), CoroutineStatus::Dead);
        assert!(s.active().is_none());
        assert_eq!(s.status(), ScheduleStatus::Finished);
    }

    #[test]
    fn close_should_drop_suspended_coroutines() {
        let s = Scheduler::new();
        for _ in 0..3 {
            let id = s.spawn(|s| s.yield_now()).unwrap();
            s.run(id).unwrap();
        }
        let unstarted = Rc::new(());
        let held = unstarted.clone();
        s.spawn(move |_| drop(held)).unwrap();

        assert_eq!(s.status(), ScheduleStatus::Running);
        s.close();
        assert_eq!(Rc::strong_count(&unstarted), 1);
    }

    #[test]
    fn oversized_stacks_should_be_reported() {
        let s = Scheduler::with_config(SchedulerConfig {
            stack_pool: StackPoolConfig {
                default_stack_size: usize::max_value() - 10,
                max_pool_size: 1
            },
            ..SchedulerConfig::default()
        });
        match s.spawn(|_| {}) {
            Err(ScheduleError::StackAllocation(_)) => {},
            other => panic!("unexpected result: {:?}", other)
        }
        assert_eq!(s.high_water_mark(), 0);
        assert_eq!(s.status(), ScheduleStatus::Finished);
    }

    #[test]
    fn stacks_should_be_recycled() {
        let s = Scheduler::with_config(SchedulerConfig {
            stack_pool: StackPoolConfig {
                default_stack_size: 32 * 1024,
                max_pool_size: 8
            },
            ..SchedulerConfig::default()
        });
        for _ in 0..16 {
            let id = s.spawn(|s| s.yield_now()).unwrap();
            s.run(id).unwrap();
            s.resume(id).unwrap();
            assert!(s.delete(id));
        }
        assert_eq!(s.stacks.cached(), 1);
        assert_eq!(s.high_water_mark(), 1);
    }
}
