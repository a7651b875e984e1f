//! Fiber Scheduling
//!
//! The scheduler decides *whether* a running fiber should give up its
//! execution context ([`Scheduler::should_yield`]) and *how* a ready task is
//! queued and eventually invoked ([`Scheduler::schedule_task`]).
//!
//! The interpreter consults `should_yield` after every step; on a `Some`
//! result it suspends the fiber and hands its resume closure to
//! `schedule_task` at the returned priority.
//!
//! # Strategies
//!
//! | Strategy | Drain trigger |
//! |----------|---------------|
//! | [`MixedScheduler`] | microtask turns, falling back to a timer after a configured depth |
//! | [`BatchedScheduler`] | a caller-supplied trigger ([`timer_batched`] uses a host timer) |
//! | [`FnScheduler`] | none, each task is handed straight to a closure ([`timer`]) |
//! | [`ControlledScheduler`] | explicit [`ControlledScheduler::step`] / [`ControlledScheduler::flush`] |
//! | [`SyncScheduler`] | explicit flush, then forwards to a fallback |
//! | [`MatrixScheduler`] | delegates to a child chosen by priority range |
//!
//! All batching strategies share the drain contract: swap the whole bucket
//! list out, run the snapshot lowest-priority-first and FIFO within a
//! priority, and repeat while re-entrant schedules left work behind.
//!
//! None of the operations here can fail. A panicking task is not caught:
//! tasks wrap interpreter steps that already convert failures.

mod batched;
mod buckets;
mod controlled;
mod matrix;
mod mixed;
mod sync;

pub use batched::{make_batched, timer_batched, BatchedScheduler};
pub use buckets::PriorityBuckets;
pub use controlled::ControlledScheduler;
pub use matrix::MatrixScheduler;
pub use mixed::MixedScheduler;
pub use sync::SyncScheduler;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::event_loop::{Host, Job};
use crate::fiber::FiberId;

/// Scheduling priority. Lower values drain first.
pub type Priority = i32;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of resumable work: a zero-argument closure run at most once.
pub struct Task {
    run: Box<dyn FnOnce() + Send + 'static>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl Task {
    /// Wrap a closure as a task
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            run: Box::new(f),
            cancelled: None,
        }
    }

    /// Wrap a closure together with a handle that can withdraw it before it
    /// runs
    pub fn cancellable(f: impl FnOnce() + Send + 'static) -> (Self, TaskCancel) {
        let flag = Arc::new(AtomicBool::new(false));
        let task = Self {
            run: Box::new(f),
            cancelled: Some(Arc::clone(&flag)),
        };
        (task, TaskCancel { flag })
    }

    /// Returns `true` if the task's cancel handle fired
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Invoke the task unless it was cancelled. Returns whether it ran.
    pub fn run(self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        (self.run)();
        true
    }

    /// Convert into a host job
    pub fn into_job(self) -> Job {
        Box::new(move || {
            self.run();
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("cancellable", &self.cancelled.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle that withdraws a [`Task`] created by [`Task::cancellable`].
#[derive(Debug, Clone)]
pub struct TaskCancel {
    flag: Arc<AtomicBool>,
}

impl TaskCancel {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Scheduler interface
// ---------------------------------------------------------------------------

/// The view of a running fiber that `should_yield` needs.
///
/// Implementations must answer in O(1) without allocating: the interpreter
/// asks after every step.
pub trait RunningFiber {
    fn id(&self) -> FiberId;
    /// Synchronous steps executed since the fiber last resumed
    fn current_op_count(&self) -> u32;
    /// Value of the fiber's `MAX_OPS_BEFORE_YIELD` ref
    fn max_ops_before_yield(&self) -> u32;
    /// Value of the fiber's `SCHEDULING_PRIORITY` ref
    fn scheduling_priority(&self) -> Priority;
}

/// Yield once the op counter exceeds the fiber's threshold, at the fiber's
/// own scheduling priority.
#[inline]
pub fn default_should_yield(fiber: &dyn RunningFiber) -> Option<Priority> {
    if fiber.current_op_count() > fiber.max_ops_before_yield() {
        Some(fiber.scheduling_priority())
    } else {
        None
    }
}

/// A scheduling strategy.
pub trait Scheduler: Send + Sync {
    /// `Some(priority)` if `fiber` should suspend and resume at `priority`.
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        default_should_yield(fiber)
    }

    /// Queue `task` at `priority`, starting a drain if the scheduler is idle.
    fn schedule_task(&self, task: Task, priority: Priority);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        (**self).should_yield(fiber)
    }

    fn schedule_task(&self, task: Task, priority: Priority) {
        (**self).schedule_task(task, priority)
    }
}

/// Shared scheduler handle, comparable by identity.
///
/// This is the value type of the `CURRENT_SCHEDULER` fiber ref.
#[derive(Clone)]
pub struct SchedulerRef(pub Arc<dyn Scheduler>);

impl SchedulerRef {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self(Arc::new(scheduler))
    }

    pub fn get(&self) -> &Arc<dyn Scheduler> {
        &self.0
    }
}

impl Scheduler for SchedulerRef {
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        self.0.should_yield(fiber)
    }

    fn schedule_task(&self, task: Task, priority: Priority) {
        self.0.schedule_task(task, priority)
    }
}

impl PartialEq for SchedulerRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SchedulerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchedulerRef({:p})", Arc::as_ptr(&self.0))
    }
}

impl<S: Scheduler + 'static> From<Arc<S>> for SchedulerRef {
    fn from(scheduler: Arc<S>) -> Self {
        Self(scheduler)
    }
}

// ---------------------------------------------------------------------------
// FnScheduler
// ---------------------------------------------------------------------------

type ScheduleFn = dyn Fn(Task, Priority) + Send + Sync;
type ShouldYieldFn = dyn Fn(&dyn RunningFiber) -> Option<Priority> + Send + Sync;

/// A scheduler assembled from closures.
pub struct FnScheduler {
    schedule: Box<ScheduleFn>,
    should_yield: Box<ShouldYieldFn>,
}

impl fmt::Debug for FnScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnScheduler").finish_non_exhaustive()
    }
}

impl Scheduler for FnScheduler {
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        (self.should_yield)(fiber)
    }

    fn schedule_task(&self, task: Task, priority: Priority) {
        (self.schedule)(task, priority)
    }
}

/// Build a scheduler from a scheduling closure, yielding per
/// [`default_should_yield`].
pub fn make(schedule: impl Fn(Task, Priority) + Send + Sync + 'static) -> FnScheduler {
    make_with_yield(schedule, default_should_yield)
}

/// Build a scheduler from a scheduling closure and a yield policy.
pub fn make_with_yield(
    schedule: impl Fn(Task, Priority) + Send + Sync + 'static,
    should_yield: impl Fn(&dyn RunningFiber) -> Option<Priority> + Send + Sync + 'static,
) -> FnScheduler {
    FnScheduler {
        schedule: Box::new(schedule),
        should_yield: Box::new(should_yield),
    }
}

/// A scheduler that hands every task to its own host timer.
///
/// Priority is ignored: ordering is the host's timer order.
pub fn timer(host: Arc<dyn Host>, delay: Duration) -> FnScheduler {
    make(move |task, _priority| host.set_timeout(task.into_job(), delay))
}
