//! Batched scheduler driven by a caller-supplied trigger
//!
//! Same drain contract as the mixed scheduler, but *when* a batch runs is
//! left to a trigger closure. The trigger receives the batch runner and must
//! invoke it exactly once, later.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{default_should_yield, Priority, PriorityBuckets, RunningFiber, Scheduler, Task};
use crate::event_loop::{Host, Job};

type TriggerFn = dyn Fn(Job) + Send + Sync;
type ShouldYieldFn = dyn Fn(&dyn RunningFiber) -> Option<Priority> + Send + Sync;

struct BatchedState {
    running: bool,
    tasks: PriorityBuckets,
}

struct BatchedInner {
    trigger: Box<TriggerFn>,
    should_yield: Box<ShouldYieldFn>,
    state: Mutex<BatchedState>,
}

/// A scheduler whose drain cycles are started by a trigger closure.
#[derive(Clone)]
pub struct BatchedScheduler {
    inner: Arc<BatchedInner>,
}

impl fmt::Debug for BatchedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BatchedScheduler")
            .field("running", &state.running)
            .field("tasks", &state.tasks)
            .finish()
    }
}

impl BatchedScheduler {
    /// Create a batched scheduler with an explicit yield policy
    pub fn with_yield(
        trigger: impl Fn(Job) + Send + Sync + 'static,
        should_yield: impl Fn(&dyn RunningFiber) -> Option<Priority> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(BatchedInner {
                trigger: Box::new(trigger),
                should_yield: Box::new(should_yield),
                state: Mutex::new(BatchedState {
                    running: false,
                    tasks: PriorityBuckets::new(),
                }),
            }),
        }
    }

    /// Number of live tasks waiting for the next batch
    pub fn pending(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.tasks.remove_cancelled();
        state.tasks.len()
    }
}

impl BatchedInner {
    fn starve(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        (self.trigger)(Box::new(move || inner.starve_internal()));
    }

    fn starve_internal(self: &Arc<Self>) {
        let to_run = self.state.lock().tasks.take();
        to_run.run_all();

        let mut state = self.state.lock();
        if state.tasks.is_empty() {
            state.running = false;
        } else {
            drop(state);
            self.starve();
        }
    }
}

impl Scheduler for BatchedScheduler {
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        (self.inner.should_yield)(fiber)
    }

    fn schedule_task(&self, task: Task, priority: Priority) {
        let mut state = self.inner.state.lock();
        state.tasks.schedule_task(task, priority);
        if !state.running {
            state.running = true;
            drop(state);
            self.inner.starve();
        }
    }
}

/// Build a batched scheduler around `trigger`, yielding per
/// [`default_should_yield`]
pub fn make_batched(trigger: impl Fn(Job) + Send + Sync + 'static) -> BatchedScheduler {
    BatchedScheduler::with_yield(trigger, default_should_yield)
}

/// A batched scheduler whose drain cycles run on a host timer
pub fn timer_batched(host: Arc<dyn Host>, delay: Duration) -> BatchedScheduler {
    make_batched(move |run_batch| host.set_timeout(run_batch, delay))
}
