//! Microtask-draining scheduler
//!
//! Drain cycles run on host microtask turns. Under sustained re-entrant
//! scheduling the scheduler counts consecutive microtask cycles and, after
//! `max_next_tick_before_timer` of them, continues on a zero-delay timer
//! instead, so host-level work queued behind the microtasks (I/O callbacks,
//! timers) is not starved.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Priority, PriorityBuckets, Scheduler, Task};
use crate::event_loop::Host;

/// Counters describing a mixed scheduler's drain activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedSchedulerStats {
    /// Tasks accepted by `schedule_task`
    pub tasks_scheduled: u64,
    /// Tasks actually invoked
    pub tasks_run: u64,
    /// Drain cycles executed
    pub drain_cycles: u64,
    /// Times the drain moved from microtasks to a timer
    pub timer_yields: u64,
}

struct MixedState {
    running: bool,
    tasks: PriorityBuckets,
    stats: MixedSchedulerStats,
}

struct MixedInner {
    host: Arc<dyn Host>,
    max_next_tick_before_timer: u32,
    state: Mutex<MixedState>,
}

/// The default scheduler strategy.
#[derive(Clone)]
pub struct MixedScheduler {
    inner: Arc<MixedInner>,
}

impl fmt::Debug for MixedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MixedScheduler")
            .field("running", &state.running)
            .field("tasks", &state.tasks)
            .field("max_next_tick_before_timer", &self.inner.max_next_tick_before_timer)
            .finish()
    }
}

impl MixedScheduler {
    /// Create a scheduler draining on `host`'s microtask turns, falling back
    /// to a timer after `max_next_tick_before_timer` consecutive cycles
    pub fn new(host: Arc<dyn Host>, max_next_tick_before_timer: u32) -> Self {
        Self {
            inner: Arc::new(MixedInner {
                host,
                max_next_tick_before_timer,
                state: Mutex::new(MixedState {
                    running: false,
                    tasks: PriorityBuckets::new(),
                    stats: MixedSchedulerStats::default(),
                }),
            }),
        }
    }

    /// Returns `true` while a drain cycle is pending or executing
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Number of live tasks waiting for the next drain cycle
    pub fn pending(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.tasks.remove_cancelled();
        state.tasks.len()
    }

    pub fn stats(&self) -> MixedSchedulerStats {
        self.inner.state.lock().stats.clone()
    }
}

impl MixedInner {
    fn starve(self: &Arc<Self>, depth: u32) {
        let inner = Arc::clone(self);
        if depth >= self.max_next_tick_before_timer {
            tracing::debug!(depth, "scheduler yielding to host timer");
            self.state.lock().stats.timer_yields += 1;
            self.host
                .set_timeout(Box::new(move || inner.starve_internal(0)), Duration::ZERO);
        } else {
            self.host
                .queue_microtask(Box::new(move || inner.starve_internal(depth + 1)));
        }
    }

    fn starve_internal(self: &Arc<Self>, depth: u32) {
        let to_run = self.state.lock().tasks.take();
        let ran = to_run.run_all();

        let mut state = self.state.lock();
        state.stats.drain_cycles += 1;
        state.stats.tasks_run += ran as u64;
        tracing::trace!(depth, ran, "drain cycle complete");
        if state.tasks.is_empty() {
            state.running = false;
        } else {
            drop(state);
            self.starve(depth);
        }
    }
}

impl Scheduler for MixedScheduler {
    fn schedule_task(&self, task: Task, priority: Priority) {
        let mut state = self.inner.state.lock();
        state.tasks.schedule_task(task, priority);
        state.stats.tasks_scheduled += 1;
        if !state.running {
            state.running = true;
            drop(state);
            self.inner.starve(0);
        }
    }
}
