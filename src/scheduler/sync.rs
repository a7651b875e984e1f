//! Synchronous-then-deferred scheduler
//!
//! Queues locally until [`SyncScheduler::flush`] has drained everything once;
//! from then on it is "deferred" and forwards every task to its fallback.
//! This lets a harness run a program fully synchronously up to its first
//! real suspension and then hand it to async scheduling.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Priority, PriorityBuckets, Scheduler, Task};

struct SyncState {
    tasks: PriorityBuckets,
    deferred: bool,
}

/// Scheduler that runs synchronously until flushed, then delegates.
pub struct SyncScheduler {
    state: Mutex<SyncState>,
    fallback: Arc<dyn Scheduler>,
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncScheduler")
            .field("tasks", &state.tasks)
            .field("deferred", &state.deferred)
            .finish()
    }
}

impl SyncScheduler {
    /// Create a scheduler forwarding to `fallback` once deferred
    pub fn new(fallback: Arc<dyn Scheduler>) -> Self {
        Self {
            state: Mutex::new(SyncState {
                tasks: PriorityBuckets::new(),
                deferred: false,
            }),
            fallback,
        }
    }

    /// Drain until empty, then switch to deferred mode. Returns how many
    /// tasks ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let to_run = {
                let mut state = self.state.lock();
                if state.tasks.is_empty() {
                    state.deferred = true;
                    break;
                }
                state.tasks.take()
            };
            ran += to_run.run_all();
        }
        tracing::trace!(ran, "sync scheduler flushed, now deferred");
        ran
    }

    pub fn is_deferred(&self) -> bool {
        self.state.lock().deferred
    }

    /// Number of tasks queued locally
    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

impl Scheduler for SyncScheduler {
    fn schedule_task(&self, task: Task, priority: Priority) {
        let mut state = self.state.lock();
        if state.deferred {
            drop(state);
            self.fallback.schedule_task(task, priority);
        } else {
            state.tasks.schedule_task(task, priority);
        }
    }
}
