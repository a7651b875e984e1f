//! Manually stepped scheduler for deterministic tests
//!
//! Tasks accumulate until the owner calls [`ControlledScheduler::step`]
//! (one drain pass over a snapshot) or [`ControlledScheduler::flush`]
//! (repeat passes until nothing is left).

use parking_lot::Mutex;

use super::{Priority, PriorityBuckets, Scheduler, Task};

/// Scheduler that never drains on its own.
#[derive(Debug, Default)]
pub struct ControlledScheduler {
    tasks: Mutex<PriorityBuckets>,
}

impl ControlledScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run exactly one drain pass over the tasks queued right now.
    ///
    /// Tasks scheduled while the pass runs wait for the next call. Returns
    /// how many tasks ran.
    pub fn step(&self) -> usize {
        let to_run = self.tasks.lock().take();
        to_run.run_all()
    }

    /// Step until the queue stays empty, returning how many tasks ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        while !self.tasks.lock().is_empty() {
            ran += self.step();
        }
        ran
    }

    /// Number of live tasks waiting to run
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.remove_cancelled();
        tasks.len()
    }
}

impl Scheduler for ControlledScheduler {
    fn schedule_task(&self, task: Task, priority: Priority) {
        self.tasks.lock().schedule_task(task, priority);
    }
}
