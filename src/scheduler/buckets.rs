//! Priority buckets: the queue every batching scheduler drains
//!
//! Buckets are kept sorted by ascending priority and are unique by priority.
//! Tasks inside a bucket keep insertion order, so draining a snapshot runs
//! the lowest priority first and FIFO within a priority.

use std::collections::VecDeque;
use std::fmt;

use super::{Priority, Task};

/// Ordered `(priority, tasks)` buckets.
#[derive(Default)]
pub struct PriorityBuckets {
    buckets: Vec<(Priority, VecDeque<Task>)>,
}

impl PriorityBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task` to the bucket for `priority`, creating the bucket in
    /// sorted position if it does not exist yet.
    pub fn schedule_task(&mut self, task: Task, priority: Priority) {
        match self.buckets.binary_search_by_key(&priority, |(p, _)| *p) {
            Ok(idx) => self.buckets[idx].1.push_back(task),
            Err(idx) => {
                let mut bucket = VecDeque::with_capacity(4);
                bucket.push_back(task);
                self.buckets.insert(idx, (priority, bucket));
            }
        }
    }

    /// Swap out every bucket, leaving this queue empty.
    ///
    /// Tasks scheduled after the swap land in `self`, never in the returned
    /// snapshot, which is what makes a drain pass terminate.
    pub fn take(&mut self) -> PriorityBuckets {
        PriorityBuckets {
            buckets: std::mem::take(&mut self.buckets),
        }
    }

    /// Run every task in ascending-priority, FIFO-within-priority order,
    /// returning how many ran. Cancelled tasks are dropped without running.
    pub fn run_all(self) -> usize {
        let mut ran = 0;
        for (_, tasks) in self.buckets {
            for task in tasks {
                if task.run() {
                    ran += 1;
                }
            }
        }
        ran
    }

    /// Drop tasks whose cancel handle fired, and any bucket left empty.
    pub fn remove_cancelled(&mut self) -> usize {
        let mut removed = 0;
        for (_, tasks) in &mut self.buckets {
            let before = tasks.len();
            tasks.retain(|t| !t.is_cancelled());
            removed += before - tasks.len();
        }
        self.buckets.retain(|(_, tasks)| !tasks.is_empty());
        removed
    }

    /// Returns `true` if no bucket holds a task
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of queued tasks, cancelled ones included
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|(_, tasks)| tasks.len()).sum()
    }

    /// The priorities currently holding tasks, ascending
    pub fn priorities(&self) -> Vec<Priority> {
        self.buckets.iter().map(|(p, _)| *p).collect()
    }
}

impl fmt::Debug for PriorityBuckets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.buckets.iter().map(|(p, tasks)| (p, tasks.len())))
            .finish()
    }
}
