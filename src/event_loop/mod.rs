//! Event Loop Host
//!
//! Schedulers never run on their own: they ask a [`Host`] to run a job "soon"
//! (a microtask turn) or "later" (a timer). This module defines that host
//! interface and provides [`EventLoop`], a deterministic implementation with
//! proper microtask and macrotask queue semantics:
//!
//!   1. Drain all microtasks (budget-limited)
//!   2. Run one due timer, advancing virtual time if none is due yet
//!   3. Repeat until both queues are empty
//!
//! Time is virtual, so timer-driven scheduling is reproducible in tests.
//! Jobs always run with no internal lock held, so a job may queue more
//! microtasks or timers on the same loop.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A unit of host-level work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Host execution primitives a scheduler strategy builds on.
pub trait Host: Send + Sync {
    /// Run `job` on the next microtask turn.
    fn queue_microtask(&self, job: Job);

    /// Run `job` as a macrotask once `delay` has elapsed.
    fn set_timeout(&self, job: Job, delay: Duration);
}

/// A timer waiting to fire.
struct Macrotask {
    /// Unique timer ID
    id: u64,
    /// When the timer should fire (virtual time in ms)
    fire_at: u64,
    job: Job,
}

/// Result of running the event loop via [`EventLoop::run_until_idle`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of full event loop iterations
    pub iterations: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total macrotasks processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of event loop ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Longest tick duration in milliseconds (wall-clock)
    pub longest_tick_ms: u64,
}

struct LoopState {
    microtask_queue: VecDeque<Job>,
    macrotask_queue: Vec<Macrotask>,
    virtual_time: u64,
    next_timer_id: u64,
    stats: EventLoopStats,
}

/// Deterministic single-threaded host with microtask and timer queues.
///
/// `EventLoop` is `Send + Sync`: jobs may be queued from any thread, and
/// whichever thread calls [`EventLoop::run_until_idle`] executes them.
pub struct EventLoop {
    state: Mutex<LoopState>,
    /// Maximum microtasks to drain per tick (starvation protection)
    max_microtasks_per_tick: usize,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventLoop")
            .field("microtasks", &state.microtask_queue.len())
            .field("macrotasks", &state.macrotask_queue.len())
            .field("virtual_time", &state.virtual_time)
            .field("max_microtasks_per_tick", &self.max_microtasks_per_tick)
            .finish()
    }
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> Self {
        Self::with_microtask_budget(10_000)
    }

    /// Create an event loop draining at most `budget` microtasks per tick
    pub fn with_microtask_budget(budget: usize) -> Self {
        Self {
            state: Mutex::new(LoopState {
                microtask_queue: VecDeque::new(),
                macrotask_queue: Vec::new(),
                virtual_time: 0,
                next_timer_id: 1,
                stats: EventLoopStats::default(),
            }),
            max_microtasks_per_tick: budget.max(1),
        }
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.state.lock().virtual_time
    }

    /// Schedule a timer, returning its ID
    pub fn schedule_timer(&self, job: Job, delay_ms: u64) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let fire_at = state.virtual_time + delay_ms;
        state.macrotask_queue.push(Macrotask { id, fire_at, job });
        id
    }

    /// Cancel a timer by ID, returning whether it was still pending
    pub fn cancel_timer(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.macrotask_queue.len();
        state.macrotask_queue.retain(|t| t.id != id);
        state.macrotask_queue.len() != before
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        let state = self.state.lock();
        !state.microtask_queue.is_empty() || !state.macrotask_queue.is_empty()
    }

    /// Drain microtasks up to the per-tick budget, returning how many ran
    pub fn drain_microtasks(&self) -> usize {
        let mut drained = 0;
        while drained < self.max_microtasks_per_tick {
            let job = self.state.lock().microtask_queue.pop_front();
            match job {
                Some(job) => {
                    job();
                    drained += 1;
                }
                None => break,
            }
        }

        let mut state = self.state.lock();
        state.stats.total_microtasks += drained as u64;
        if drained as u64 > state.stats.max_microtasks_per_tick {
            state.stats.max_microtasks_per_tick = drained as u64;
        }
        drained
    }

    /// Remove the earliest due timer, advancing virtual time to it when
    /// nothing is due yet
    fn next_macrotask(&self) -> Option<Job> {
        let mut state = self.state.lock();
        let idx = state
            .macrotask_queue
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.fire_at, t.id))
            .map(|(i, _)| i)?;
        let task = state.macrotask_queue.remove(idx);
        if task.fire_at > state.virtual_time {
            state.virtual_time = task.fire_at;
        }
        state.stats.total_macrotasks += 1;
        Some(task.job)
    }

    /// Run one iteration: drain microtasks, then run at most one timer.
    ///
    /// Returns `(microtasks, ran_macrotask)`.
    pub fn tick(&self) -> (usize, bool) {
        let tick_start = Instant::now();

        let drained = self.drain_microtasks();
        let ran_macrotask = match self.next_macrotask() {
            Some(job) => {
                job();
                true
            }
            None => false,
        };

        let tick_elapsed = tick_start.elapsed().as_millis() as u64;
        let mut state = self.state.lock();
        if tick_elapsed > state.stats.longest_tick_ms {
            state.stats.longest_tick_ms = tick_elapsed;
        }
        state.stats.total_ticks += 1;
        (drained, ran_macrotask)
    }

    /// Run the event loop until no microtasks and no timers remain.
    pub fn run_until_idle(&self) -> RunResult {
        let mut result = RunResult::default();

        loop {
            let (drained, ran_macrotask) = self.tick();
            result.microtasks_processed += drained;
            if ran_macrotask {
                result.macrotasks_processed += 1;
            }
            if drained == 0 && !ran_macrotask && !self.has_pending_work() {
                break;
            }
            result.iterations += 1;
        }

        result.final_time = self.current_time();
        tracing::trace!(
            microtasks = result.microtasks_processed,
            macrotasks = result.macrotasks_processed,
            final_time = result.final_time,
            "event loop idle"
        );
        result
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.state.lock().stats.clone()
    }
}

impl Host for EventLoop {
    fn queue_microtask(&self, job: Job) {
        self.state.lock().microtask_queue.push_back(job);
    }

    fn set_timeout(&self, job: Job, delay: Duration) {
        self.schedule_timer(job, delay.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let make = move |name: &'static str| -> Job {
            let l = Arc::clone(&l);
            Box::new(move || l.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_microtasks_run_before_timers() {
        let ev = EventLoop::new();
        let (log, job) = recorder();
        ev.set_timeout(job("timer"), Duration::ZERO);
        ev.queue_microtask(job("micro1"));
        ev.queue_microtask(job("micro2"));

        let result = ev.run_until_idle();
        assert_eq!(*log.lock(), vec!["micro1", "micro2", "timer"]);
        assert_eq!(result.microtasks_processed, 2);
        assert_eq!(result.macrotasks_processed, 1);
    }

    #[test]
    fn test_timers_fire_in_virtual_time_order() {
        let ev = EventLoop::new();
        let (log, job) = recorder();
        ev.set_timeout(job("late"), Duration::from_millis(50));
        ev.set_timeout(job("early"), Duration::from_millis(10));

        let result = ev.run_until_idle();
        assert_eq!(*log.lock(), vec!["early", "late"]);
        assert_eq!(result.final_time, 50);
    }

    #[test]
    fn test_jobs_can_reenter_the_loop() {
        let ev = Arc::new(EventLoop::new());
        let (log, job) = recorder();
        let inner_ev = Arc::clone(&ev);
        let inner = job("nested");
        ev.queue_microtask(Box::new(move || inner_ev.queue_microtask(inner)));

        ev.run_until_idle();
        assert_eq!(*log.lock(), vec!["nested"]);
    }

    #[test]
    fn test_microtask_budget_limits_a_single_drain() {
        let ev = EventLoop::with_microtask_budget(2);
        let (log, job) = recorder();
        for name in ["a", "b", "c"] {
            ev.queue_microtask(job(name));
        }
        assert_eq!(ev.drain_microtasks(), 2);
        assert_eq!(ev.drain_microtasks(), 1);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(ev.stats().max_microtasks_per_tick, 2);
    }

    #[test]
    fn test_cancel_timer() {
        let ev = EventLoop::new();
        let (log, job) = recorder();
        let id = ev.schedule_timer(job("never"), 5);
        assert!(ev.cancel_timer(id));
        assert!(!ev.cancel_timer(id));
        ev.run_until_idle();
        assert!(log.lock().is_empty());
    }
}
