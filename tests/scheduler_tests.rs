//! Integration tests for scheduler strategies
//!
//! Every strategy shares the drain contract: a snapshot runs lowest priority
//! first, FIFO within a priority, and work scheduled while draining is picked
//! up by a later cycle.

mod common;

use std::sync::Arc;

use filament::event_loop::{EventLoop, Host};
use filament::scheduler::{
    ControlledScheduler, MatrixScheduler, MixedScheduler, Priority, Scheduler, SyncScheduler,
    Task,
};
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, name: &str) -> Task {
    let log = Arc::clone(log);
    let name = name.to_string();
    Task::new(move || log.lock().push(name))
}

fn mixed(max_next_tick_before_timer: u32) -> (Arc<EventLoop>, MixedScheduler) {
    let event_loop = Arc::new(EventLoop::new());
    let host: Arc<dyn Host> = event_loop.clone();
    (event_loop, MixedScheduler::new(host, max_next_tick_before_timer))
}

mod ordering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tasks_scheduled_before_drain_run_by_priority() {
        common::init_test_logging();
        let (event_loop, scheduler) = mixed(2048);
        let log = log();
        scheduler.schedule_task(record(&log, "a"), 0);
        scheduler.schedule_task(record(&log, "b"), 0);
        scheduler.schedule_task(record(&log, "c"), 1);

        assert!(log.lock().is_empty());
        event_loop.run_until_idle();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fifo_within_one_priority() {
        let scheduler = ControlledScheduler::new();
        let log = log();
        for i in 0..50 {
            scheduler.schedule_task(record(&log, &i.to_string()), 7);
        }
        scheduler.flush();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*log.lock(), expected);
    }

    #[test]
    fn test_lower_priority_values_first() {
        let scheduler = ControlledScheduler::new();
        let log = log();
        for (name, priority) in [("p5", 5), ("n3", -3), ("p0", 0), ("n3b", -3), ("p1", 1)] {
            scheduler.schedule_task(record(&log, name), priority);
        }
        scheduler.flush();
        assert_eq!(*log.lock(), vec!["n3", "n3b", "p0", "p1", "p5"]);
    }

    #[test]
    fn test_reentrant_schedules_join_a_later_cycle() {
        let scheduler = Arc::new(ControlledScheduler::new());
        let log = log();
        {
            let inner_scheduler = Arc::clone(&scheduler);
            let inner_log = Arc::clone(&log);
            scheduler.schedule_task(
                Task::new(move || {
                    inner_log.lock().push("outer".into());
                    // Lower priority value, but the current snapshot is
                    // already running.
                    inner_scheduler.schedule_task(record(&inner_log, "inner"), -100);
                }),
                0,
            );
        }
        scheduler.schedule_task(record(&log, "sibling"), 1);

        assert_eq!(scheduler.step(), 2);
        assert_eq!(*log.lock(), vec!["outer", "sibling"]);
        assert_eq!(scheduler.pending(), 1);
        scheduler.flush();
        assert_eq!(*log.lock(), vec!["outer", "sibling", "inner"]);
    }
}

mod progress {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Reschedules itself `remaining` more times.
    fn chain(scheduler: MixedScheduler, count: Arc<Mutex<u32>>, remaining: u32) -> Task {
        Task::new(move || {
            *count.lock() += 1;
            if remaining > 0 {
                let next = chain(scheduler.clone(), Arc::clone(&count), remaining - 1);
                scheduler.schedule_task(next, 0);
            }
        })
    }

    #[test]
    fn test_sustained_rescheduling_moves_to_timer() {
        let (event_loop, scheduler) = mixed(4);
        let count = Arc::new(Mutex::new(0));
        scheduler.schedule_task(chain(scheduler.clone(), Arc::clone(&count), 20), 0);

        let result = event_loop.run_until_idle();
        assert_eq!(*count.lock(), 21);
        assert!(result.macrotasks_processed > 0);
        let stats = scheduler.stats();
        assert_eq!(stats.tasks_run, 21);
        assert!(stats.timer_yields >= 1);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_host_timer_not_starved_by_microtask_drain() {
        let (event_loop, scheduler) = mixed(4);
        let count = Arc::new(Mutex::new(0));
        let fired_at = Arc::new(Mutex::new(None));
        {
            let count = Arc::clone(&count);
            let fired_at = Arc::clone(&fired_at);
            event_loop.set_timeout(
                Box::new(move || *fired_at.lock() = Some(*count.lock())),
                std::time::Duration::ZERO,
            );
        }
        scheduler.schedule_task(chain(scheduler.clone(), Arc::clone(&count), 100), 0);
        event_loop.run_until_idle();

        assert_eq!(*count.lock(), 101);
        let fired_at = fired_at.lock().unwrap_or(u32::MAX);
        assert!(fired_at < 101, "host timer waited for the whole chain");
    }
}

mod cancellation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cancelled_task_never_runs() {
        let (event_loop, scheduler) = mixed(2048);
        let log = log();
        let (task, cancel) = {
            let log = Arc::clone(&log);
            Task::cancellable(move || log.lock().push("cancelled".into()))
        };
        scheduler.schedule_task(task, 0);
        scheduler.schedule_task(record(&log, "kept"), 0);
        cancel.cancel();

        event_loop.run_until_idle();
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(scheduler.stats().tasks_run, 1);
    }

    #[test]
    fn test_controlled_pending_excludes_cancelled() {
        let scheduler = ControlledScheduler::new();
        let (task, cancel) = Task::cancellable(|| {});
        scheduler.schedule_task(task, 0);
        scheduler.schedule_task(Task::new(|| {}), 0);
        cancel.cancel();
        assert_eq!(scheduler.pending(), 1);
    }
}

mod composition {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matrix_routes_then_sync_forwards() {
        let low = Arc::new(ControlledScheduler::new());
        let high = Arc::new(ControlledScheduler::new());
        let fallback = Arc::new(ControlledScheduler::new());
        let layers: Vec<(Priority, Arc<dyn Scheduler>)> = vec![
            (0, low.clone() as Arc<dyn Scheduler>),
            (10, high.clone() as Arc<dyn Scheduler>),
        ];
        let matrix = MatrixScheduler::new(layers, fallback.clone());

        let log = log();
        matrix.schedule_task(record(&log, "neg"), -1);
        matrix.schedule_task(record(&log, "low"), 3);
        matrix.schedule_task(record(&log, "high"), 10);
        assert_eq!((fallback.pending(), low.pending(), high.pending()), (1, 1, 1));

        high.flush();
        low.flush();
        fallback.flush();
        assert_eq!(*log.lock(), vec!["high", "low", "neg"]);
    }

    #[test]
    fn test_sync_scheduler_defers_after_flush() {
        let fallback = Arc::new(ControlledScheduler::new());
        let sync = SyncScheduler::new(fallback.clone());
        let log = log();

        sync.schedule_task(record(&log, "sync"), 0);
        sync.flush();
        assert_eq!(*log.lock(), vec!["sync"]);
        assert!(sync.is_deferred());

        sync.schedule_task(record(&log, "deferred"), 0);
        assert_eq!(sync.pending(), 0);
        assert_eq!(fallback.pending(), 1);
        fallback.flush();
        assert_eq!(*log.lock(), vec!["sync", "deferred"]);
    }
}
