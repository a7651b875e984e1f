//! Integration tests for the fiber runtime

mod common;

use std::io::Write;
use std::sync::Arc;

use filament::async_input::SingleProducerAsyncInput;
use filament::config::RuntimeConfig;
use filament::deferred::Deferred;
use filament::fiber_refs::{current_scheduler, max_ops_before_yield, scheduling_priority};
use filament::runtime::{self, Runtime};
use filament::scheduler::{ControlledScheduler, SchedulerRef};
use filament::Error;
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

mod yielding {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Every `yield_now` suspends, resuming at `priority`.
    fn worker(
        log: Log,
        name: &'static str,
        priority: i32,
        rounds: usize,
    ) -> impl std::future::Future<Output = ()> {
        async move {
            runtime::set_ref(max_ops_before_yield(), 0);
            runtime::set_ref(scheduling_priority(), priority);
            for round in 0..rounds {
                log.lock().push(format!("{name}{round}"));
                runtime::yield_now().await;
            }
        }
    }

    #[test]
    fn test_yielding_fibers_interleave() {
        common::init_test_logging();
        let rt = Runtime::new();
        let log: Log = Arc::default();
        let a = rt.spawn(worker(Arc::clone(&log), "a", 0, 3));
        let b = rt.spawn(worker(Arc::clone(&log), "b", 0, 3));
        rt.run_until_idle();

        assert!(a.is_done() && b.is_done());
        assert_eq!(*log.lock(), vec!["a0", "b0", "a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_yield_priority_orders_resumes() {
        let rt = Runtime::new();
        let log: Log = Arc::default();
        rt.spawn(worker(Arc::clone(&log), "low", 5, 2));
        rt.spawn(worker(Arc::clone(&log), "high", -5, 2));
        rt.run_until_idle();

        assert_eq!(*log.lock(), vec!["low0", "high0", "high1", "low1"]);
    }

    #[test]
    fn test_under_budget_yield_does_not_suspend() {
        let rt = Runtime::new();
        let handle = rt.spawn(async {
            for _ in 0..100 {
                runtime::yield_now().await;
            }
        });
        rt.run_until_idle();
        assert!(handle.is_done());
        // One resumption, no reschedules.
        assert_eq!(rt.mixed_scheduler().stats().tasks_run, 1);
    }
}

mod interruption {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_interrupting_blocked_taker_releases_its_slot() {
        let rt = Runtime::new();
        let input = SingleProducerAsyncInput::<String, u32, ()>::new();
        let taker = rt.spawn({
            let input = input.clone();
            async move { input.take().await }
        });
        rt.run_until_idle();
        assert_eq!(input.waiting_consumers(), 1);

        assert!(taker.interrupt());
        assert_eq!(input.waiting_consumers(), 0);
        assert!(matches!(taker.try_result(), Some(Err(Error::Interrupted(_)))));
        assert!(!taker.interrupt());

        let stats = rt.stats();
        assert_eq!(stats.fibers_interrupted, 1);
        assert_eq!(stats.live_fibers, 0);
    }

    #[test]
    fn test_join_of_interrupted_child_fails() {
        let rt = Runtime::new();
        let gate = Deferred::<()>::new();

        let outcome = rt.block_on({
            let gate = gate.clone();
            async move {
                let child = runtime::fork(async move { gate.wait().await })?;
                let child_id = child.id();
                child.interrupt();
                let joined = child.join().await;
                Ok::<_, Error>((child_id, joined))
            }
        });

        match outcome {
            Ok(Ok((child_id, Err(Error::Interrupted(by))))) => assert_eq!(by.fiber, child_id),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!gate.is_done());
    }

    #[test]
    fn test_interrupt_withdraws_pending_yield_resume() {
        let rt = Runtime::new();
        let controlled = Arc::new(ControlledScheduler::new());
        let resumed = Arc::new(Mutex::new(false));

        let handle = rt.spawn({
            let sched = SchedulerRef::from(Arc::clone(&controlled));
            let resumed = Arc::clone(&resumed);
            async move {
                runtime::set_ref(current_scheduler(), Some(sched));
                runtime::set_ref(max_ops_before_yield(), 0);
                runtime::yield_now().await;
                *resumed.lock() = true;
            }
        });
        rt.run_until_idle();
        assert_eq!(controlled.pending(), 1);

        assert!(handle.interrupt());
        assert_eq!(controlled.pending(), 0);
        assert_eq!(controlled.flush(), 0);
        assert!(!*resumed.lock());
        assert!(matches!(handle.try_result(), Some(Err(Error::Interrupted(_)))));
    }

    #[test]
    fn test_wake_after_interrupt_is_ignored() {
        let rt = Runtime::new();
        let gate = Deferred::<u8>::new();
        let waiter = rt.spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });
        rt.run_until_idle();
        waiter.interrupt();

        assert!(gate.succeed(1));
        let result = rt.run_until_idle();
        assert_eq!(result.microtasks_processed, 0);
        assert!(matches!(waiter.try_result(), Some(Err(Error::Interrupted(_)))));
    }
}

mod configuration {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_root_fibers_start_from_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "maxOpsBeforeYield": 16, "schedulingPriority": 3 }}"#).unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        let rt = Runtime::with_config(config).unwrap();

        let seen = rt.block_on(async {
            let child = runtime::fork(async {
                (
                    runtime::get_ref(max_ops_before_yield()),
                    runtime::get_ref(scheduling_priority()),
                )
            })?;
            child.join().await
        });
        assert_eq!(seen.ok().and_then(|r| r.ok()), Some((16, 3)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            microtask_budget: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(Runtime::with_config(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_runtimes_are_independent() {
        let first = Runtime::new();
        let second = Runtime::new();
        first.spawn(async {});
        assert_eq!(first.stats().live_fibers, 1);
        assert_eq!(second.stats().live_fibers, 0);
        second.run_until_idle();
        assert_eq!(first.stats().live_fibers, 1);
        first.run_until_idle();
        assert_eq!(first.stats().live_fibers, 0);
    }
}
