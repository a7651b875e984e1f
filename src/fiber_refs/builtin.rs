//! Fiber refs the runtime itself reads

use std::sync::OnceLock;

use super::FiberRef;
use crate::scheduler::{Priority, SchedulerRef};

/// Default op budget before a fiber is asked to yield
pub const DEFAULT_MAX_OPS_BEFORE_YIELD: u32 = 2048;

/// Default scheduling priority of resumed fibers
pub const DEFAULT_SCHEDULING_PRIORITY: Priority = 0;

static MAX_OPS_BEFORE_YIELD: OnceLock<FiberRef<u32>> = OnceLock::new();
static SCHEDULING_PRIORITY: OnceLock<FiberRef<Priority>> = OnceLock::new();
static CURRENT_SCHEDULER: OnceLock<FiberRef<Option<SchedulerRef>>> = OnceLock::new();

/// Synchronous steps a fiber may take before `should_yield` fires
pub fn max_ops_before_yield() -> &'static FiberRef<u32> {
    MAX_OPS_BEFORE_YIELD
        .get_or_init(|| FiberRef::named("max_ops_before_yield", DEFAULT_MAX_OPS_BEFORE_YIELD))
}

/// Priority a fiber is rescheduled at after yielding
pub fn scheduling_priority() -> &'static FiberRef<Priority> {
    SCHEDULING_PRIORITY
        .get_or_init(|| FiberRef::named("scheduling_priority", DEFAULT_SCHEDULING_PRIORITY))
}

/// Scheduler a fiber's resumptions go through.
///
/// `None` means the owning runtime's default scheduler.
pub fn current_scheduler() -> &'static FiberRef<Option<SchedulerRef>> {
    CURRENT_SCHEDULER.get_or_init(|| FiberRef::named("current_scheduler", None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberId;
    use crate::fiber_refs::FiberRefs;
    use crate::scheduler::ControlledScheduler;

    #[test]
    fn test_defaults() {
        let refs = FiberRefs::empty();
        assert_eq!(refs.get_or_default(max_ops_before_yield()), 2048);
        assert_eq!(refs.get_or_default(scheduling_priority()), 0);
        assert!(refs.get_or_default(current_scheduler()).is_none());
    }

    #[test]
    fn test_refs_are_singletons() {
        assert_eq!(max_ops_before_yield(), max_ops_before_yield());
        assert_eq!(max_ops_before_yield().name(), "max_ops_before_yield");
    }

    #[test]
    fn test_scheduler_ref_equality_by_identity() {
        let fiber = FiberId::with_start(1);
        let sched = SchedulerRef::new(ControlledScheduler::new());
        let refs = FiberRefs::empty().update_as(fiber, current_scheduler(), Some(sched.clone()));
        // Same scheduler again is a no-op, a different one replaces it.
        let same = refs.update_as(fiber, current_scheduler(), Some(sched.clone()));
        assert_eq!(same.stack(current_scheduler()).len(), 1);
        let other = SchedulerRef::new(ControlledScheduler::new());
        let replaced = refs.update_as(fiber, current_scheduler(), Some(other.clone()));
        assert_eq!(replaced.get(current_scheduler()), Some(Some(other)));
    }
}
