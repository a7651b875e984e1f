//! Layered scheduler delegating by priority range

use std::fmt;
use std::sync::Arc;

use super::{Priority, RunningFiber, Scheduler, Task};

/// Routes each task to the child registered for its priority range.
///
/// Children are kept sorted by their minimum priority. A task at priority
/// `p` goes to the child with the greatest minimum `<= p`; priorities below
/// every range go to the fallback.
pub struct MatrixScheduler {
    layers: Vec<(Priority, Arc<dyn Scheduler>)>,
    fallback: Arc<dyn Scheduler>,
}

impl fmt::Debug for MatrixScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<Priority> = self.layers.iter().map(|(p, _)| *p).collect();
        f.debug_struct("MatrixScheduler")
            .field("ranges", &ranges)
            .finish_non_exhaustive()
    }
}

impl MatrixScheduler {
    pub fn new(
        layers: impl IntoIterator<Item = (Priority, Arc<dyn Scheduler>)>,
        fallback: Arc<dyn Scheduler>,
    ) -> Self {
        let mut layers: Vec<_> = layers.into_iter().collect();
        // Stable, so duplicate minimums keep registration order and the
        // later one wins the range.
        layers.sort_by_key(|(p, _)| *p);
        Self { layers, fallback }
    }

    fn select(&self, priority: Priority) -> &Arc<dyn Scheduler> {
        let idx = self.layers.partition_point(|(min, _)| *min <= priority);
        if idx == 0 {
            &self.fallback
        } else {
            &self.layers[idx - 1].1
        }
    }
}

impl Scheduler for MatrixScheduler {
    fn should_yield(&self, fiber: &dyn RunningFiber) -> Option<Priority> {
        self.layers
            .iter()
            .find_map(|(_, scheduler)| scheduler.should_yield(fiber))
    }

    fn schedule_task(&self, task: Task, priority: Priority) {
        self.select(priority).schedule_task(task, priority)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::StubFiber;
    use super::super::{make_with_yield, ControlledScheduler};
    use super::*;

    fn matrix() -> (
        MatrixScheduler,
        Arc<ControlledScheduler>,
        Arc<ControlledScheduler>,
        Arc<ControlledScheduler>,
    ) {
        let low = Arc::new(ControlledScheduler::new());
        let high = Arc::new(ControlledScheduler::new());
        let fallback = Arc::new(ControlledScheduler::new());
        let m = MatrixScheduler::new(
            [
                (10, high.clone() as Arc<dyn Scheduler>),
                (0, low.clone() as Arc<dyn Scheduler>),
            ],
            fallback.clone(),
        );
        (m, low, high, fallback)
    }

    #[test]
    fn test_routes_by_priority_range() {
        let (m, low, high, fallback) = matrix();
        for p in [-5, 0, 9, 10, 50] {
            m.schedule_task(Task::new(|| {}), p);
        }
        assert_eq!(fallback.pending(), 1);
        assert_eq!(low.pending(), 2);
        assert_eq!(high.pending(), 2);
    }

    #[test]
    fn test_should_yield_returns_first_child_answer() {
        let never: Arc<dyn Scheduler> = Arc::new(make_with_yield(|_, _| {}, |_| None));
        let always: Arc<dyn Scheduler> = Arc::new(make_with_yield(|_, _| {}, |_| Some(7)));
        let fallback: Arc<dyn Scheduler> = Arc::new(ControlledScheduler::new());
        let m = MatrixScheduler::new([(0, never), (5, always)], fallback);

        let fiber = StubFiber { ops: 0, max_ops: 2048, priority: 0 };
        assert_eq!(m.should_yield(&fiber), Some(7));

        let (m, ..) = matrix();
        assert_eq!(m.should_yield(&fiber), None);
        let busy = StubFiber { ops: 5000, max_ops: 2048, priority: 2 };
        assert_eq!(m.should_yield(&busy), Some(2));
    }
}
