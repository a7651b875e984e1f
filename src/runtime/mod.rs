//! Fiber runtime for Filament
//!
//! The runtime owns the host event loop and the default scheduler, both
//! created once when the runtime is built. Fibers are Rust futures: each
//! resumption is a scheduler task, suspension points are ordinary `.await`s,
//! and cooperative yielding goes through [`yield_now`], which counts one op
//! and asks the fiber's scheduler whether it is time to give up the thread.
//!
//! Several runtimes can live in one process; nothing here is global except
//! the thread-local "current fiber" used while a fiber is being polled.
//!
//! # Example
//!
//! ```
//! use filament::runtime::{self, Runtime};
//!
//! let rt = Runtime::new();
//! let value = rt
//!     .block_on(async {
//!         let child = runtime::fork(async { 20 + 1 })?;
//!         let n = child.join().await?;
//!         Ok::<_, filament::Error>(n * 2)
//!     })
//!     .and_then(|inner| inner);
//! assert_eq!(value.ok(), Some(42));
//! ```

mod fiber;

pub use fiber::{FiberHandle, YieldNow};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{Error, Interrupted, Result};
use crate::event_loop::{EventLoop, RunResult};
use crate::fiber::FiberId;
use crate::fiber_refs::{
    max_ops_before_yield, scheduling_priority, FiberRef, FiberRefValue, FiberRefs,
};
use crate::scheduler::{MixedScheduler, SchedulerRef};
use fiber::Fiber;

/// Fiber counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub fibers_spawned: u64,
    pub fibers_completed: u64,
    pub fibers_interrupted: u64,
    /// Fibers started and not yet finished
    pub live_fibers: usize,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    event_loop: Arc<EventLoop>,
    mixed: MixedScheduler,
    pub(crate) scheduler: SchedulerRef,
    fibers: Mutex<HashMap<FiberId, Arc<Fiber>>>,
    stats: Mutex<RuntimeStats>,
}

impl RuntimeInner {
    pub(crate) fn register(&self, fiber: Arc<Fiber>) {
        let mut fibers = self.fibers.lock();
        fibers.insert(fiber.id, fiber);
        let mut stats = self.stats.lock();
        stats.fibers_spawned += 1;
        stats.live_fibers = fibers.len();
    }

    pub(crate) fn retire(&self, id: FiberId, interrupted: bool) {
        let retired = {
            let mut fibers = self.fibers.lock();
            let retired = fibers.remove(&id);
            if retired.is_some() {
                let mut stats = self.stats.lock();
                if interrupted {
                    stats.fibers_interrupted += 1;
                } else {
                    stats.fibers_completed += 1;
                }
                stats.live_fibers = fibers.len();
            }
            retired
        };
        // Released outside the registry lock.
        drop(retired);
    }
}

/// A fiber runtime: event-loop host, default scheduler and live fibers.
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime from a validated configuration
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let event_loop = Arc::new(EventLoop::with_microtask_budget(config.microtask_budget));
        let mixed = MixedScheduler::new(event_loop.clone(), config.max_next_tick_before_timer);
        let scheduler = SchedulerRef::new(mixed.clone());
        tracing::debug!(?config, "runtime started");
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                event_loop,
                mixed,
                scheduler,
                fibers: Mutex::new(HashMap::default()),
                stats: Mutex::new(RuntimeStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The default scheduler fibers resume on
    pub fn scheduler(&self) -> SchedulerRef {
        self.inner.scheduler.clone()
    }

    /// The default scheduler as its concrete type, for its stats
    pub fn mixed_scheduler(&self) -> &MixedScheduler {
        &self.inner.mixed
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.inner.event_loop
    }

    pub fn stats(&self) -> RuntimeStats {
        self.inner.stats.lock().clone()
    }

    /// Start `future` as a root fiber.
    ///
    /// Root fibers begin with the configured op budget and scheduling
    /// priority and no other refs. Nothing runs until the event loop is
    /// driven, see [`Runtime::run_until_idle`].
    pub fn spawn<F, T>(&self, future: F) -> FiberHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = FiberId::new();
        let refs = FiberRefs::empty()
            .update_as(id, max_ops_before_yield(), self.inner.config.max_ops_before_yield)
            .update_as(id, scheduling_priority(), self.inner.config.scheduling_priority);
        fiber::spawn_fiber(&self.inner, id, refs, future)
    }

    /// Drive the event loop on this thread until no work remains
    pub fn run_until_idle(&self) -> RunResult {
        self.inner.event_loop.run_until_idle()
    }

    /// Run `future` as a root fiber and drive the loop until it finishes.
    ///
    /// Returns [`Error::Stalled`] if the loop runs dry first, which means
    /// the fiber is waiting on something nothing will deliver; the fiber is
    /// interrupted in that case. Wakes from other threads are not waited
    /// for.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.spawn(future);
        self.run_until_idle();
        match handle.try_result() {
            Some(result) => result,
            None => {
                let fiber = handle.id();
                tracing::debug!(fiber = %fiber, "event loop idle before fiber finished");
                handle.interrupt();
                Err(Error::Stalled { fiber })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Operations inside a fiber
// ---------------------------------------------------------------------------

/// Id of the fiber running on this thread, [`FiberId::None`] outside one
pub fn current_fiber_id() -> FiberId {
    fiber::with_current(|fiber| fiber.id).unwrap_or(FiberId::None)
}

/// Count one op and yield to the scheduler if the fiber is over budget.
///
/// Completes immediately outside a fiber.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

/// Start `future` as a child of the current fiber.
///
/// The child's refs are forked from the parent's. Outside a fiber this is a
/// protocol violation and fails with [`Error::Interrupted`].
pub fn fork<F, T>(future: F) -> Result<FiberHandle<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let parent = fiber::current().ok_or_else(Interrupted::current)?;
    let runtime = parent
        .runtime
        .upgrade()
        .ok_or_else(|| Interrupted::new(parent.id))?;
    let child = FiberId::new();
    let refs = parent.state.lock().refs.fork_as(child);
    Ok(fiber::spawn_fiber(&runtime, child, refs, future))
}

/// Read `fiber_ref` in the current fiber, its initial value outside one
pub fn get_ref<A: FiberRefValue>(fiber_ref: &FiberRef<A>) -> A {
    fiber::with_current(|fiber| fiber.state.lock().locals.get(fiber_ref))
        .unwrap_or_else(|| fiber_ref.initial().clone())
}

/// Set `fiber_ref` in the current fiber. Returns `false` outside a fiber.
pub fn set_ref<A: FiberRefValue>(fiber_ref: &FiberRef<A>, value: A) -> bool {
    fiber::with_current(|fiber| {
        let mut state = fiber.state.lock();
        state.refs = state.refs.update_as(fiber.id, fiber_ref, value.clone());
        state.locals.set(fiber_ref, value);
    })
    .is_some()
}

/// Snapshot of the current fiber's refs
pub fn current_refs() -> Option<FiberRefs> {
    fiber::with_current(|fiber| fiber.state.lock().refs.clone())
}
