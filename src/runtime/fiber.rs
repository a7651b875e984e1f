//! Fibers: futures driven by scheduler tasks
//!
//! A fiber owns one boxed future plus its [`FiberRefs`] snapshot. Each
//! resumption is a [`Task`] handed to the fiber's current scheduler; the task
//! polls the future once with the fiber installed as the thread's current
//! fiber. The future itself is never polled with the fiber's state lock held,
//! so code inside it can read and write fiber refs freely.
//!
//! ```text
//!        wake                 task runs             poll -> Pending
//!   Idle ──────▶ Scheduled ──────────────▶ Running ────────────────▶ Idle
//!                    ▲                        │  wake while running
//!                    └── yield / notified ────┘──▶ RunningNotified
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use super::RuntimeInner;
use crate::deferred::Deferred;
use crate::error::{Error, Interrupted, Result};
use crate::fiber::FiberId;
use crate::fiber_refs::{
    current_scheduler, max_ops_before_yield, scheduling_priority, FiberLocals, FiberRefs,
};
use crate::scheduler::{Priority, RunningFiber, Scheduler, Task, TaskCancel};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type InterruptHook = Box<dyn FnOnce(Interrupted) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Scheduled,
    Running,
    RunningNotified,
    Done,
}

pub(crate) struct FiberState {
    status: Status,
    future: Option<BoxFuture>,
    pub(crate) refs: FiberRefs,
    pub(crate) locals: FiberLocals,
    op_count: u32,
    pending_yield: Option<Priority>,
    interrupt_requested: bool,
    resume: Option<TaskCancel>,
    on_interrupt: Option<InterruptHook>,
}

pub(crate) struct Fiber {
    pub(crate) id: FiberId,
    pub(crate) runtime: Weak<RuntimeInner>,
    pub(crate) state: Mutex<FiberState>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("op_count", &state.op_count)
            .finish()
    }
}

/// Snapshot handed to `should_yield`.
struct FiberView {
    id: FiberId,
    ops: u32,
    max_ops: u32,
    priority: Priority,
}

impl RunningFiber for FiberView {
    fn id(&self) -> FiberId {
        self.id
    }

    fn current_op_count(&self) -> u32 {
        self.ops
    }

    fn max_ops_before_yield(&self) -> u32 {
        self.max_ops
    }

    fn scheduling_priority(&self) -> Priority {
        self.priority
    }
}

// ---------------------------------------------------------------------------
// Current-fiber context
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

struct EnterGuard {
    previous: Option<Arc<Fiber>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

fn enter(fiber: Arc<Fiber>) -> EnterGuard {
    let previous = CURRENT.with(|current| current.replace(Some(fiber)));
    EnterGuard { previous }
}

/// The fiber being polled on this thread, if any
pub(crate) fn current() -> Option<Arc<Fiber>> {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn with_current<R>(f: impl FnOnce(&Arc<Fiber>) -> R) -> Option<R> {
    current().map(|fiber| f(&fiber))
}

// ---------------------------------------------------------------------------
// Fiber lifecycle
// ---------------------------------------------------------------------------

struct FiberWaker {
    fiber: Weak<Fiber>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(fiber) = self.fiber.upgrade() {
            fiber.wake();
        }
    }
}

impl Fiber {
    fn scheduler(&self, state: &FiberState) -> Option<Arc<dyn Scheduler>> {
        match state.locals.get(current_scheduler()) {
            Some(scheduler) => Some(scheduler.0),
            None => self
                .runtime
                .upgrade()
                .map(|rt| Arc::clone(rt.scheduler.get())),
        }
    }

    /// Build the resume task and remember its cancel handle.
    fn prepare_resume(self: &Arc<Self>, state: &mut FiberState) -> Option<(Arc<dyn Scheduler>, Task)> {
        let scheduler = self.scheduler(state)?;
        let fiber = Arc::clone(self);
        let (task, cancel) = Task::cancellable(move || fiber.run());
        state.resume = Some(cancel);
        state.status = Status::Scheduled;
        Some((scheduler, task))
    }

    pub(crate) fn wake(self: &Arc<Self>) {
        let resume = {
            let mut state = self.state.lock();
            match state.status {
                Status::Idle => {
                    let priority = state.locals.get(scheduling_priority());
                    self.prepare_resume(&mut state).map(|r| (r, priority))
                }
                Status::Running => {
                    state.status = Status::RunningNotified;
                    None
                }
                Status::Scheduled | Status::RunningNotified | Status::Done => None,
            }
        };
        if let Some(((scheduler, task), priority)) = resume {
            scheduler.schedule_task(task, priority);
        }
    }

    /// Poll the fiber's future once. Runs as a scheduler task.
    fn run(self: Arc<Self>) {
        let mut future = {
            let mut state = self.state.lock();
            if state.status != Status::Scheduled {
                return;
            }
            state.resume = None;
            let Some(future) = state.future.take() else {
                state.status = Status::Done;
                return;
            };
            state.status = Status::Running;
            state.op_count = 0;
            future
        };

        let waker = Waker::from(Arc::new(FiberWaker {
            fiber: Arc::downgrade(&self),
        }));
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let _enter = enter(Arc::clone(&self));
            future.as_mut().poll(&mut cx)
        };

        if poll.is_ready() {
            drop(future);
            self.state.lock().status = Status::Done;
            tracing::debug!(fiber = %self.id, "fiber completed");
            self.retire(false);
            return;
        }

        let resume = {
            let mut state = self.state.lock();
            if state.interrupt_requested {
                state.status = Status::Done;
                let hook = state.on_interrupt.take();
                drop(state);
                drop(future);
                self.complete_interrupted(hook);
                return;
            }
            state.future = Some(future);
            let priority = match state.pending_yield.take() {
                Some(priority) => Some(priority),
                None if state.status == Status::RunningNotified => {
                    Some(state.locals.get(scheduling_priority()))
                }
                None => None,
            };
            match priority {
                Some(priority) => self.prepare_resume(&mut state).map(|r| (r, priority)),
                None => {
                    state.status = Status::Idle;
                    None
                }
            }
        };
        if let Some(((scheduler, task), priority)) = resume {
            scheduler.schedule_task(task, priority);
        }
    }

    /// Count one op and ask the scheduler whether to yield.
    pub(crate) fn count_op(&self) -> Option<Priority> {
        let mut state = self.state.lock();
        state.op_count = state.op_count.saturating_add(1);
        let view = FiberView {
            id: self.id,
            ops: state.op_count,
            max_ops: state.locals.get(max_ops_before_yield()),
            priority: state.locals.get(scheduling_priority()),
        };
        let decision = self.scheduler(&state)?.should_yield(&view);
        if let Some(priority) = decision {
            tracing::trace!(fiber = %self.id, ops = view.ops, priority, "fiber yielding");
            state.pending_yield = Some(priority);
        }
        decision
    }

    /// Merge a finished child's refs into this fiber's.
    pub(crate) fn merge_child(&self, child: &FiberRefs) {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.refs = state.refs.join_as(self.id, child);
        state.refs.set_all(&mut state.locals);
    }

    /// Stop the fiber. Returns `false` if it had already finished.
    pub(crate) fn interrupt(self: &Arc<Self>, by: FiberId) -> bool {
        let (future, resume, hook) = {
            let mut state = self.state.lock();
            match state.status {
                Status::Done => return false,
                Status::Running | Status::RunningNotified => {
                    tracing::debug!(fiber = %self.id, by = %by, "interrupt requested while running");
                    state.interrupt_requested = true;
                    return true;
                }
                Status::Idle | Status::Scheduled => {
                    state.status = Status::Done;
                    (state.future.take(), state.resume.take(), state.on_interrupt.take())
                }
            }
        };
        tracing::debug!(fiber = %self.id, by = %by, "fiber interrupted");
        if let Some(resume) = resume {
            resume.cancel();
        }
        // Dropping the future releases whatever it was waiting on.
        drop(future);
        self.complete_interrupted(hook);
        true
    }

    fn complete_interrupted(&self, hook: Option<InterruptHook>) {
        if let Some(hook) = hook {
            hook(Interrupted::new(self.id));
        }
        self.retire(true);
    }

    fn retire(&self, interrupted: bool) {
        self.state.lock().on_interrupt = None;
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.retire(self.id, interrupted);
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning and handles
// ---------------------------------------------------------------------------

type Outcome<T> = std::result::Result<(T, FiberRefs), Interrupted>;

pub(crate) fn spawn_fiber<F, T>(
    runtime: &Arc<RuntimeInner>,
    id: FiberId,
    refs: FiberRefs,
    future: F,
) -> FiberHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let result: Deferred<Outcome<T>> = Deferred::new();

    let on_success = result.clone();
    let wrapped = async move {
        let value = future.await;
        let refs = with_current(|fiber| fiber.state.lock().refs.clone()).unwrap_or_default();
        on_success.succeed(Ok((value, refs)));
    };
    let on_interrupt = result.clone();
    let hook: InterruptHook = Box::new(move |interrupted| {
        on_interrupt.succeed(Err(interrupted));
    });

    let mut locals = FiberLocals::new();
    refs.set_all(&mut locals);
    let fiber = Arc::new(Fiber {
        id,
        runtime: Arc::downgrade(runtime),
        state: Mutex::new(FiberState {
            status: Status::Idle,
            future: Some(Box::pin(wrapped)),
            refs,
            locals,
            op_count: 0,
            pending_yield: None,
            interrupt_requested: false,
            resume: None,
            on_interrupt: Some(hook),
        }),
    });
    runtime.register(Arc::clone(&fiber));
    tracing::debug!(fiber = %id, "fiber spawned");
    fiber.wake();

    FiberHandle { fiber, result }
}

/// Handle to a spawned fiber.
pub struct FiberHandle<T> {
    fiber: Arc<Fiber>,
    result: Deferred<Outcome<T>>,
}

impl<T> fmt::Debug for FiberHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.fiber.id)
            .field("done", &self.result.is_done())
            .finish()
    }
}

impl<T: Send + 'static> FiberHandle<T> {
    pub fn id(&self) -> FiberId {
        self.fiber.id
    }

    /// Returns `true` once the fiber completed or was interrupted
    pub fn is_done(&self) -> bool {
        self.result.is_done()
    }

    /// Interrupt the fiber, dropping its future and withdrawing any pending
    /// resume task. Returns `false` if it had already finished.
    pub fn interrupt(&self) -> bool {
        self.fiber.interrupt(super::current_fiber_id())
    }

    /// Wait for the fiber's value.
    ///
    /// On success the child's fiber refs are joined into the calling fiber.
    /// An interrupted fiber yields [`Error::Interrupted`].
    pub async fn join(self) -> Result<T> {
        match self.result.take().await {
            Some(Ok((value, child_refs))) => {
                with_current(|parent| parent.merge_child(&child_refs));
                Ok(value)
            }
            Some(Err(interrupted)) => Err(Error::Interrupted(interrupted)),
            None => Err(Error::Interrupted(Interrupted::new(self.fiber.id))),
        }
    }

    /// The result if the fiber already finished, without joining refs
    pub fn try_result(&self) -> Option<Result<T>> {
        self.result
            .try_take()
            .map(|outcome| outcome.map(|(value, _)| value).map_err(Error::from))
    }
}

/// Future returned by [`yield_now`](super::yield_now).
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        match with_current(|fiber| fiber.count_op()).flatten() {
            Some(_) => {
                // The runtime reschedules the fiber once this poll returns.
                self.yielded = true;
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}
