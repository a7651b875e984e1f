//! Single-producer, many-consumer backpressured handoff
//!
//! [`SingleProducerAsyncInput`] is a one-slot mailbox. The producer's
//! `emit` suspends until a consumer is waiting and then hands the element to
//! exactly one consumer; `done` and `error` end the input and are broadcast
//! to every consumer, present and future.
//!
//! # State machine
//!
//! ```text
//!            take (notify producer)          done / error
//!   Empty ─────────────────────────▶ Emit ───────────────▶ Done / Error
//!     ▲                               │                       (terminal)
//!     └── emit pops the last waiter ──┘
//! ```
//!
//! - `Empty(notify)`: nobody is waiting. A producer calling `emit` awaits
//!   `notify`, which the next consumer fires.
//! - `Emit(waiters)`: consumers queued FIFO, each on its own one-shot slot.
//! - `Error(cause)` / `Done(value)`: terminal, replayed to every `take`.
//!
//! Any producer operation on a terminal input is a protocol violation and
//! fails with [`Interrupted`].
//!
//! # Cancellation
//!
//! Dropping a pending `take` removes its slot from the queue without
//! disturbing other waiters. If the slot had already been handed an element
//! the element goes to the next waiter, or is held for the next consumer to
//! arrive, so no element is lost or delivered twice.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::Deferred;
use crate::error::Interrupted;
use crate::fiber::{Cause, Either, Exit};
use crate::runtime::current_fiber_id;

enum Signal<Err, Elem, Done> {
    Element(Elem),
    Error(Cause<Err>),
    Done(Done),
}

struct Slot<Err, Elem, Done> {
    key: u64,
    deferred: Deferred<Signal<Err, Elem, Done>>,
}

enum State<Err, Elem, Done> {
    Empty(Deferred<()>),
    Emit(VecDeque<Slot<Err, Elem, Done>>),
    Error(Cause<Err>),
    Done(Done),
}

impl<Err, Elem, Done> State<Err, Elem, Done> {
    fn name(&self) -> &'static str {
        match self {
            State::Empty(_) => "empty",
            State::Emit(_) => "emit",
            State::Error(_) => "error",
            State::Done(_) => "done",
        }
    }
}

struct Inner<Err, Elem, Done> {
    state: State<Err, Elem, Done>,
    /// Elements handed to consumers that were cancelled before picking
    /// them up, in emit order.
    stash: VecDeque<Elem>,
    next_key: u64,
}

impl<Err, Elem, Done> Inner<Err, Elem, Done> {
    /// Give `elem` to the head waiter, or hold it for the next consumer.
    fn reoffer(&mut self, elem: Elem) {
        if let State::Emit(waiters) = &mut self.state {
            if let Some(slot) = waiters.pop_front() {
                if waiters.is_empty() {
                    self.state = State::Empty(Deferred::new());
                }
                slot.deferred.succeed(Signal::Element(elem));
                return;
            }
        }
        self.stash.push_back(elem);
    }
}

/// Backpressured single-slot channel between one producer and many
/// consumers.
///
/// Cloning yields another handle to the same input.
pub struct SingleProducerAsyncInput<Err, Elem, Done> {
    inner: Arc<Mutex<Inner<Err, Elem, Done>>>,
}

impl<Err, Elem, Done> Clone for SingleProducerAsyncInput<Err, Elem, Done> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Err, Elem, Done> Default for SingleProducerAsyncInput<Err, Elem, Done> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Err, Elem, Done> fmt::Debug for SingleProducerAsyncInput<Err, Elem, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let waiters = match &inner.state {
            State::Emit(waiters) => waiters.len(),
            _ => 0,
        };
        f.debug_struct("SingleProducerAsyncInput")
            .field("state", &inner.state.name())
            .field("waiters", &waiters)
            .field("stashed", &inner.stash.len())
            .finish()
    }
}

impl<Err, Elem, Done> SingleProducerAsyncInput<Err, Elem, Done> {
    /// A fresh input in the `Empty` state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Empty(Deferred::new()),
                stash: VecDeque::new(),
                next_key: 0,
            })),
        }
    }

    /// Split into producer and consumer handles
    pub fn split(&self) -> (AsyncInputProducer<Err, Elem, Done>, AsyncInputConsumer<Err, Elem, Done>) {
        (
            AsyncInputProducer { input: self.clone() },
            AsyncInputConsumer { input: self.clone() },
        )
    }

    /// Returns `true` once `done` or `error` has been called
    pub fn is_terminal(&self) -> bool {
        matches!(self.inner.lock().state, State::Error(_) | State::Done(_))
    }

    /// Consumers currently suspended in `take`
    pub fn waiting_consumers(&self) -> usize {
        match &self.inner.lock().state {
            State::Emit(waiters) => waiters.len(),
            _ => 0,
        }
    }
}

impl<Err, Elem, Done> SingleProducerAsyncInput<Err, Elem, Done>
where
    Err: Clone + Send + 'static,
    Elem: Send + 'static,
    Done: Clone + Send + 'static,
{
    // -----------------------------------------------------------------------
    // Producer side
    // -----------------------------------------------------------------------

    /// Hand `elem` to exactly one consumer, suspending until one is waiting.
    pub async fn emit(&self, elem: Elem) -> Result<(), Interrupted> {
        loop {
            let notify = {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.state {
                    State::Empty(notify) => notify.clone(),
                    State::Emit(waiters) => {
                        let Some(slot) = waiters.pop_front() else {
                            inner.state = State::Empty(Deferred::new());
                            continue;
                        };
                        if waiters.is_empty() {
                            inner.state = State::Empty(Deferred::new());
                        }
                        tracing::trace!(slot = slot.key, "async input handed off element");
                        slot.deferred.succeed(Signal::Element(elem));
                        return Ok(());
                    }
                    terminal => return Err(Self::violation("emit", terminal)),
                }
            };
            notify.wait().await;
        }
    }

    /// End the input with `value`, releasing every waiting consumer.
    pub fn done(&self, value: Done) -> Result<(), Interrupted> {
        self.terminate("done", State::Done(value.clone()), || Signal::Done(value.clone()))
    }

    /// Fail the input with `cause`, releasing every waiting consumer.
    pub fn error(&self, cause: Cause<Err>) -> Result<(), Interrupted> {
        self.terminate("error", State::Error(cause.clone()), || Signal::Error(cause.clone()))
    }

    /// Fail the input with the interruption of the calling fiber
    pub fn close(&self) -> Result<(), Interrupted> {
        self.error(Cause::Interrupt(current_fiber_id()))
    }

    /// Resolves once a consumer has arrived since the input last became
    /// empty.
    ///
    /// Returns at once in any other state, which does not by itself mean an
    /// `emit` would proceed.
    pub async fn await_read(&self) {
        let notify = {
            let inner = self.inner.lock();
            match &inner.state {
                State::Empty(notify) => notify.clone(),
                _ => return,
            }
        };
        notify.wait().await;
    }

    fn terminate(
        &self,
        op: &'static str,
        next: State<Err, Elem, Done>,
        signal: impl Fn() -> Signal<Err, Elem, Done>,
    ) -> Result<(), Interrupted> {
        let mut guard = self.inner.lock();
        let previous = std::mem::replace(&mut guard.state, next);
        match previous {
            State::Empty(notify) => {
                notify.succeed(());
            }
            State::Emit(waiters) => {
                tracing::trace!(op, waiters = waiters.len(), "async input broadcasting end");
                for slot in waiters {
                    slot.deferred.succeed(signal());
                }
            }
            terminal => {
                let err = Self::violation(op, &terminal);
                guard.state = terminal;
                return Err(err);
            }
        }
        tracing::trace!(op, "async input terminated");
        Ok(())
    }

    fn violation(op: &'static str, state: &State<Err, Elem, Done>) -> Interrupted {
        let err = Interrupted::current();
        tracing::debug!(op, state = state.name(), fiber = %err.fiber, "producer call on ended async input");
        err
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Receive one signal, dispatching to the matching handler.
    ///
    /// Suspends while no element is available; resolves at once on an ended
    /// input.
    pub async fn take_with<X>(
        &self,
        on_error: impl FnOnce(Cause<Err>) -> X,
        on_element: impl FnOnce(Elem) -> X,
        on_done: impl FnOnce(Done) -> X,
    ) -> X {
        match self.take_signal().await {
            Signal::Element(elem) => on_element(elem),
            Signal::Error(cause) => on_error(cause),
            Signal::Done(value) => on_done(value),
        }
    }

    /// Receive one signal as an [`Exit`]: the element on success, the error
    /// as `Left` or the done value as `Right` on failure.
    pub async fn take(&self) -> Exit<Elem, Either<Err, Done>> {
        self.take_with(
            |cause| Exit::fail_cause(cause.map(Either::Left)),
            Exit::succeed,
            |done| Exit::fail(Either::Right(done)),
        )
        .await
    }

    async fn take_signal(&self) -> Signal<Err, Elem, Done> {
        let (key, slot) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(elem) = inner.stash.pop_front() {
                return Signal::Element(elem);
            }
            let key = inner.next_key;
            let deferred = match &mut inner.state {
                State::Error(cause) => return Signal::Error(cause.clone()),
                State::Done(value) => return Signal::Done(value.clone()),
                State::Emit(waiters) => {
                    let deferred = Deferred::new();
                    waiters.push_back(Slot {
                        key,
                        deferred: deferred.clone(),
                    });
                    deferred
                }
                State::Empty(notify) => {
                    notify.succeed(());
                    let deferred = Deferred::new();
                    inner.state = State::Emit(VecDeque::from([Slot {
                        key,
                        deferred: deferred.clone(),
                    }]));
                    deferred
                }
            };
            inner.next_key += 1;
            (key, deferred)
        };
        let mut guard = WaitGuard {
            inner: &self.inner,
            key,
            deferred: slot.clone(),
            armed: true,
        };
        let signal = slot.take().await;
        guard.armed = false;
        signal.unwrap_or_else(|| Signal::Error(Cause::Interrupt(current_fiber_id())))
    }
}

/// Releases a consumer's wait slot if its `take` is dropped mid-wait.
struct WaitGuard<'a, Err, Elem, Done> {
    inner: &'a Mutex<Inner<Err, Elem, Done>>,
    key: u64,
    deferred: Deferred<Signal<Err, Elem, Done>>,
    armed: bool,
}

impl<Err, Elem, Done> Drop for WaitGuard<'_, Err, Elem, Done> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let State::Emit(waiters) = &mut inner.state {
            if let Some(pos) = waiters.iter().position(|slot| slot.key == self.key) {
                waiters.remove(pos);
                if waiters.is_empty() {
                    inner.state = State::Empty(Deferred::new());
                }
                tracing::trace!(slot = self.key, "cancelled consumer released its slot");
                return;
            }
        }
        if let Some(Signal::Element(elem)) = self.deferred.try_take() {
            tracing::trace!(slot = self.key, "re-offering element of cancelled consumer");
            inner.reoffer(elem);
        }
    }
}

// ---------------------------------------------------------------------------
// Role handles
// ---------------------------------------------------------------------------

/// Producer-only view of an async input.
pub struct AsyncInputProducer<Err, Elem, Done> {
    input: SingleProducerAsyncInput<Err, Elem, Done>,
}

impl<Err, Elem, Done> Clone for AsyncInputProducer<Err, Elem, Done> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
        }
    }
}

impl<Err, Elem, Done> fmt::Debug for AsyncInputProducer<Err, Elem, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncInputProducer").field(&self.input).finish()
    }
}

impl<Err, Elem, Done> AsyncInputProducer<Err, Elem, Done>
where
    Err: Clone + Send + 'static,
    Elem: Send + 'static,
    Done: Clone + Send + 'static,
{
    pub async fn emit(&self, elem: Elem) -> Result<(), Interrupted> {
        self.input.emit(elem).await
    }

    pub fn done(&self, value: Done) -> Result<(), Interrupted> {
        self.input.done(value)
    }

    pub fn error(&self, cause: Cause<Err>) -> Result<(), Interrupted> {
        self.input.error(cause)
    }

    pub fn close(&self) -> Result<(), Interrupted> {
        self.input.close()
    }

    pub async fn await_read(&self) {
        self.input.await_read().await
    }
}

/// Consumer-only view of an async input.
pub struct AsyncInputConsumer<Err, Elem, Done> {
    input: SingleProducerAsyncInput<Err, Elem, Done>,
}

impl<Err, Elem, Done> Clone for AsyncInputConsumer<Err, Elem, Done> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
        }
    }
}

impl<Err, Elem, Done> fmt::Debug for AsyncInputConsumer<Err, Elem, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncInputConsumer").field(&self.input).finish()
    }
}

impl<Err, Elem, Done> AsyncInputConsumer<Err, Elem, Done>
where
    Err: Clone + Send + 'static,
    Elem: Send + 'static,
    Done: Clone + Send + 'static,
{
    pub async fn take_with<X>(
        &self,
        on_error: impl FnOnce(Cause<Err>) -> X,
        on_element: impl FnOnce(Elem) -> X,
        on_done: impl FnOnce(Done) -> X,
    ) -> X {
        self.input.take_with(on_error, on_element, on_done).await
    }

    pub async fn take(&self) -> Exit<Elem, Either<Err, Done>> {
        self.input.take().await
    }
}
