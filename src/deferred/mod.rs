//! Deferred: single-assignment awaitable cell
//!
//! A [`Deferred`] is resolved at most once. Any number of fibers can await
//! it; awaiting after resolution completes immediately with the stored value.
//! This is the one-shot primitive both scheduler resumption and the
//! async-input wait slots are built from.
//!
//! # Cancel Safety
//!
//! Dropping a pending [`Wait`] or [`Take`] future removes its waker
//! registration, so cancelled waiters never leak entries.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

struct DeferredState<T> {
    value: Option<T>,
    done: bool,
    waiters: Vec<(u64, Waker)>,
    next_key: u64,
}

impl<T> DeferredState<T> {
    fn register(&mut self, key: &mut Option<u64>, waker: &Waker) {
        match *key {
            Some(k) => {
                if let Some((_, w)) = self.waiters.iter_mut().find(|(wk, _)| *wk == k) {
                    if !w.will_wake(waker) {
                        *w = waker.clone();
                    }
                    return;
                }
                self.waiters.push((k, waker.clone()));
            }
            None => {
                let k = self.next_key;
                self.next_key += 1;
                self.waiters.push((k, waker.clone()));
                *key = Some(k);
            }
        }
    }

    fn unregister(&mut self, key: u64) {
        self.waiters.retain(|(k, _)| *k != key);
    }
}

/// A single-assignment cell that can be awaited.
pub struct Deferred<T> {
    inner: Arc<Mutex<DeferredState<T>>>,
}

impl<T> Deferred<T> {
    /// Create an unresolved deferred
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeferredState {
                value: None,
                done: false,
                waiters: Vec::new(),
                next_key: 0,
            })),
        }
    }

    /// Resolve with `value`, waking every waiter.
    ///
    /// Returns `false` (and drops `value`) if already resolved.
    pub fn succeed(&self, value: T) -> bool {
        let waiters = {
            let mut state = self.inner.lock();
            if state.done {
                return false;
            }
            state.done = true;
            state.value = Some(value);
            std::mem::take(&mut state.waiters)
        };
        for (_, waker) in waiters {
            waker.wake();
        }
        true
    }

    /// Returns `true` once resolved
    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    /// Move the value out if resolved and not yet taken
    pub fn try_take(&self) -> Option<T> {
        self.inner.lock().value.take()
    }

    /// Wait for resolution and move the value out.
    ///
    /// Meant for cells with a single consumer; a second taker observes the
    /// resolution but gets `None`.
    pub fn take(&self) -> Take<T> {
        Take {
            inner: Arc::clone(&self.inner),
            key: None,
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// The resolved value, if any
    pub fn poll_value(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// Wait for resolution; every awaiter sees the same value.
    ///
    /// Do not mix with [`Deferred::take`] on the same cell: once the value
    /// is moved out, `wait` never completes.
    pub fn wait(&self) -> Wait<T> {
        Wait {
            inner: Arc::clone(&self.inner),
            key: None,
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Deferred")
            .field("done", &state.done)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Future returned by [`Deferred::wait`].
pub struct Wait<T> {
    inner: Arc<Mutex<DeferredState<T>>>,
    key: Option<u64>,
}

impl<T: Clone> Future for Wait<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = &mut *self;
        let mut state = this.inner.lock();
        if state.done {
            if let Some(value) = state.value.clone() {
                this.key = None;
                return Poll::Ready(value);
            }
        }
        state.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.lock().unregister(key);
        }
    }
}

/// Future returned by [`Deferred::take`].
pub struct Take<T> {
    inner: Arc<Mutex<DeferredState<T>>>,
    key: Option<u64>,
}

impl<T> Future for Take<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = &mut *self;
        let mut state = this.inner.lock();
        if state.done {
            this.key = None;
            return Poll::Ready(state.value.take());
        }
        state.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for Take<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.lock().unregister(key);
        }
    }
}
