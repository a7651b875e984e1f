//! Fiber identity and exit values
//!
//! Every fiber is identified by a [`FiberId`] that is unique for the life of
//! the process. Ids order by start time first and by counter second, which is
//! the order the fiber-ref join uses to find the common ancestor of two
//! value stacks.
//!
//! [`Exit`] and [`Cause`] describe how a computation ended. Interruption is
//! kept apart from ordinary failure so upstream code can tell "this fiber was
//! cancelled" from "this fiber failed with a domain error".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// FiberId
// ---------------------------------------------------------------------------

/// Unique identifier of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberId {
    /// No fiber (code running outside the runtime).
    None,
    /// A fiber started by the runtime.
    Runtime {
        /// Process-wide monotonic counter.
        id: u64,
        /// Wall-clock start time in milliseconds since the Unix epoch.
        start_millis: u64,
    },
}

impl FiberId {
    /// Allocate a fresh id stamped with the current time.
    pub fn new() -> Self {
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_start(start_millis)
    }

    /// Allocate a fresh id with an explicit start time.
    pub fn with_start(start_millis: u64) -> Self {
        FiberId::Runtime {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            start_millis,
        }
    }

    /// The counter component, `0` for [`FiberId::None`].
    pub fn id(&self) -> u64 {
        match self {
            FiberId::None => 0,
            FiberId::Runtime { id, .. } => *id,
        }
    }

    /// The start-time component, `0` for [`FiberId::None`].
    pub fn start_millis(&self) -> u64 {
        match self {
            FiberId::None => 0,
            FiberId::Runtime { start_millis, .. } => *start_millis,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FiberId::None)
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::None
    }
}

impl PartialOrd for FiberId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FiberId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start_millis()
            .cmp(&other.start_millis())
            .then_with(|| self.id().cmp(&other.id()))
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberId::None => write!(f, "#none"),
            FiberId::Runtime { id, .. } => write!(f, "#{}", id),
        }
    }
}

// ---------------------------------------------------------------------------
// Either
// ---------------------------------------------------------------------------

/// A value of one of two types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R> Either<L, R> {
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// Fold both sides into one value
    pub fn either<X>(self, on_left: impl FnOnce(L) -> X, on_right: impl FnOnce(R) -> X) -> X {
        match self {
            Either::Left(l) => on_left(l),
            Either::Right(r) => on_right(r),
        }
    }
}

// ---------------------------------------------------------------------------
// Cause / Exit
// ---------------------------------------------------------------------------

/// Why a computation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// A typed, caller-supplied failure.
    Fail(E),
    /// The computation was interrupted by the given fiber.
    Interrupt(FiberId),
}

impl<E> Cause<E> {
    /// Transform the failure payload, leaving interruption untouched
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Cause<F> {
        match self {
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Interrupt(id) => Cause::Interrupt(id),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Cause::Interrupt(_))
    }

    /// The failure payload, if this is not an interruption
    pub fn failure(&self) -> Option<&E> {
        match self {
            Cause::Fail(e) => Some(e),
            Cause::Interrupt(_) => None,
        }
    }
}

/// How a computation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    Success(A),
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::Fail(error))
    }

    pub fn fail_cause(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    /// Convert into a `Result`, keeping the full cause on failure
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(a) => Ok(a),
            Exit::Failure(cause) => Err(cause),
        }
    }
}
