//! Fiber-local references with fork/join propagation
//!
//! A [`FiberRef`] is a typed key with an initial value, a fork policy applied
//! when a child fiber inherits the value and a join policy applied when a
//! finished child's value is merged back into its parent.
//!
//! [`FiberRefs`] is the immutable snapshot a fiber owns: for every ref it has
//! touched, a stack of `(FiberId, value)` pairs whose top is the visible
//! value. Stacks are persistent cons lists, so forking shares the parent's
//! history and joining walks both histories to find where they diverged.
//!
//! ```text
//!   parent  [(P, 1)]
//!   fork    child1 [(P, 1)]        child2 [(P, 1)]
//!   set     child1 [(C1, 2), (P, 1)]
//!   join    parent [(P, join(1, 2))]
//! ```

mod builtin;
mod locals;
mod patch;

pub use builtin::{
    current_scheduler, max_ops_before_yield, scheduling_priority, DEFAULT_MAX_OPS_BEFORE_YIELD,
    DEFAULT_SCHEDULING_PRIORITY,
};
pub use locals::FiberLocals;
pub use patch::FiberRefsPatch;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;

use crate::fiber::FiberId;

/// Type-erased fiber-ref value
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Bound every fiber-ref value type satisfies.
pub trait FiberRefValue: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> FiberRefValue for T {}

static NEXT_REF_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`FiberRef`], unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberRefId(u64);

impl FiberRefId {
    fn next() -> Self {
        FiberRefId(NEXT_REF_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// FiberRef
// ---------------------------------------------------------------------------

type ForkFn<A> = dyn Fn(&A) -> A + Send + Sync;
type JoinFn<A> = dyn Fn(&A, &A) -> A + Send + Sync;

struct RefCore<A> {
    id: FiberRefId,
    name: String,
    initial: A,
    fork: Box<ForkFn<A>>,
    join: Box<JoinFn<A>>,
}

/// A typed fiber-local reference.
///
/// Cloning yields the same reference; equality is identity.
pub struct FiberRef<A> {
    core: Arc<RefCore<A>>,
}

impl<A: FiberRefValue> FiberRef<A> {
    /// A ref whose children inherit the value unchanged and whose joins keep
    /// the child's value
    pub fn new(initial: A) -> Self {
        let id = FiberRefId::next();
        Self::build(format!("ref#{}", id.0), id, initial, |a| a.clone(), |_, child| {
            child.clone()
        })
    }

    /// Like [`FiberRef::new`] with a name used in logs and `Debug`
    pub fn named(name: impl Into<String>, initial: A) -> Self {
        Self::build(name.into(), FiberRefId::next(), initial, |a| a.clone(), |_, child| {
            child.clone()
        })
    }

    /// A ref with explicit fork and join policies.
    ///
    /// `join(parent, child)` must be total.
    pub fn with_policies(
        name: impl Into<String>,
        initial: A,
        fork: impl Fn(&A) -> A + Send + Sync + 'static,
        join: impl Fn(&A, &A) -> A + Send + Sync + 'static,
    ) -> Self {
        Self::build(name.into(), FiberRefId::next(), initial, fork, join)
    }

    fn build(
        name: String,
        id: FiberRefId,
        initial: A,
        fork: impl Fn(&A) -> A + Send + Sync + 'static,
        join: impl Fn(&A, &A) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            core: Arc::new(RefCore {
                id,
                name,
                initial,
                fork: Box::new(fork),
                join: Box::new(join),
            }),
        }
    }

    pub fn initial(&self) -> &A {
        &self.core.initial
    }

    fn erased(&self) -> Arc<dyn ErasedRef> {
        self.core.clone()
    }
}

impl<A> FiberRef<A> {
    pub fn id(&self) -> FiberRefId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A> PartialEq for FiberRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl<A> Eq for FiberRef<A> {}

impl<A: fmt::Debug> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("name", &self.core.name)
            .field("initial", &self.core.initial)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

trait ErasedRef: Send + Sync {
    fn id(&self) -> FiberRefId;
    fn name(&self) -> &str;
    fn initial(&self) -> AnyValue;
    fn fork(&self, value: &AnyValue) -> AnyValue;
    fn join(&self, parent: &AnyValue, child: &AnyValue) -> AnyValue;
    fn equals(&self, a: &AnyValue, b: &AnyValue) -> bool;
}

impl<A: FiberRefValue> RefCore<A> {
    fn view<'a>(&'a self, value: &'a AnyValue) -> &'a A {
        value.downcast_ref::<A>().unwrap_or(&self.initial)
    }
}

impl<A: FiberRefValue> ErasedRef for RefCore<A> {
    fn id(&self) -> FiberRefId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn initial(&self) -> AnyValue {
        Arc::new(self.initial.clone())
    }

    fn fork(&self, value: &AnyValue) -> AnyValue {
        Arc::new((self.fork)(self.view(value)))
    }

    fn join(&self, parent: &AnyValue, child: &AnyValue) -> AnyValue {
        Arc::new((self.join)(self.view(parent), self.view(child)))
    }

    fn equals(&self, a: &AnyValue, b: &AnyValue) -> bool {
        Arc::ptr_eq(a, b) || self.view(a) == self.view(b)
    }
}

/// A fiber ref with its value type erased, as carried by
/// [`FiberRefsPatch`].
#[derive(Clone)]
pub struct AnyFiberRef(Arc<dyn ErasedRef>);

impl AnyFiberRef {
    pub fn id(&self) -> FiberRefId {
        self.0.id()
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl<A: FiberRefValue> From<&FiberRef<A>> for AnyFiberRef {
    fn from(fiber_ref: &FiberRef<A>) -> Self {
        AnyFiberRef(fiber_ref.erased())
    }
}

impl fmt::Debug for AnyFiberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyFiberRef({})", self.0.name())
    }
}

// ---------------------------------------------------------------------------
// Value stacks
// ---------------------------------------------------------------------------

struct Node {
    fiber: FiberId,
    value: AnyValue,
    tail: Option<Arc<Node>>,
}

fn push(fiber: FiberId, value: AnyValue, tail: Option<Arc<Node>>) -> Arc<Node> {
    Arc::new(Node { fiber, value, tail })
}

#[derive(Clone)]
struct Entry {
    fiber_ref: Arc<dyn ErasedRef>,
    stack: Arc<Node>,
}

/// Walk both histories newest-first until they meet at an entry written by
/// the same fiber. Returns whether the child wrote anything newer than that
/// common ancestor; histories that never meet count as modified.
fn child_modified(parent: &Arc<Node>, child: &Arc<Node>) -> bool {
    let mut parent = Some(parent);
    let mut child = Some(child);
    let mut modified = false;
    while let (Some(p), Some(c)) = (parent, child) {
        match p.fiber.cmp(&c.fiber) {
            std::cmp::Ordering::Less => {
                child = c.tail.as_ref();
                modified = true;
            }
            std::cmp::Ordering::Greater => parent = p.tail.as_ref(),
            std::cmp::Ordering::Equal => return modified,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// FiberRefs
// ---------------------------------------------------------------------------

/// Immutable snapshot of a fiber's refs.
///
/// Every operation returns a new snapshot; cloning is cheap and the map is
/// copied only when a shared snapshot is modified.
#[derive(Clone, Default)]
pub struct FiberRefs {
    locals: Arc<HashMap<FiberRefId, Entry>>,
}

impl FiberRefs {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of refs with a value stack
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn contains<A>(&self, fiber_ref: &FiberRef<A>) -> bool {
        self.locals.contains_key(&fiber_ref.id())
    }

    /// Names of every ref present, sorted
    pub fn ref_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .locals
            .values()
            .map(|e| e.fiber_ref.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// The visible value of `fiber_ref`, if this snapshot has one
    pub fn get<A: FiberRefValue>(&self, fiber_ref: &FiberRef<A>) -> Option<A> {
        self.locals
            .get(&fiber_ref.id())
            .and_then(|e| e.stack.value.downcast_ref::<A>().cloned())
    }

    /// The visible value of `fiber_ref`, or its initial value
    pub fn get_or_default<A: FiberRefValue>(&self, fiber_ref: &FiberRef<A>) -> A {
        self.get(fiber_ref)
            .unwrap_or_else(|| fiber_ref.initial().clone())
    }

    /// Full history of `fiber_ref`, newest first
    pub fn stack<A: FiberRefValue>(&self, fiber_ref: &FiberRef<A>) -> Vec<(FiberId, A)> {
        let mut out = Vec::new();
        let mut node = self.locals.get(&fiber_ref.id()).map(|e| &e.stack);
        while let Some(n) = node {
            if let Some(v) = n.value.downcast_ref::<A>() {
                out.push((n.fiber, v.clone()));
            }
            node = n.tail.as_ref();
        }
        out
    }

    /// The initial snapshot of a child fiber.
    ///
    /// Applies each ref's fork policy to the visible value. The stack is
    /// shared unchanged when the policy leaves the value equal, otherwise the
    /// forked value is pushed under `child`.
    pub fn fork_as(&self, child: FiberId) -> FiberRefs {
        let mut locals = HashMap::default();
        locals.reserve(self.locals.len());
        for (id, entry) in self.locals.iter() {
            let old = &entry.stack.value;
            let new = entry.fiber_ref.fork(old);
            let stack = if entry.fiber_ref.equals(old, &new) {
                Arc::clone(&entry.stack)
            } else {
                push(child, new, Some(Arc::clone(&entry.stack)))
            };
            locals.insert(
                *id,
                Entry {
                    fiber_ref: Arc::clone(&entry.fiber_ref),
                    stack,
                },
            );
        }
        FiberRefs {
            locals: Arc::new(locals),
        }
    }

    /// Merge a finished child's snapshot into this one on behalf of
    /// `fiber_id`.
    ///
    /// For each ref the child wrote since it diverged, the merged value is
    /// `join(parent_value, child_value)`. Refs the child left alone and refs
    /// present only here are unaffected.
    pub fn join_as(&self, fiber_id: FiberId, that: &FiberRefs) -> FiberRefs {
        let mut locals = (*self.locals).clone();
        for (id, child_entry) in that.locals.iter() {
            let child_stack = &child_entry.stack;
            if child_stack.fiber == fiber_id {
                continue;
            }
            let fiber_ref = &child_entry.fiber_ref;
            let child_value = &child_stack.value;

            let Some(parent_entry) = locals.get(id) else {
                if fiber_ref.equals(child_value, &fiber_ref.initial()) {
                    continue;
                }
                let merged = fiber_ref.join(&fiber_ref.initial(), child_value);
                locals.insert(
                    *id,
                    Entry {
                        fiber_ref: Arc::clone(fiber_ref),
                        stack: push(fiber_id, merged, None),
                    },
                );
                continue;
            };

            let parent_stack = &parent_entry.stack;
            if !child_modified(parent_stack, child_stack) {
                continue;
            }
            let old = &parent_stack.value;
            let merged = fiber_ref.join(old, child_value);
            if fiber_ref.equals(old, &merged) {
                continue;
            }
            let stack = if parent_stack.fiber == fiber_id {
                push(fiber_id, merged, parent_stack.tail.clone())
            } else {
                push(fiber_id, merged, Some(Arc::clone(parent_stack)))
            };
            locals.insert(
                *id,
                Entry {
                    fiber_ref: Arc::clone(fiber_ref),
                    stack,
                },
            );
        }
        FiberRefs {
            locals: Arc::new(locals),
        }
    }

    /// Record `value` for `fiber_ref` as written by `fiber_id`.
    ///
    /// Replaces the top when `fiber_id` already owns it and pushes otherwise,
    /// so ancestor history survives for later joins.
    pub fn update_as<A: FiberRefValue>(
        &self,
        fiber_id: FiberId,
        fiber_ref: &FiberRef<A>,
        value: A,
    ) -> FiberRefs {
        let mut next = self.clone();
        next.update_erased(fiber_id, fiber_ref.erased(), Arc::new(value));
        next
    }

    fn update_erased(&mut self, fiber_id: FiberId, fiber_ref: Arc<dyn ErasedRef>, value: AnyValue) {
        let id = fiber_ref.id();
        let stack = match self.locals.get(&id) {
            Some(entry) if entry.stack.fiber == fiber_id => {
                if fiber_ref.equals(&entry.stack.value, &value) {
                    return;
                }
                push(fiber_id, value, entry.stack.tail.clone())
            }
            Some(entry) => push(fiber_id, value, Some(Arc::clone(&entry.stack))),
            None => push(fiber_id, value, None),
        };
        Arc::make_mut(&mut self.locals).insert(id, Entry { fiber_ref, stack });
    }

    /// Drop all history for `fiber_ref`
    pub fn delete<A>(&self, fiber_ref: &FiberRef<A>) -> FiberRefs {
        self.delete_id(fiber_ref.id())
    }

    fn delete_id(&self, id: FiberRefId) -> FiberRefs {
        if !self.locals.contains_key(&id) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.locals).remove(&id);
        next
    }

    /// Write every visible value into the fast slot store.
    pub fn set_all(&self, locals: &mut FiberLocals) {
        for (id, entry) in self.locals.iter() {
            locals.insert_erased(*id, Arc::clone(&entry.stack.value));
        }
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRefs")
            .field("refs", &self.ref_names())
            .finish()
    }
}
