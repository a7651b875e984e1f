//! Mutable per-fiber slot store
//!
//! Reads during execution go through [`FiberLocals`]; the persistent
//! [`FiberRefs`](super::FiberRefs) snapshot is synced into it with
//! [`FiberRefs::set_all`](super::FiberRefs::set_all) at fiber-switch
//! boundaries.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;

use super::{AnyValue, FiberRef, FiberRefId, FiberRefValue};

#[derive(Clone, Default)]
pub struct FiberLocals {
    slots: HashMap<FiberRefId, AnyValue>,
}

impl FiberLocals {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot value, or the ref's initial value when unset
    pub fn get<A: FiberRefValue>(&self, fiber_ref: &FiberRef<A>) -> A {
        self.slots
            .get(&fiber_ref.id())
            .and_then(|v| v.downcast_ref::<A>())
            .cloned()
            .unwrap_or_else(|| fiber_ref.initial().clone())
    }

    pub fn set<A: FiberRefValue>(&mut self, fiber_ref: &FiberRef<A>, value: A) {
        self.slots.insert(fiber_ref.id(), Arc::new(value));
    }

    pub fn remove<A>(&mut self, fiber_ref: &FiberRef<A>) -> bool {
        self.slots.remove(&fiber_ref.id()).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(super) fn insert_erased(&mut self, id: FiberRefId, value: AnyValue) {
        self.slots.insert(id, value);
    }
}

impl fmt::Debug for FiberLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberLocals")
            .field("slots", &self.slots.len())
            .finish()
    }
}
