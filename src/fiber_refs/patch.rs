//! Differences between two [`FiberRefs`] snapshots
//!
//! A patch records what a fiber changed so the change can be replayed onto a
//! different snapshot, owned by a different fiber.

use std::sync::Arc;

use super::{AnyFiberRef, AnyValue, FiberRefs};
use crate::fiber::FiberId;

/// A replayable change set over fiber refs.
#[derive(Debug, Clone, Default)]
pub enum FiberRefsPatch {
    /// No change
    #[default]
    Empty,
    /// A ref appeared with `value`
    Add { fiber_ref: AnyFiberRef, value: AnyValue },
    /// A ref was deleted
    Remove { fiber_ref: AnyFiberRef },
    /// A ref's visible value changed to `value`
    Update { fiber_ref: AnyFiberRef, value: AnyValue },
    /// `first`, then `second`
    AndThen(Box<FiberRefsPatch>, Box<FiberRefsPatch>),
}

impl FiberRefsPatch {
    /// The patch turning `old` into `new`, comparing visible values only
    pub fn diff(old: &FiberRefs, new: &FiberRefs) -> FiberRefsPatch {
        let mut patch = FiberRefsPatch::Empty;
        for (id, entry) in new.locals.iter() {
            let value = &entry.stack.value;
            let fiber_ref = AnyFiberRef(Arc::clone(&entry.fiber_ref));
            match old.locals.get(id) {
                Some(prev) if entry.fiber_ref.equals(&prev.stack.value, value) => {}
                Some(_) => {
                    patch = patch.combine(FiberRefsPatch::Update {
                        fiber_ref,
                        value: Arc::clone(value),
                    });
                }
                None => {
                    patch = patch.combine(FiberRefsPatch::Add {
                        fiber_ref,
                        value: Arc::clone(value),
                    });
                }
            }
        }
        for (id, entry) in old.locals.iter() {
            if !new.locals.contains_key(id) {
                patch = patch.combine(FiberRefsPatch::Remove {
                    fiber_ref: AnyFiberRef(Arc::clone(&entry.fiber_ref)),
                });
            }
        }
        patch
    }

    /// Sequence `self` then `that`
    pub fn combine(self, that: FiberRefsPatch) -> FiberRefsPatch {
        match (self, that) {
            (FiberRefsPatch::Empty, p) | (p, FiberRefsPatch::Empty) => p,
            (first, second) => FiberRefsPatch::AndThen(Box::new(first), Box::new(second)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FiberRefsPatch::Empty)
    }

    /// Replay onto `refs`, recording every write as made by `fiber_id`
    pub fn apply(&self, fiber_id: FiberId, refs: &FiberRefs) -> FiberRefs {
        let mut out = refs.clone();
        let mut pending = vec![self];
        while let Some(patch) = pending.pop() {
            match patch {
                FiberRefsPatch::Empty => {}
                FiberRefsPatch::Add { fiber_ref, value }
                | FiberRefsPatch::Update { fiber_ref, value } => {
                    out.update_erased(fiber_id, Arc::clone(&fiber_ref.0), Arc::clone(value));
                }
                FiberRefsPatch::Remove { fiber_ref } => {
                    out = out.delete_id(fiber_ref.id());
                }
                FiberRefsPatch::AndThen(first, second) => {
                    pending.push(second);
                    pending.push(first);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber_refs::FiberRef;

    #[test]
    fn test_diff_then_apply_reproduces_changes() {
        let p = FiberId::with_start(10);
        let c = FiberId::with_start(20);
        let kept = FiberRef::new(1u32);
        let changed = FiberRef::new(String::new());
        let removed = FiberRef::new(false);
        let added = FiberRef::new(0i64);

        let old = FiberRefs::empty()
            .update_as(p, &kept, 1)
            .update_as(p, &changed, "before".to_string())
            .update_as(p, &removed, true);
        let new = old
            .update_as(c, &changed, "after".to_string())
            .delete(&removed)
            .update_as(c, &added, 42);

        let patch = FiberRefsPatch::diff(&old, &new);
        assert!(!patch.is_empty());

        let replayed = patch.apply(p, &old);
        assert_eq!(replayed.get(&kept), Some(1));
        assert_eq!(replayed.get(&changed).as_deref(), Some("after"));
        assert!(!replayed.contains(&removed));
        assert_eq!(replayed.get(&added), Some(42));
        // Writes are owned by the applying fiber.
        assert_eq!(replayed.stack(&changed)[0].0, p);
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let r = FiberRef::new(5u8);
        let refs = FiberRefs::empty().update_as(FiberId::with_start(1), &r, 6);
        assert!(FiberRefsPatch::diff(&refs, &refs.clone()).is_empty());
    }

    #[test]
    fn test_combine_skips_empty() {
        let r = FiberRef::new(0u8);
        let add = FiberRefsPatch::Remove { fiber_ref: AnyFiberRef::from(&r) };
        let combined = FiberRefsPatch::Empty.combine(add).combine(FiberRefsPatch::Empty);
        assert!(matches!(combined, FiberRefsPatch::Remove { .. }));
    }
}
