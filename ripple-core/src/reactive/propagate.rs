//! Dirty Propagation
//!
//! When a source changes, every computation downstream of it has to be told.
//! This module walks the graph outward from the written node, brings the
//! observed deriveds up to date, and hands the affected effects to the
//! scheduler.
//!
//! # How Propagation Works
//!
//! A write runs one *pass* in two phases:
//!
//! 1. **Mark.** Walk `reactions` outward. Deriveds reading the written node
//!    are flagged dirty, those further out maybe-dirty. Deriveds that
//!    somebody observes are queued for eager refresh and walked further;
//!    unobserved ones stay lazy. Effects reading the written node directly
//!    are collected.
//!
//! 2. **Refresh.** Each queued derived that is still stale is refreshed. A
//!    maybe-dirty derived refreshes its inputs first and recomputes only if
//!    one of them changed, so an unchanged value cuts propagation off. Reads
//!    inside a computation pull stale upstream deriveds first, so no derived
//!    sees a stale input and none runs twice in the same pass, even in a
//!    diamond:
//!
//! ```text
//!        a
//!       / \
//!      b   c      b and c recompute once each,
//!       \ /       d recomputes once, after both
//!        d
//! ```
//!
//! Deriveds whose value actually changed contribute their effects to the
//! collected set. An equal recomputation stops effects from rerunning.
//!
//! # Forks
//!
//! While a fork overlay is active the canonical caches are left alone.
//! Recomputations land in the overlay, stale overlay entries are evicted
//! instead of flagging canonical state, and no effect is collected.

use std::cell::RefCell;
use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::{Overlay, Runtime};
use crate::graph::{filter_effects, sort_effects, DerivedState, NodeArena, NodeId, NodeKind};

/// Collects the deriveds that change during one pass.
///
/// Passes nest when an effect created during a recomputation writes a
/// signal, so the previous collector is restored on drop.
struct PassGuard<'a> {
    slot: &'a RefCell<Option<Vec<NodeId>>>,
    prev: Option<Vec<NodeId>>,
}

impl<'a> PassGuard<'a> {
    fn enter(slot: &'a RefCell<Option<Vec<NodeId>>>) -> Self {
        let prev = slot.replace(Some(Vec::new()));
        Self { slot, prev }
    }

    fn finish(self) -> Vec<NodeId> {
        self.slot.borrow_mut().take().unwrap_or_default()
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.slot.replace(self.prev.take());
    }
}

/// Whether any transitive dependency of `id` has an overlay value.
fn depends_on_overlay(graph: &NodeArena, overlay: &Overlay, id: NodeId) -> bool {
    let mut seen = HashSet::new();
    let mut pending = graph.deps_of(id);
    while let Some(dep) = pending.pop() {
        if !seen.insert(dep) {
            continue;
        }
        if overlay.contains_key(&dep) {
            return true;
        }
        if graph.derived(dep).is_some() {
            pending.extend(graph.deps_of(dep));
        }
    }
    false
}

impl Runtime {
    /// Whether reading derived `id` right now requires recomputing it.
    pub(crate) fn is_stale(&self, id: NodeId) -> bool {
        let inner = self.inner();
        let graph = inner.graph.borrow();
        let Some(derived) = graph.derived(id) else {
            return false;
        };

        match inner.overlay.borrow().as_ref() {
            None => !derived.is_clean(),
            Some(overlay) => {
                !overlay.contains_key(&id)
                    && (!derived.is_clean() || depends_on_overlay(&graph, overlay, id))
            }
        }
    }

    /// Recompute a derived and store the result.
    ///
    /// Effects hosted by the derived are torn down first, since the
    /// computation recreates them. Returns whether the value changed. A
    /// panicking computation unwinds out of here with the derived's cache
    /// and state as they were.
    pub(crate) fn update_derived(&self, id: NodeId) -> bool {
        let inner = self.inner();
        let forking = self.forking();

        // Hosted effects belong to the canonical value. A forked recompute
        // leaves them alone and creates none.
        if !forking {
            let hosted = inner
                .graph
                .borrow_mut()
                .derived_mut(id)
                .map(|derived| std::mem::take(&mut derived.effects))
                .unwrap_or_default();
            for effect in hosted {
                self.destroy_effect(effect);
            }
        }

        let (compute, canonical) = {
            let mut graph = inner.graph.borrow_mut();
            // Under a fork edges only accumulate, so the canonical cache keeps
            // hearing about the inputs it was computed from.
            if !forking {
                graph.clear_dependencies(id);
            }
            match graph.derived(id) {
                Some(derived) => (derived.compute.clone(), derived.value.clone()),
                None => return false,
            }
        };
        let prev = if forking {
            self.overlay_value(id).or(canonical)
        } else {
            canonical
        };

        let value = {
            let _ctx = ReactiveContext::enter(&inner.stack, Some(id));
            compute()
        };

        let forking = self.forking();
        let (changed, replaced) = {
            let mut graph = inner.graph.borrow_mut();
            let Some(derived) = graph.derived_mut(id) else {
                return false;
            };
            let changed = derived.state == DerivedState::Uninitialized
                || prev
                    .as_ref()
                    .map_or(true, |prev| !(derived.equals)(prev.as_ref(), value.as_ref()));

            let replaced = if forking {
                inner
                    .overlay
                    .borrow_mut()
                    .as_mut()
                    .and_then(|overlay| overlay.insert(id, value))
            } else {
                derived.state = DerivedState::Clean;
                if changed {
                    derived.value.replace(value)
                } else {
                    Some(value)
                }
            };

            if changed && !forking {
                let readers: Vec<NodeId> = derived.reactions.iter().copied().collect();
                for reader in readers {
                    if let Some(reader) = graph.derived_mut(reader) {
                        reader.mark_dirty();
                    }
                }
            }
            (changed, replaced)
        };
        drop(replaced);
        drop(prev);

        if changed {
            trace!(derived = %id, forking, "derived changed");
            if let Some(pass) = inner.pass.borrow_mut().as_mut() {
                pass.push(id);
            }
        }
        changed
    }

    /// Bring a stale derived up to date.
    ///
    /// A dirty derived recomputes. A maybe-dirty one first refreshes the
    /// deriveds it read; it recomputes only if one of them changed and is
    /// otherwise marked clean with its cache kept. Under a fork every stale
    /// derived recomputes into the overlay.
    pub(crate) fn refresh(&self, id: NodeId) {
        if self.forking() {
            self.update_derived(id);
            return;
        }

        let inner = self.inner();
        match self.derived_state(id) {
            Some(DerivedState::MaybeDirty) => {}
            Some(DerivedState::Dirty | DerivedState::Uninitialized) => {
                self.update_derived(id);
                return;
            }
            Some(DerivedState::Clean) | None => return,
        }

        let deps = inner.graph.borrow().deps_of(id);
        for dep in deps {
            let stale = matches!(
                self.derived_state(dep),
                Some(state) if state != DerivedState::Clean
            );
            if stale && !inner.stack.contains(dep) {
                self.refresh(dep);
            }
            if self.derived_state(id) == Some(DerivedState::Dirty) {
                break;
            }
        }

        if self.derived_state(id) == Some(DerivedState::Dirty) {
            self.update_derived(id);
            return;
        }
        if let Some(derived) = inner.graph.borrow_mut().derived_mut(id) {
            if derived.state == DerivedState::MaybeDirty {
                trace!(derived = %id, "inputs unchanged, cache kept");
                derived.state = DerivedState::Clean;
            }
        }
    }

    fn derived_state(&self, id: NodeId) -> Option<DerivedState> {
        let state = self.inner().graph.borrow().derived(id).map(|derived| derived.state);
        state
    }

    /// Propagate a change of `source` through the graph and queue the
    /// effects that need to rerun.
    pub(crate) fn mark_dirty(&self, source: NodeId) {
        let inner = self.inner();
        let forking = self.forking();

        let mut effects: IndexSet<NodeId> = IndexSet::new();
        let mut eager = Vec::new();
        let mut evicted = Vec::new();
        {
            let mut graph = inner.graph.borrow_mut();
            let applying = inner.applying.borrow();
            let mut overlay = inner.overlay.borrow_mut();
            let mut visited = HashSet::new();
            let mut walk = vec![source];

            while let Some(node) = walk.pop() {
                for reaction in graph.reactions_of(node) {
                    match graph.get_mut(reaction).map(|n| &mut n.kind) {
                        Some(NodeKind::Effect(effect)) => {
                            if node == source && !forking && !effect.dirty {
                                effects.insert(reaction);
                            }
                        }
                        Some(NodeKind::Derived(derived)) => {
                            // Both ends come from the fork being applied: the
                            // derived gets its forked value written directly.
                            let consistent = applying
                                .as_ref()
                                .is_some_and(|set| set.contains(&node) && set.contains(&reaction));
                            if consistent || !visited.insert(reaction) {
                                continue;
                            }

                            match overlay.as_mut() {
                                Some(overlay) => evicted.extend(overlay.shift_remove(&reaction)),
                                None if node == source => derived.mark_dirty(),
                                None => derived.mark_maybe_dirty(),
                            }
                            if !derived.reactions.is_empty() {
                                eager.push(reaction);
                                walk.push(reaction);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        drop(evicted);

        trace!(source = %source, eager = eager.len(), direct = effects.len(), "marked dirty");

        let pass = PassGuard::enter(&inner.pass);
        for derived in eager {
            if !inner.stack.contains(derived) && self.is_stale(derived) {
                self.refresh(derived);
            }
        }
        let changed = pass.finish();

        if !forking {
            let graph = inner.graph.borrow();
            for derived in changed {
                for reaction in graph.reactions_of(derived) {
                    if graph.effect(reaction).is_some_and(|effect| !effect.dirty) {
                        effects.insert(reaction);
                    }
                }
            }
        }

        if effects.is_empty() {
            return;
        }

        let batch = {
            let mut graph = inner.graph.borrow_mut();
            let collected: Vec<NodeId> = effects.into_iter().collect();
            let kept = filter_effects(&graph, &collected);
            let sorted = sort_effects(&graph, kept);
            for &id in &sorted {
                if let Some(effect) = graph.effect_mut(id) {
                    effect.dirty = true;
                }
            }
            sorted
        };

        trace!(source = %source, effects = batch.len(), "queued effects");
        let needs_flush = inner.queue.borrow_mut().push_batch(batch);
        if needs_flush {
            self.schedule_flush();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn diamond_recomputes_each_derived_once() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(1);
        let (b_runs, b_count) = counter();
        let (c_runs, c_count) = counter();
        let (d_runs, d_count) = counter();

        let a1 = a.clone();
        let b = rt.derived(move || {
            b_count.set(b_count.get() + 1);
            a1.get() + 1
        });
        let c = rt.derived(move || {
            c_count.set(c_count.get() + 1);
            a.get() * 10
        });
        let d = rt.derived(move || {
            d_count.set(d_count.get() + 1);
            b.get() + c.get()
        });

        let d_seen = d.clone();
        rt.effect(move || {
            d_seen.get();
        });
        assert_eq!((b_runs.get(), c_runs.get(), d_runs.get()), (1, 1, 1));

        set_a.set(2).unwrap();
        assert_eq!((b_runs.get(), c_runs.get(), d_runs.get()), (2, 2, 2));
        assert_eq!(d.get_untracked(), 23);
    }

    #[test]
    fn unobserved_derived_stays_lazy() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(1);
        let (runs, count) = counter();
        let double = rt.derived(move || {
            count.set(count.get() + 1);
            a.get() * 2
        });

        set_a.set(2).unwrap();
        assert_eq!(runs.get(), 0);
        assert_eq!(double.state(), Some(DerivedState::Uninitialized));

        assert_eq!(double.get(), 4);
        assert_eq!(runs.get(), 1);

        set_a.set(3).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(double.state(), Some(DerivedState::Dirty));
        assert_eq!(double.get(), 6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn equal_recomputation_does_not_queue_effects() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(2);
        let parity = rt.derived(move || a.get() % 2);
        let (runs, count) = counter();

        rt.effect(move || {
            parity.get();
            count.set(count.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        set_a.set(4).unwrap();
        assert_eq!(rt.pending_effects(), 0);

        set_a.set(5).unwrap();
        assert_eq!(rt.pending_effects(), 1);
        rt.flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn unchanged_derived_cuts_off_its_chain() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(2);
        let parity = rt.derived(move || a.get() % 2);
        let (scaled_runs, scaled_count) = counter();
        let scaled = rt.derived(move || {
            scaled_count.set(scaled_count.get() + 1);
            parity.get() * 10
        });
        let (effect_runs, effect_count) = counter();

        let s = scaled.clone();
        rt.effect(move || {
            s.get();
            effect_count.set(effect_count.get() + 1);
        });
        assert_eq!(scaled_runs.get(), 1);

        // Same parity: nothing below it reruns
        set_a.set(4).unwrap();
        assert_eq!(scaled_runs.get(), 1);
        assert_eq!(scaled.state(), Some(DerivedState::Clean));
        assert_eq!(rt.pending_effects(), 0);

        set_a.set(5).unwrap();
        assert_eq!(scaled_runs.get(), 2);
        assert_eq!(rt.pending_effects(), 1);
        rt.flush();
        assert_eq!(effect_runs.get(), 2);
        assert_eq!(scaled.get_untracked(), 10);
    }

    #[test]
    fn lazy_derived_keeps_cache_when_inputs_are_unchanged() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(2);
        let parity = rt.derived(move || a.get() % 2);
        let (runs, count) = counter();
        let scaled = rt.derived(move || {
            count.set(count.get() + 1);
            parity.get() * 10
        });
        assert_eq!(scaled.get(), 0);

        set_a.set(4).unwrap();
        assert_eq!(scaled.state(), Some(DerivedState::MaybeDirty));
        assert_eq!(scaled.get(), 0);
        assert_eq!(runs.get(), 1);
        assert_eq!(scaled.state(), Some(DerivedState::Clean));

        set_a.set(7).unwrap();
        assert_eq!(scaled.get(), 10);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_reading_two_changed_deriveds_is_queued_once() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(1);
        let a2 = a.clone();
        let plus = rt.derived(move || a.get() + 1);
        let minus = rt.derived(move || a2.get() - 1);

        rt.effect(move || {
            plus.get();
            minus.get();
        });

        set_a.set(5).unwrap();
        assert_eq!(rt.pending_effects(), 1);
    }

    #[test]
    fn derived_panic_keeps_previous_cache() {
        let rt = Runtime::new();
        let (a, set_a) = rt.signal(1);
        let checked = rt.derived(move || {
            let v = a.get();
            assert!(v < 10, "too large");
            v
        });
        assert_eq!(checked.get(), 1);

        set_a.set(50).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| checked.get()));
        assert!(result.is_err());
        assert_eq!(checked.state(), Some(DerivedState::Dirty));

        set_a.set(3).unwrap();
        assert_eq!(checked.get(), 3);
    }

    #[test]
    fn pass_guard_restores_outer_collector() {
        let slot = RefCell::new(Some(vec![NodeId::new()]));
        {
            let pass = PassGuard::enter(&slot);
            assert_eq!(slot.borrow().as_ref().map(Vec::len), Some(0));
            assert!(pass.finish().is_empty());
        }
        assert_eq!(slot.borrow().as_ref().map(Vec::len), Some(1));
    }
}
