//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Each node kind carries only the fields it needs: a source has a value and
//! its readers, a derived is both a source and a reaction, and an effect is a
//! reaction that also sits in the effect tree.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::reactive::Cleanup;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are never reused, so a stale id simply misses in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A type-erased node value. Values are immutable once stored; a write
/// replaces the whole `Rc`.
pub(crate) type Value = Rc<dyn Any>;

/// Equality used to decide whether a write or recomputation changed a value.
pub(crate) type EqFn = fn(&dyn Any, &dyn Any) -> bool;

/// A derived computation, erased to return a [`Value`].
pub(crate) type ComputeFn = Rc<dyn Fn() -> Value>;

/// An effect body, erased to return its optional cleanup.
pub(crate) type EffectFn = Rc<dyn Fn() -> Option<Cleanup>>;

/// NaN-aware equality: values that are unequal to themselves compare equal to
/// each other, so writing NaN over NaN is not a change.
#[allow(clippy::eq_op)]
pub(crate) fn same_value<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b || (a != a && b != b),
        _ => false,
    }
}

/// Freshness of a derived's canonical cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedState {
    /// Never computed outside a fork.
    Uninitialized,

    /// The cached value is up to date.
    Clean,

    /// An upstream derived may have changed. Its inputs are checked before
    /// anything is recomputed.
    MaybeDirty,

    /// A direct input changed; recompute on next read.
    Dirty,
}

/// A mutable value cell.
pub(crate) struct SourceNode {
    pub(crate) value: Value,
    pub(crate) equals: EqFn,
    /// Reactions that read this source, in first-observed order.
    pub(crate) reactions: IndexSet<NodeId>,
}

/// A memoized pure computation.
pub(crate) struct DerivedNode {
    pub(crate) value: Option<Value>,
    pub(crate) equals: EqFn,
    pub(crate) reactions: IndexSet<NodeId>,
    pub(crate) compute: ComputeFn,
    pub(crate) deps: IndexSet<NodeId>,
    /// Effects created while this derived was computing.
    pub(crate) effects: Vec<NodeId>,
    pub(crate) state: DerivedState,
}

impl DerivedNode {
    /// Flag a clean cache as possibly stale. An uninitialized derived stays
    /// uninitialized.
    pub(crate) fn mark_maybe_dirty(&mut self) {
        if self.state == DerivedState::Clean {
            self.state = DerivedState::MaybeDirty;
        }
    }

    /// Flag the cache as stale because a direct input changed.
    pub(crate) fn mark_dirty(&mut self) {
        if self.state != DerivedState::Uninitialized {
            self.state = DerivedState::Dirty;
        }
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.state == DerivedState::Clean
    }
}

/// A side-effecting subscriber and its place in the effect tree.
pub(crate) struct EffectNode {
    pub(crate) run: EffectFn,
    pub(crate) teardown: Option<Cleanup>,
    pub(crate) deps: IndexSet<NodeId>,
    pub(crate) head: Option<NodeId>,
    pub(crate) tail: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) prev: Option<NodeId>,
    /// Creation order among parentless effects.
    pub(crate) root_index: Option<u64>,
    /// Queued for the next flush.
    pub(crate) dirty: bool,
    /// Never tracks dependencies of its own.
    pub(crate) root: bool,
    /// Not linked into a parent's child list.
    pub(crate) disconnected: bool,
}

impl EffectNode {
    pub(crate) fn has_children(&self) -> bool {
        self.head.is_some()
    }
}

/// What kind of node this is, with the fields of that kind.
pub(crate) enum NodeKind {
    Source(SourceNode),
    Derived(DerivedNode),
    Effect(EffectNode),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    /// The reaction that was running when this node was created.
    pub(crate) parent: Option<NodeId>,
    /// Creation sequence within the owning runtime.
    pub(crate) seq: u64,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Create a new source node.
    pub(crate) fn source(parent: Option<NodeId>, seq: u64, value: Value, equals: EqFn) -> Self {
        Self {
            id: NodeId::new(),
            parent,
            seq,
            kind: NodeKind::Source(SourceNode {
                value,
                equals,
                reactions: IndexSet::new(),
            }),
        }
    }

    /// Create a new derived node. It starts uninitialized so the first read
    /// computes it.
    pub(crate) fn derived(parent: Option<NodeId>, seq: u64, compute: ComputeFn, equals: EqFn) -> Self {
        Self {
            id: NodeId::new(),
            parent,
            seq,
            kind: NodeKind::Derived(DerivedNode {
                value: None,
                equals,
                reactions: IndexSet::new(),
                compute,
                deps: IndexSet::new(),
                effects: Vec::new(),
                state: DerivedState::Uninitialized,
            }),
        }
    }

    /// Create a new effect node.
    ///
    /// `owner` is the reaction running at creation. It becomes the parent
    /// unless the effect is disconnected; only effects created with no owner
    /// at all get a `root_index`.
    pub(crate) fn effect(
        owner: Option<NodeId>,
        seq: u64,
        run: EffectFn,
        root: bool,
        disconnected: bool,
    ) -> Self {
        let parent = if disconnected { None } else { owner };
        Self {
            id: NodeId::new(),
            parent,
            seq,
            kind: NodeKind::Effect(EffectNode {
                run,
                teardown: None,
                deps: IndexSet::new(),
                head: None,
                tail: None,
                next: None,
                prev: None,
                root_index: owner.is_none().then_some(seq),
                dirty: false,
                root,
                disconnected,
            }),
        }
    }

    pub(crate) fn is_derived(&self) -> bool {
        matches!(self.kind, NodeKind::Derived(_))
    }

    pub(crate) fn as_derived(&self) -> Option<&DerivedNode> {
        match &self.kind {
            NodeKind::Derived(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn as_derived_mut(&mut self) -> Option<&mut DerivedNode> {
        match &mut self.kind {
            NodeKind::Derived(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn as_effect(&self) -> Option<&EffectNode> {
        match &self.kind {
            NodeKind::Effect(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_effect_mut(&mut self) -> Option<&mut EffectNode> {
        match &mut self.kind {
            NodeKind::Effect(e) => Some(e),
            _ => None,
        }
    }

    /// Readers of this node. Effects have none.
    pub(crate) fn reactions(&self) -> Option<&IndexSet<NodeId>> {
        match &self.kind {
            NodeKind::Source(s) => Some(&s.reactions),
            NodeKind::Derived(d) => Some(&d.reactions),
            NodeKind::Effect(_) => None,
        }
    }

    pub(crate) fn reactions_mut(&mut self) -> Option<&mut IndexSet<NodeId>> {
        match &mut self.kind {
            NodeKind::Source(s) => Some(&mut s.reactions),
            NodeKind::Derived(d) => Some(&mut d.reactions),
            NodeKind::Effect(_) => None,
        }
    }

    /// What this node read during its last evaluation. Sources have none.
    pub(crate) fn deps(&self) -> Option<&IndexSet<NodeId>> {
        match &self.kind {
            NodeKind::Source(_) => None,
            NodeKind::Derived(d) => Some(&d.deps),
            NodeKind::Effect(e) => Some(&e.deps),
        }
    }

    pub(crate) fn deps_mut(&mut self) -> Option<&mut IndexSet<NodeId>> {
        match &mut self.kind {
            NodeKind::Source(_) => None,
            NodeKind::Derived(d) => Some(&mut d.deps),
            NodeKind::Effect(e) => Some(&mut e.deps),
        }
    }

    /// The canonical value, if this node holds one.
    pub(crate) fn value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Source(s) => Some(&s.value),
            NodeKind::Derived(d) => d.value.as_ref(),
            NodeKind::Effect(_) => None,
        }
    }

    pub(crate) fn equals(&self) -> Option<EqFn> {
        match &self.kind {
            NodeKind::Source(s) => Some(s.equals),
            NodeKind::Derived(d) => Some(d.equals),
            NodeKind::Effect(_) => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            NodeKind::Source(_) => "source",
            NodeKind::Derived(_) => "derived",
            NodeKind::Effect(_) => "effect",
        };
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("parent", &self.parent)
            .field("seq", &self.seq)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
