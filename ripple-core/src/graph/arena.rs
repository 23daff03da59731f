//! Node Arena
//!
//! All nodes of one runtime live here, indexed by [`NodeId`]. Edges are
//! stored as ids on both ends, so removing a node or an edge never
//! invalidates any other live node.
//!
//! The arena only does bookkeeping. It never runs user code, which lets the
//! runtime hold a borrow of it for short, non-reentrant sections.

use std::collections::HashMap;

use super::node::{DerivedNode, EffectNode, Node, NodeId};

/// Storage for the nodes of one reactive runtime.
#[derive(Default)]
pub(crate) struct NodeArena {
    nodes: HashMap<NodeId, Node>,
}

impl NodeArena {
    /// Create a new empty arena.
    pub(crate) fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the arena.
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and every edge that touches it.
    ///
    /// The node is handed back so the caller can drop it (and the closures it
    /// owns) after releasing its borrow of the arena.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;

        if let Some(deps) = node.deps() {
            for dep in deps {
                if let Some(reactions) = self.nodes.get_mut(dep).and_then(Node::reactions_mut) {
                    reactions.shift_remove(&id);
                }
            }
        }

        if let Some(reactions) = node.reactions() {
            for reaction in reactions {
                if let Some(deps) = self.nodes.get_mut(reaction).and_then(Node::deps_mut) {
                    deps.shift_remove(&id);
                }
            }
        }

        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn derived(&self, id: NodeId) -> Option<&DerivedNode> {
        self.get(id).and_then(Node::as_derived)
    }

    pub(crate) fn derived_mut(&mut self, id: NodeId) -> Option<&mut DerivedNode> {
        self.get_mut(id).and_then(Node::as_derived_mut)
    }

    pub(crate) fn effect(&self, id: NodeId) -> Option<&EffectNode> {
        self.get(id).and_then(Node::as_effect)
    }

    pub(crate) fn effect_mut(&mut self, id: NodeId) -> Option<&mut EffectNode> {
        self.get_mut(id).and_then(Node::as_effect_mut)
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    /// Record that `reaction` read `source`.
    ///
    /// Idempotent: an existing edge is left as is, so reading a node twice in
    /// one evaluation registers a single edge. Returns whether an edge was
    /// added.
    pub(crate) fn add_edge(&mut self, source: NodeId, reaction: NodeId) -> bool {
        if source == reaction || !self.contains(source) || !self.contains(reaction) {
            return false;
        }

        let added = match self.nodes.get_mut(&source).and_then(Node::reactions_mut) {
            Some(reactions) => reactions.insert(reaction),
            None => return false,
        };
        if added {
            if let Some(deps) = self.nodes.get_mut(&reaction).and_then(Node::deps_mut) {
                deps.insert(source);
            }
        }
        added
    }

    /// Drop every dependency edge held by `reaction`.
    ///
    /// Called before a reaction re-evaluates and when it is torn down.
    pub(crate) fn clear_dependencies(&mut self, reaction: NodeId) {
        let deps = match self.nodes.get_mut(&reaction).and_then(Node::deps_mut) {
            Some(deps) => std::mem::take(deps),
            None => return,
        };
        for dep in deps {
            if let Some(reactions) = self.nodes.get_mut(&dep).and_then(Node::reactions_mut) {
                reactions.shift_remove(&reaction);
            }
        }
    }

    /// Snapshot of the readers of `id`, in first-observed order.
    pub(crate) fn reactions_of(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .and_then(Node::reactions)
            .map(|reactions| reactions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_reactions(&self, id: NodeId) -> bool {
        self.get(id)
            .and_then(Node::reactions)
            .is_some_and(|reactions| !reactions.is_empty())
    }

    /// Snapshot of what `id` read during its last evaluation.
    pub(crate) fn deps_of(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .and_then(Node::deps)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Append `child` at the tail of `parent`'s child list.
    pub(crate) fn link_child(&mut self, parent: NodeId, child: NodeId) {
        let old_tail = match self.effect_mut(parent) {
            Some(parent_effect) => {
                let old_tail = parent_effect.tail.replace(child);
                if parent_effect.head.is_none() {
                    parent_effect.head = Some(child);
                }
                old_tail
            }
            None => return,
        };
        if let Some(tail) = old_tail {
            if let Some(tail_effect) = self.effect_mut(tail) {
                tail_effect.next = Some(child);
            }
        }
        if let Some(child_effect) = self.effect_mut(child) {
            child_effect.prev = old_tail;
            child_effect.next = None;
        }
    }

    /// Detach `child` from its sibling chain, or from its parent derived's
    /// hosted effects.
    pub(crate) fn unlink_child(&mut self, child: NodeId) {
        let parent = self.parent_of(child);
        let (prev, next) = match self.effect_mut(child) {
            Some(effect) => (effect.prev.take(), effect.next.take()),
            None => return,
        };

        if let Some(parent) = parent {
            if let Some(derived) = self.derived_mut(parent) {
                derived.effects.retain(|effect| *effect != child);
                return;
            }
        }

        match prev {
            Some(prev) => {
                if let Some(prev_effect) = self.effect_mut(prev) {
                    prev_effect.next = next;
                }
            }
            None => {
                if let Some(parent_effect) = parent.and_then(|p| self.effect_mut(p)) {
                    if parent_effect.head == Some(child) {
                        parent_effect.head = next;
                    }
                }
            }
        }
        match next {
            Some(next) => {
                if let Some(next_effect) = self.effect_mut(next) {
                    next_effect.prev = prev;
                }
            }
            None => {
                if let Some(parent_effect) = parent.and_then(|p| self.effect_mut(p)) {
                    if parent_effect.tail == Some(child) {
                        parent_effect.tail = prev;
                    }
                }
            }
        }
    }

    /// Children of `parent`, head to tail.
    pub(crate) fn children_of(&self, parent: NodeId) -> Vec<NodeId> {
        let mut children = Vec::new();
        let mut curr = self.effect(parent).and_then(|effect| effect.head);
        while let Some(id) = curr {
            children.push(id);
            curr = self.effect(id).and_then(|effect| effect.next);
        }
        children
    }

    /// Get the total number of nodes in the arena.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
