//! Effect Scheduler
//!
//! The scheduler decides which dirty effects are worth rerunning and in what
//! order, and holds the run queue between a write and the next flush.
//!
//! # Algorithm
//!
//! 1. **Filter.** An effect whose ancestor (up to the nearest derived
//!    boundary) is also dirty is dropped: rerunning the ancestor tears down
//!    and recreates it anyway.
//! 2. **Sort.** Effects are grouped by depth, shallowest first, since a
//!    shallow rerun may discard deeper effects before they get a chance to
//!    run stale. Within one depth, effects are ordered by their tree path:
//!    the creation index of the topmost ancestor followed by the child
//!    position at every level below it. Comparing paths lexicographically
//!    is the lowest-common-ancestor rule, and for unrelated trees it falls
//!    back to creation order, so the result is a total order.
//! 3. **Queue.** Sorted batches are appended FIFO. Batches from separate
//!    writes are concatenated, not re-sorted.

use std::collections::{HashSet, VecDeque};

use smallvec::SmallVec;

use super::arena::NodeArena;
use super::node::{NodeId, NodeKind};

/// Position of an effect in the forest, top-down.
type TreePath = SmallVec<[u64; 8]>;

/// Drop effects whose ancestor is also scheduled.
///
/// The ancestor walk stops at the first derived: effects hosted by a derived
/// are recreated by that derived's recomputation, not by an outer effect.
pub(crate) fn filter_effects(arena: &NodeArena, effects: &[NodeId]) -> Vec<NodeId> {
    let scheduled: HashSet<NodeId> = effects.iter().copied().collect();

    effects
        .iter()
        .copied()
        .filter(|&effect| {
            let mut curr = arena.parent_of(effect);
            while let Some(id) = curr {
                match arena.get(id) {
                    Some(node) if node.is_derived() => break,
                    Some(node) => {
                        if scheduled.contains(&id) {
                            return false;
                        }
                        curr = node.parent;
                    }
                    None => break,
                }
            }
            true
        })
        .collect()
}

/// Number of ancestors above `id`.
pub(crate) fn effect_depth(arena: &NodeArena, id: NodeId) -> usize {
    let mut depth = 0;
    let mut curr = arena.parent_of(id);
    while let Some(parent) = curr {
        if arena.get(parent).is_none() {
            break;
        }
        depth += 1;
        curr = arena.parent_of(parent);
    }
    depth
}

/// Index of `id` within its parent, or its creation index at the top.
fn position(arena: &NodeArena, id: NodeId) -> u64 {
    let node = match arena.get(id) {
        Some(node) => node,
        None => return u64::MAX,
    };
    let parent = match node.parent.and_then(|parent| arena.get(parent)) {
        Some(parent) => parent,
        None => {
            return node
                .as_effect()
                .and_then(|effect| effect.root_index)
                .unwrap_or(node.seq)
        }
    };

    match &parent.kind {
        NodeKind::Effect(_) => arena
            .children_of(parent.id)
            .iter()
            .position(|child| *child == id)
            .map_or(u64::MAX, |index| index as u64),
        NodeKind::Derived(derived) => derived
            .effects
            .iter()
            .position(|effect| *effect == id)
            .map_or(u64::MAX, |index| index as u64),
        NodeKind::Source(_) => node.seq,
    }
}

fn tree_path(arena: &NodeArena, id: NodeId) -> TreePath {
    let mut path = TreePath::new();
    let mut curr = Some(id);
    while let Some(node) = curr {
        if arena.get(node).is_none() {
            break;
        }
        path.push(position(arena, node));
        curr = arena.parent_of(node);
    }
    path.reverse();
    path
}

/// Order effects shallowest first, then by tree position.
pub(crate) fn sort_effects(arena: &NodeArena, effects: Vec<NodeId>) -> Vec<NodeId> {
    let mut keyed: Vec<(usize, TreePath, NodeId)> = effects
        .into_iter()
        .map(|id| (effect_depth(arena, id), tree_path(arena, id), id))
        .collect();

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, id)| id).collect()
}

/// FIFO run queue of dirty effects awaiting the next flush.
#[derive(Debug, Default)]
pub(crate) struct EffectQueue {
    pending: VecDeque<NodeId>,
}

impl EffectQueue {
    /// Append one sorted batch. Returns whether the queue went from empty to
    /// non-empty, which is when a flush needs scheduling.
    pub(crate) fn push_batch(&mut self, batch: impl IntoIterator<Item = NodeId>) -> bool {
        let was_empty = self.pending.is_empty();
        self.pending.extend(batch);
        was_empty && !self.pending.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.pending.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
