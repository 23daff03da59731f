//! Dependency Graph
//!
//! This module holds the data side of the reactive runtime: the nodes, the
//! arena they live in, and the effect scheduling rules. It never calls user
//! code; that is the job of [`crate::reactive`].
//!
//! # Overview
//!
//! There are two overlapping structures:
//!
//! - The **dependency graph**, a DAG of read edges. If a derived or effect
//!   read a source during its last evaluation, the source lists it in
//!   `reactions` and it lists the source in `deps`.
//! - The **effect tree**, a forest built when effects are created inside
//!   other effects (or inside deriveds). Parents own their children: tearing
//!   down a parent tears down its whole subtree.
//!
//! ```text
//!      count               A
//!     /     \             / \
//!  double   /            B   C
//!     \    /
//!     effect
//! ```
//!
//! # Design Decisions
//!
//! 1. Nodes are stored in a single arena keyed by [`NodeId`], and every edge
//!    is an id rather than a reference. Edges can be removed in isolation
//!    during teardown without invalidating any other handle.
//!
//! 2. Ids are never reused, so a handle to a node that has been torn down
//!    simply misses.
//!
//! 3. Both directions of every edge are stored, so propagation walks
//!    `reactions` and teardown walks `deps` without scanning the arena.

mod arena;
mod node;
mod scheduler;

pub use node::{DerivedState, NodeId};

pub(crate) use arena::NodeArena;
pub(crate) use node::{same_value, ComputeFn, EffectFn, Node, NodeKind, Value};
pub(crate) use scheduler::{filter_effects, sort_effects, EffectQueue};
