//! Effect Implementation
//!
//! An Effect is a side-effecting computation that reruns whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies. Effects created while it runs become its
//!    children.
//!
//! 2. When any dependency changes, the effect is queued and reruns on the
//!    next flush.
//!
//! 3. Before rerunning, the effect destroys its children, clears its old
//!    dependencies and runs its previous cleanup. It keeps its place in the
//!    tree.
//!
//! # The Effect Tree
//!
//! Effects form a forest. A parent owns its children: destroying it destroys
//! every descendant first, so cleanups run deepest first. Effects created
//! while a derived computes are hosted by that derived and are recreated
//! every time it recomputes.
//!
//! A *root* scope is an effect that tracks nothing and is never linked into
//! a parent. It exists only to own the effects created inside it, and is
//! torn down through its [`Disposer`].
//!
//! # Cleanup
//!
//! Effects can optionally return a [`Cleanup`]. It is called before the
//! effect reruns and when the effect is destroyed, with tracking disabled.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::debug;

use super::context::ReactiveContext;
use super::runtime::{Inner, Runtime};
use crate::graph::{EffectFn, Node, NodeId};

/// A function run when an effect reruns or is destroyed.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Values an effect body may return.
///
/// Implemented for `()` (no cleanup), [`Cleanup`] and `Option<Cleanup>`.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

/// Handle to an effect.
///
/// Dropping the handle does not stop the effect; it lives until
/// [`dispose`](Effect::dispose) is called or its parent is destroyed.
#[derive(Clone)]
pub struct Effect {
    rt: Weak<Inner>,
    id: NodeId,
}

impl Effect {
    /// Get the effect's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the effect is still part of the graph.
    pub fn is_alive(&self) -> bool {
        let Some(rt) = Runtime::upgrade(&self.rt) else {
            return false;
        };
        let alive = rt.inner().graph.borrow().effect(self.id).is_some();
        alive
    }

    /// Destroy the effect and all of its descendants, running their
    /// cleanups deepest first.
    pub fn dispose(&self) {
        if let Some(rt) = Runtime::upgrade(&self.rt) {
            debug!(effect = %self.id, "disposing effect");
            rt.destroy_effect(self.id);
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Tears down a root scope.
#[must_use = "a root scope lives until it is disposed"]
pub struct Disposer {
    rt: Weak<Inner>,
    id: NodeId,
}

impl Disposer {
    /// Destroy the root scope and everything created inside it.
    pub fn dispose(self) {
        if let Some(rt) = Runtime::upgrade(&self.rt) {
            debug!(root = %self.id, "disposing root scope");
            rt.destroy_effect(self.id);
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer").field("id", &self.id).finish()
    }
}

impl Runtime {
    /// Create an effect that runs `f` now and again whenever something it
    /// read changes.
    ///
    /// `f` may return a [`Cleanup`], which runs before the next rerun and
    /// when the effect is destroyed. An effect created inside another effect
    /// is destroyed together with it. Inside a fork the effect is not
    /// created and the handle is never alive.
    pub fn effect<F, R>(&self, f: F) -> Effect
    where
        F: Fn() -> R + 'static,
        R: IntoCleanup,
    {
        let run: EffectFn = Rc::new(move || f().into_cleanup());
        let id = self.create_effect(run, false, false);
        Effect {
            rt: self.downgrade(),
            id,
        }
    }

    /// Run `f` in a root scope and return a [`Disposer`] for it.
    ///
    /// The scope tracks nothing and is not owned by any enclosing effect.
    /// Effects created inside `f` live until the disposer is used.
    pub fn root<F, R>(&self, f: F) -> Disposer
    where
        F: FnOnce() -> R + 'static,
        R: IntoCleanup,
    {
        let f = Cell::new(Some(f));
        let run: EffectFn = Rc::new(move || f.take().and_then(|f| f().into_cleanup()));
        let id = self.create_effect(run, true, true);
        Disposer {
            rt: self.downgrade(),
            id,
        }
    }

    /// Create an effect node, run it and place it in the tree.
    ///
    /// A panic in `run` destroys the half-built effect and resumes. While a
    /// fork overlay is active nothing is created or run, and the returned id
    /// names no node.
    pub(crate) fn create_effect(&self, run: EffectFn, root: bool, disconnected: bool) -> NodeId {
        let inner = self.inner();
        if self.forking() {
            // Forked values never reach an effect body.
            let id = NodeId::new();
            debug!(effect = %id, "effect suppressed inside a fork");
            return id;
        }

        let owner = inner.stack.top();
        let parent = if disconnected { None } else { owner };
        let seq = self.next_seq();
        let id = inner
            .graph
            .borrow_mut()
            .insert(Node::effect(owner, seq, run.clone(), root, disconnected));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ctx = ReactiveContext::enter(&inner.stack, Some(id));
            run()
        }));
        let teardown = match outcome {
            Ok(teardown) => teardown,
            Err(payload) => {
                self.destroy_effect(id);
                panic::resume_unwind(payload);
            }
        };

        let mut graph = inner.graph.borrow_mut();
        if !graph.contains(id) {
            // Destroyed from inside its own body.
            drop(graph);
            if let Some(cleanup) = teardown {
                self.run_cleanup(cleanup);
            }
            return id;
        }
        let discard = match graph.effect_mut(id) {
            Some(effect) => {
                effect.teardown = teardown;
                disconnected
                    && effect.teardown.is_none()
                    && effect.deps.is_empty()
                    && !effect.has_children()
            }
            None => false,
        };

        if let Some(parent) = parent {
            match graph.derived_mut(parent) {
                Some(derived) => derived.effects.push(id),
                None => graph.link_child(parent, id),
            }
        }

        let removed = if discard { graph.remove(id) } else { None };
        drop(graph);
        drop(removed);
        id
    }

    /// Store the cleanup returned by a rerun.
    pub(crate) fn store_teardown(&self, id: NodeId, cleanup: Option<Cleanup>) {
        let orphan = match self.inner().graph.borrow_mut().effect_mut(id) {
            Some(effect) => {
                effect.teardown = cleanup;
                None
            }
            None => cleanup,
        };
        if let Some(cleanup) = orphan {
            self.run_cleanup(cleanup);
        }
    }

    /// Destroy an effect: children first, then its edges, its place in the
    /// tree and its node, and finally its cleanup.
    pub(crate) fn destroy_effect(&self, id: NodeId) {
        let inner = self.inner();
        let children = inner.graph.borrow().children_of(id);
        for child in children {
            self.destroy_effect(child);
        }

        let removed = {
            let mut graph = inner.graph.borrow_mut();
            graph.clear_dependencies(id);
            graph.unlink_child(id);
            graph.remove(id)
        };
        let Some(mut node) = removed else {
            return;
        };

        let teardown = node.as_effect_mut().and_then(|effect| effect.teardown.take());
        if let Some(cleanup) = teardown {
            self.run_cleanup(cleanup);
        }
        drop(node);
    }

    /// Prepare an effect for a rerun. Like [`destroy_effect`], except the
    /// effect stays in the arena and keeps its place among its siblings.
    ///
    /// [`destroy_effect`]: Runtime::destroy_effect
    pub(crate) fn reset_effect(&self, id: NodeId) {
        let inner = self.inner();
        let children = inner.graph.borrow().children_of(id);
        for child in children {
            self.destroy_effect(child);
        }

        let teardown = {
            let mut graph = inner.graph.borrow_mut();
            graph.clear_dependencies(id);
            graph
                .effect_mut(id)
                .and_then(|effect| effect.teardown.take())
        };
        if let Some(cleanup) = teardown {
            self.run_cleanup(cleanup);
        }
    }

    /// Run a cleanup with a null reaction on the stack, so nothing it reads
    /// is tracked.
    fn run_cleanup(&self, cleanup: Cleanup) {
        let _ctx = ReactiveContext::enter(&self.inner().stack, None);
        cleanup.run();
    }
}

/// Create an effect on the current runtime.
///
/// See [`Runtime::effect`].
pub fn effect<F, R>(f: F) -> Effect
where
    F: Fn() -> R + 'static,
    R: IntoCleanup,
{
    Runtime::current().effect(f)
}

/// Run `f` in a root scope on the current runtime.
///
/// See [`Runtime::root`].
pub fn root<F, R>(f: F) -> Disposer
where
    F: FnOnce() -> R + 'static,
    R: IntoCleanup,
{
    Runtime::current().root(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
