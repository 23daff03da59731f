//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns a stack of the reactions being evaluated. Entering a
//! derived or effect pushes it; the returned guard pops it when dropped, so
//! the stack stays balanced even when a computation panics.
//!
//! An entry may also be a null sentinel. Effect cleanups run under one, so
//! reads made while cleaning up subscribe nothing.
//!
//! Entering a reaction turns tracking back on for its duration: a derived
//! first read inside [`untrack`] still records its own dependencies.

use std::cell::{Cell, RefCell};

use super::runtime::Runtime;
use crate::graph::NodeId;

/// The stack of reactions currently being evaluated.
#[derive(Debug)]
pub(crate) struct ReactionStack {
    entries: RefCell<Vec<Option<NodeId>>>,
    tracking: Cell<bool>,
}

impl ReactionStack {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            tracking: Cell::new(true),
        }
    }

    /// The reaction on top of the stack. `None` when the stack is empty or
    /// the top is a null sentinel.
    pub(crate) fn top(&self) -> Option<NodeId> {
        self.entries.borrow().last().copied().flatten()
    }

    /// Whether reads should currently register dependencies.
    pub(crate) fn is_tracking(&self) -> bool {
        self.tracking.get()
    }

    /// Whether `id` is anywhere on the stack.
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.entries.borrow().contains(&Some(id))
    }
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct ReactiveContext<'a> {
    stack: &'a ReactionStack,
    entry: Option<NodeId>,
    tracking: bool,
}

impl<'a> ReactiveContext<'a> {
    /// Enter a new reactive context for `entry`, or a null sentinel for
    /// `None`.
    pub(crate) fn enter(stack: &'a ReactionStack, entry: Option<NodeId>) -> Self {
        stack.entries.borrow_mut().push(entry);
        let tracking = stack.tracking.replace(true);
        Self {
            stack,
            entry,
            tracking,
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        self.stack.tracking.set(self.tracking);
        let popped = self.stack.entries.borrow_mut().pop();

        // Verify we're popping the right context.
        debug_assert_eq!(
            popped,
            Some(self.entry),
            "ReactiveContext mismatch: expected {:?}, got {:?}",
            self.entry,
            popped
        );
    }
}

/// Guard that restores the previous tracking flag when dropped.
pub(crate) struct UntrackGuard<'a> {
    stack: &'a ReactionStack,
    prev: bool,
}

impl<'a> UntrackGuard<'a> {
    pub(crate) fn enter(stack: &'a ReactionStack) -> Self {
        let prev = stack.tracking.replace(false);
        Self { stack, prev }
    }
}

impl Drop for UntrackGuard<'_> {
    fn drop(&mut self) {
        self.stack.tracking.set(self.prev);
    }
}

impl Runtime {
    /// Run `f` with dependency tracking disabled.
    ///
    /// Reads inside `f` return their values but do not subscribe the running
    /// derived or effect. The previous tracking state is restored afterwards,
    /// so calls nest.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = UntrackGuard::enter(&self.inner().stack);
        f()
    }
}

/// Run `f` on the current runtime with dependency tracking disabled.
///
/// See [`Runtime::untrack`].
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
