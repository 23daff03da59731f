//! Derived Implementation
//!
//! A Derived is a cached computed value that re-evaluates only when its
//! dependencies change.
//!
//! # How Deriveds Work
//!
//! 1. Creating a derived does not run it. It computes on first access.
//!
//! 2. When accessed again, if no dependency has changed, it returns the
//!    cached value.
//!
//! 3. When a dependency changes, the derived is marked "dirty", or "maybe
//!    dirty" if the change is further upstream. A maybe-dirty derived whose
//!    inputs turn out unchanged keeps its cache without recomputing.
//!
//! 4. If anything observes the derived it recomputes right away, as part of
//!    the write. Otherwise it waits for the next access.
//!
//! 5. Readers are only notified when the recomputed value differs from the
//!    cached one.
//!
//! # Why This Matters
//!
//! The lazy path avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 deriveds depend on it
//! - Only the deriveds actually read, directly or by an effect, recompute
//! - Deriveds that are never read stay dirty (no wasted work)
//!
//! Derived functions must be pure. Writing a signal from inside one fails
//! with [`UnsafeMutation`](crate::ReactiveError::UnsafeMutation).

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{cast, NodeRef, Runtime};
use crate::error::Result;
use crate::graph::{same_value, ComputeFn, DerivedState, Node, NodeId, Value};

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some deriveds return the same value even if inputs changed).
pub struct Derived<T> {
    node: Rc<NodeRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the derived's node ID.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computation panics, if the derived reads itself while
    /// computing, or if the owning runtime has been dropped.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("reading derived {}: {err}", self.id()),
        }
    }

    /// Get the current value, or the reason it cannot be produced.
    pub fn try_get(&self) -> Result<T> {
        let rt = self.node.runtime()?;
        let value = rt.read(self.id())?;
        Ok(cast(&value))
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        match self.node.runtime() {
            Ok(rt) => rt.untrack(|| self.get()),
            Err(err) => panic!("reading derived {}: {err}", self.id()),
        }
    }

    /// Freshness of the cached value, or `None` once the runtime is gone.
    ///
    /// This is the canonical state; values computed inside a fork do not
    /// change it.
    pub fn state(&self) -> Option<DerivedState> {
        let rt = self.node.runtime().ok()?;
        let state = rt
            .inner()
            .graph
            .borrow()
            .derived(self.id())
            .map(|derived| derived.state);
        state
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Runtime {
    /// Create a derived value computed by `f`.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn derived<T, F>(&self, f: F) -> Derived<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        let compute: ComputeFn = Rc::new(move || Rc::new(f()) as Value);
        let id = self.insert(|parent, seq| Node::derived(parent, seq, compute, same_value::<T>));
        Derived {
            node: Rc::new(NodeRef::new(self, id)),
            _marker: PhantomData,
        }
    }
}

/// Create a derived value on the current runtime.
///
/// # Example
///
/// ```rust,ignore
/// let (count, set_count) = signal(2);
/// let doubled = derived(move || count.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// ```
pub fn derived<T, F>(f: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Runtime::current().derived(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
