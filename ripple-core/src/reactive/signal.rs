//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (derived/effect), the
//!    signal registers that context as a reaction.
//!
//! 2. When a signal's value changes, the runtime propagates the change to
//!    every reaction downstream of it.
//!
//! 3. Writing a value equal to the current one is a no-op. Equality is
//!    `PartialEq`, except that two values unequal to themselves (such as
//!    `NaN`) count as equal.
//!
//! # Handles
//!
//! [`signal`] returns a read half and a write half sharing one node. The node
//! is released when the last clone of either half is dropped.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{cast, NodeRef, Runtime};
use crate::error::Result;
use crate::graph::{same_value, Node, NodeId};

/// The read half of a signal.
pub struct ReadSignal<T> {
    node: Rc<NodeRef>,
    _marker: PhantomData<fn() -> T>,
}

/// The write half of a signal.
pub struct WriteSignal<T> {
    node: Rc<NodeRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ReadSignal<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a reaction. Inside a fork the forked value is
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics if the owning runtime has been dropped. Use
    /// [`try_get`](Self::try_get) to handle that case.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("reading signal {}: {err}", self.id()),
        }
    }

    /// Get the current value, or the reason it cannot be read.
    pub fn try_get(&self) -> Result<T> {
        let rt = self.node.runtime()?;
        let value = rt.read(self.id())?;
        Ok(cast(&value))
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        match self.node.runtime() {
            Ok(rt) => rt.untrack(|| self.get()),
            Err(err) => panic!("reading signal {}: {err}", self.id()),
        }
    }
}

impl<T> WriteSignal<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Set a new value and propagate the change.
    ///
    /// Dependent effects are queued for the next flush. Inside a fork the
    /// value is written to the fork instead. Returns the written value.
    ///
    /// Fails with [`UnsafeMutation`](crate::ReactiveError::UnsafeMutation)
    /// when called while a derived is computing.
    pub fn set(&self, value: T) -> Result<T> {
        let rt = self.node.runtime()?;
        let written = rt.write(self.id(), Rc::new(value))?;
        Ok(cast(&written))
    }

    /// Update the value using a function of the current one.
    ///
    /// The current value is read without tracking and, inside a fork,
    /// includes the fork's own writes.
    pub fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        let rt = self.node.runtime()?;
        let current = rt.untrack(|| rt.read(self.id()))?;
        let next = f(current
            .downcast_ref::<T>()
            .expect("node value has the type of its handle"));
        self.set(next)
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSignal").field("id", &self.node.id()).finish()
    }
}

impl<T> fmt::Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSignal").field("id", &self.node.id()).finish()
    }
}

impl Runtime {
    /// Create a signal holding `initial`.
    pub fn signal<T>(&self, initial: T) -> (ReadSignal<T>, WriteSignal<T>)
    where
        T: Clone + PartialEq + 'static,
    {
        let id = self.insert(|parent, seq| {
            Node::source(parent, seq, Rc::new(initial), same_value::<T>)
        });
        let node = Rc::new(NodeRef::new(self, id));
        (
            ReadSignal {
                node: Rc::clone(&node),
                _marker: PhantomData,
            },
            WriteSignal {
                node,
                _marker: PhantomData,
            },
        )
    }
}

/// Create a signal on the current runtime.
///
/// # Example
///
/// ```rust,ignore
/// let (count, set_count) = signal(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (queues dependent effects)
/// set_count.set(5)?;
/// ```
pub fn signal<T>(initial: T) -> (ReadSignal<T>, WriteSignal<T>)
where
    T: Clone + PartialEq + 'static,
{
    Runtime::current().signal(initial)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
