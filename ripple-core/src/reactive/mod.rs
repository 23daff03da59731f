//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, deriveds,
//! effects and forks. These primitives form the foundation of Ripple's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a derived or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Deriveds
//!
//! A Derived is a computed value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only when something needs its
//! value.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that reruns whenever its
//! dependencies change. Reruns are batched: writes queue effects, and a
//! flush runs each queued effect once, parents before children.
//!
//! ## Forks
//!
//! A Fork runs code against hypothetical state. Writes inside it are kept
//! aside, effects do not fire, and the result can later be applied or
//! dropped.
//!
//! # Implementation Notes
//!
//! The reactive system uses a per-runtime tracking stack to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! reaction and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod derived;
mod effect;
mod fork;
mod propagate;
mod runtime;
mod signal;

pub use context::untrack;
pub use derived::{derived, Derived};
pub use effect::{effect, root, Cleanup, Disposer, Effect, IntoCleanup};
pub use fork::{fork, fork_async, Fork};
pub use runtime::{flush, EnterGuard, FlushReport, Runtime};
pub use signal::{signal, ReadSignal, WriteSignal};
