//! Ripple Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, deriveds, effects)
//! - Automatic dependency tracking with glitch-free propagation
//! - An effect tree with deterministic teardown and rerun order
//! - Batched, deferred effect flushing
//! - Forks: transactional overlays for exploring hypothetical state
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, tracking, propagation and forks
//! - `graph`: Dependency graph storage and effect scheduling
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{derived, effect, flush, signal};
//!
//! // Create a signal
//! let (count, set_count) = signal(1);
//!
//! // Create a derived value
//! let double = derived(move || count.get() * 2);
//!
//! // Create an effect
//! effect(move || {
//!     println!("double: {}", double.get());
//! });
//! // Prints "double: 2"
//!
//! // Update the signal, then run queued effects
//! set_count.set(2)?;
//! flush();
//! // Prints "double: 4"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, PanicPolicy, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use graph::{DerivedState, NodeId};
pub use reactive::{
    derived, effect, flush, fork, fork_async, root, signal, untrack, Cleanup, Derived, Disposer,
    Effect, EnterGuard, FlushReport, Fork, IntoCleanup, ReadSignal, Runtime, WriteSignal,
};
