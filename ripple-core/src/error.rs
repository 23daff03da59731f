//! Error types for the reactive runtime.
//!
//! Most operations on the graph are total: reads, `untrack` and teardown never
//! fail. The few that can fail return a [`ReactiveError`] so callers can
//! pattern-match on the failure mode.

use thiserror::Error;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A signal was written while a derived computation was running.
    ///
    /// Derived functions must be pure. Writing from inside one is a
    /// programmer error and is reported synchronously to the caller of `set`.
    #[error("state_unsafe_mutation: signals cannot be written while a derived is computing")]
    UnsafeMutation,

    /// A fork overlay is already installed.
    ///
    /// Only one overlay may be active at a time; overlapping forks would
    /// silently corrupt each other's pending values.
    #[error("a fork overlay is already active")]
    ForkInProgress,

    /// A derived read its own value while computing it.
    #[error("derived value read itself during its own computation")]
    Cycle,

    /// The runtime that owns this handle has been dropped.
    #[error("the reactive runtime owning this handle has been dropped")]
    RuntimeDropped,
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
