//! Forks
//!
//! A fork explores hypothetical state. While a fork body runs, every write
//! lands in an *overlay* instead of the real graph, reads see the overlay
//! first, and deriveds that depend on overlaid values are recomputed into
//! the overlay. Effects never run for forked values.
//!
//! When the body returns, the overlay is captured in a [`Fork`]. Nothing has
//! changed yet. The fork can then be:
//!
//! - dropped, discarding the hypothetical state,
//! - inspected with [`Fork::with`], which reinstalls a copy of the overlay
//!   for the duration of a closure, or
//! - committed with [`Fork::apply`], which replays its writes for real.
//!
//! Only one overlay can be installed at a time. Starting a fork (or a
//! `with`) while another is active fails with
//! [`ForkInProgress`](ReactiveError::ForkInProgress).
//!
//! # Example
//!
//! ```rust,ignore
//! let (count, set_count) = signal(1);
//! let double = derived(move || count.get() * 2);
//!
//! let fork = fork(|| {
//!     set_count.set(10)?;
//!     assert_eq!(double.get(), 20);
//!     Ok::<_, ReactiveError>(())
//! })?;
//!
//! assert_eq!(double.get(), 2);
//! fork.apply()?;
//! assert_eq!(double.get(), 20);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::rc::Weak;

use tracing::debug;

use super::runtime::{Inner, Overlay, Runtime};
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeArena, NodeId};

/// Exclusive hold on the runtime's overlay slot.
///
/// Dropping it uninstalls the overlay and reschedules any flush that was
/// deferred while it was active.
struct OverlayLock {
    rt: Runtime,
}

impl OverlayLock {
    fn acquire(rt: &Runtime, overlay: Overlay) -> Result<Self> {
        let mut slot = rt.inner().overlay.borrow_mut();
        if slot.is_some() {
            return Err(ReactiveError::ForkInProgress);
        }
        *slot = Some(overlay);
        Ok(Self { rt: rt.clone() })
    }

    /// Uninstall the overlay and hand it back.
    fn release(self) -> Overlay {
        let overlay = self.rt.inner().overlay.borrow_mut().take();
        overlay.unwrap_or_default()
    }
}

impl Drop for OverlayLock {
    fn drop(&mut self) {
        let discarded = self.rt.inner().overlay.borrow_mut().take();
        drop(discarded);

        self.rt.sweep_released();
        if self.rt.pending_effects() > 0 {
            self.rt.schedule_flush();
        }
    }
}

fn hosts_effects(graph: &NodeArena, id: NodeId) -> bool {
    graph
        .derived(id)
        .is_some_and(|derived| !derived.effects.is_empty())
}

/// Restores the previous "applying" marker when dropped.
struct ApplyingGuard<'a> {
    inner: &'a Inner,
    prev: Option<HashSet<NodeId>>,
}

impl<'a> ApplyingGuard<'a> {
    fn enter(inner: &'a Inner, marker: Option<HashSet<NodeId>>) -> Self {
        let prev = inner.applying.replace(marker);
        Self { inner, prev }
    }
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.inner.applying.replace(self.prev.take());
    }
}

/// The captured result of a fork body.
///
/// Holds the values the body wrote, and the derived values computed from
/// them, in the order they first appeared.
pub struct Fork {
    rt: Weak<Inner>,
    overlay: Overlay,
    /// Canonical write count when the overlay was captured.
    epoch: u64,
}

impl Fork {
    /// Number of overlaid nodes.
    pub fn len(&self) -> usize {
        self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    /// Commit the fork.
    ///
    /// Every overlaid value is written through the normal write path, in
    /// insertion order, so effects fire as for ordinary writes. Deriveds
    /// whose forked value is known to be consistent are written directly
    /// instead of being recomputed, except those hosting effects, which
    /// recompute so their effects are rebuilt from real state. If anything
    /// was written since the fork was captured, forked derived values may be
    /// outdated and only the signal writes are replayed.
    pub fn apply(&self) -> Result<()> {
        let rt = Runtime::upgrade(&self.rt).ok_or(ReactiveError::RuntimeDropped)?;
        let inner = rt.inner();
        let fresh = inner.epoch.get() == self.epoch;
        debug!(entries = self.overlay.len(), fresh, "applying fork");

        let marker = fresh.then(|| {
            let graph = inner.graph.borrow();
            self.overlay
                .keys()
                .copied()
                .filter(|&id| !hosts_effects(&graph, id))
                .collect()
        });
        let _applying = ApplyingGuard::enter(inner, marker);

        for (&id, value) in &self.overlay {
            let replay = {
                let graph = inner.graph.borrow();
                match graph.get(id) {
                    Some(node) if node.is_derived() => fresh && !hosts_effects(&graph, id),
                    Some(_) => true,
                    None => false,
                }
            };
            if replay {
                rt.write(id, value.clone())?;
            }
        }
        Ok(())
    }

    /// Run `f` with this fork's values installed, without changing the fork
    /// or the real graph.
    ///
    /// Writes made inside `f` go to a scratch copy of the overlay that is
    /// thrown away afterwards.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let rt = Runtime::upgrade(&self.rt).ok_or(ReactiveError::RuntimeDropped)?;
        let _lock = OverlayLock::acquire(&rt, self.overlay.clone())?;
        Ok(f())
    }
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("nodes", &self.overlay.keys().collect::<Vec<_>>())
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Runtime {
    /// Run `f` against a fresh overlay and capture the result.
    ///
    /// The real graph is untouched and no effect runs. If `f` fails, its
    /// error is returned and the overlay is discarded.
    pub fn fork<E, F>(&self, f: F) -> std::result::Result<Fork, E>
    where
        F: FnOnce() -> std::result::Result<(), E>,
        E: From<ReactiveError>,
    {
        let lock = OverlayLock::acquire(self, Overlay::new())?;
        debug!("fork started");
        f()?;
        Ok(self.capture(lock))
    }

    /// Like [`fork`](Runtime::fork), for a body that awaits.
    ///
    /// The overlay stays installed until the future completes, so every read
    /// and write on this runtime in the meantime, from any task, goes through
    /// it. Dropping the returned future discards the overlay.
    pub async fn fork_async<E, F, Fut>(&self, f: F) -> std::result::Result<Fork, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: From<ReactiveError>,
    {
        let lock = OverlayLock::acquire(self, Overlay::new())?;
        debug!("async fork started");
        f().await?;
        Ok(self.capture(lock))
    }

    fn capture(&self, lock: OverlayLock) -> Fork {
        let overlay = lock.release();
        debug!(entries = overlay.len(), "fork captured");
        Fork {
            rt: self.downgrade(),
            overlay,
            epoch: self.inner().epoch.get(),
        }
    }
}

/// Run `f` in a fork of the current runtime.
///
/// See [`Runtime::fork`].
pub fn fork<E, F>(f: F) -> std::result::Result<Fork, E>
where
    F: FnOnce() -> std::result::Result<(), E>,
    E: From<ReactiveError>,
{
    Runtime::current().fork(f)
}

/// Run an async body in a fork of the current runtime.
///
/// See [`Runtime::fork_async`].
pub async fn fork_async<E, F, Fut>(f: F) -> std::result::Result<Fork, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: From<ReactiveError>,
{
    let rt = Runtime::current();
    rt.fork_async(f).await
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
