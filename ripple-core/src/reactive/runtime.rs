//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, deriveds,
//! and effects. It owns the dependency graph, the tracking stack, the effect
//! run queue and the fork overlay slot.
//!
//! # How It Works
//!
//! 1. When a signal or derived is created, its node is inserted into the
//!    runtime's arena. The returned handle refers to it by id.
//!
//! 2. When a derived or effect reads a node, the runtime records the edge
//!    in both directions.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks dependent deriveds as "maybe dirty"
//!    b. Recomputes the ones that are observed, once each
//!    c. Queues the effects whose inputs actually changed
//!    d. Lazy deriveds recompute on next access
//!
//! 4. Queued effects run on the next [`flush`](Runtime::flush), in tree
//!    order, each at most once no matter how many writes queued it.
//!
//! # Thread Model
//!
//! A runtime is single-threaded. Every thread has a *current* runtime that
//! backs the free functions ([`signal`](crate::signal),
//! [`effect`](crate::effect), ...). It is created lazily and can be replaced
//! for a scope with [`Runtime::enter`].

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, error, trace};

use super::context::{ReactionStack, ReactiveContext};
use crate::config::{FlushMode, PanicPolicy, RuntimeConfig};
use crate::error::{ReactiveError, Result};
use crate::graph::{DerivedState, EffectQueue, Node, NodeArena, NodeId, NodeKind, Value};

/// Speculative values written or computed inside a fork, in insertion order.
pub(crate) type Overlay = IndexMap<NodeId, Value>;

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Shared state behind a [`Runtime`].
pub(crate) struct Inner {
    pub(super) config: RuntimeConfig,
    pub(super) graph: RefCell<NodeArena>,
    pub(super) stack: ReactionStack,
    pub(super) queue: RefCell<EffectQueue>,
    /// The single active fork overlay, if any.
    pub(super) overlay: RefCell<Option<Overlay>>,
    /// Nodes of the fork currently being applied.
    pub(super) applying: RefCell<Option<HashSet<NodeId>>>,
    /// Deriveds whose value changed during the current propagation pass.
    pub(super) pass: RefCell<Option<Vec<NodeId>>>,
    pub(super) seq: Cell<u64>,
    /// Bumped on every canonical write.
    pub(super) epoch: Cell<u64>,
    pub(super) flush_scheduled: Cell<bool>,
    /// Nodes whose last handle dropped while the graph was borrowed.
    pub(super) released: RefCell<Vec<NodeId>>,
}

/// A reactive runtime.
///
/// Cloning a `Runtime` is cheap and yields another reference to the same
/// graph. Handles created by a runtime keep only a weak reference to it, so
/// dropping the last `Runtime` clone frees the whole graph.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let (count, set_count) = rt.signal(1);
/// let double = rt.derived(move || count.get() * 2);
///
/// rt.effect(move || println!("{}", double.get()));
/// set_count.set(2)?;
/// rt.flush(); // prints 4
/// ```
#[derive(Clone)]
pub struct Runtime(Rc<Inner>);

/// Outcome of one [`Runtime::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Effects that were rerun.
    pub ran: usize,

    /// Effects whose body panicked and was isolated.
    pub panicked: usize,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(?config, "creating reactive runtime");
        Self(Rc::new(Inner {
            config,
            graph: RefCell::new(NodeArena::new()),
            stack: ReactionStack::new(),
            queue: RefCell::new(EffectQueue::default()),
            overlay: RefCell::new(None),
            applying: RefCell::new(None),
            pass: RefCell::new(None),
            seq: Cell::new(0),
            epoch: Cell::new(0),
            flush_scheduled: Cell::new(false),
            released: RefCell::new(Vec::new()),
        }))
    }

    /// The runtime backing the free functions on this thread.
    ///
    /// Created with the default configuration on first use.
    pub fn current() -> Runtime {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(Runtime::new)
                .clone()
        })
    }

    /// Make this runtime the current one until the guard is dropped.
    pub fn enter(&self) -> EnterGuard {
        let prev = CURRENT.with(|current| current.replace(Some(self.clone())));
        EnterGuard { prev }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.sweep_released();
        self.0.graph.borrow().len()
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effects(&self) -> usize {
        self.0.queue.borrow().len()
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.0
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Runtime> {
        weak.upgrade().map(Runtime)
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let seq = self.0.seq.get() + 1;
        self.0.seq.set(seq);
        seq
    }

    /// Insert a freshly built node. Its parent is whatever reaction is
    /// running, which is only used to place effects in the tree.
    pub(crate) fn insert(&self, build: impl FnOnce(Option<NodeId>, u64) -> Node) -> NodeId {
        let parent = self.0.stack.top();
        let seq = self.next_seq();
        self.0.graph.borrow_mut().insert(build(parent, seq))
    }

    /// Register `id` as a dependency of the running reaction.
    pub(crate) fn track(&self, id: NodeId) {
        let inner = self.inner();
        if !inner.stack.is_tracking() {
            return;
        }
        let Some(reaction) = inner.stack.top() else {
            return;
        };
        if reaction == id {
            return;
        }

        let mut graph = inner.graph.borrow_mut();
        if graph.effect(reaction).is_some_and(|effect| effect.root) {
            return;
        }
        if graph.add_edge(id, reaction) {
            trace!(source = %id, reaction = %reaction, "tracked dependency");
        }
    }

    pub(crate) fn overlay_value(&self, id: NodeId) -> Option<Value> {
        self.0
            .overlay
            .borrow()
            .as_ref()
            .and_then(|overlay| overlay.get(&id).cloned())
    }

    pub(crate) fn forking(&self) -> bool {
        self.0.overlay.borrow().is_some()
    }

    fn canonical_value(&self, id: NodeId) -> Option<Value> {
        self.0.graph.borrow().get(id).and_then(Node::value).cloned()
    }

    /// Read a node's value, tracking it and bringing a stale derived up to
    /// date first.
    pub(crate) fn read(&self, id: NodeId) -> Result<Value> {
        self.track(id);

        if let Some(value) = self.overlay_value(id) {
            return Ok(value);
        }

        let is_derived = self.0.graph.borrow().derived(id).is_some();
        if is_derived && self.is_stale(id) {
            if self.0.stack.contains(id) {
                return Err(ReactiveError::Cycle);
            }
            self.refresh(id);
            if let Some(value) = self.overlay_value(id) {
                return Ok(value);
            }
        }

        // A live handle keeps its node, so a miss means the graph is gone.
        self.canonical_value(id).ok_or(ReactiveError::RuntimeDropped)
    }

    /// Write a node's value and propagate the change.
    ///
    /// Writes land in the active fork overlay when there is one. Returns the
    /// written value; an equal write returns it without side effects.
    pub(crate) fn write(&self, id: NodeId, value: Value) -> Result<Value> {
        let inner = self.inner();
        if let Some(top) = inner.stack.top() {
            if inner.graph.borrow().derived(top).is_some() {
                return Err(ReactiveError::UnsafeMutation);
            }
        }

        let (current, equals) = {
            let graph = inner.graph.borrow();
            match graph.get(id) {
                Some(node) => (node.value().cloned(), node.equals()),
                None => return Ok(value),
            }
        };
        let current = self.overlay_value(id).or(current);
        if let (Some(current), Some(equals)) = (&current, equals) {
            if equals(current.as_ref(), value.as_ref()) {
                return Ok(value);
            }
        }

        let replaced = if self.forking() {
            inner
                .overlay
                .borrow_mut()
                .as_mut()
                .and_then(|overlay| overlay.insert(id, value.clone()))
        } else {
            inner.epoch.set(inner.epoch.get() + 1);
            let mut graph = inner.graph.borrow_mut();
            match graph.get_mut(id).map(|node| &mut node.kind) {
                Some(NodeKind::Source(source)) => {
                    Some(std::mem::replace(&mut source.value, value.clone()))
                }
                Some(NodeKind::Derived(derived)) => {
                    derived.state = DerivedState::Clean;
                    derived.value.replace(value.clone())
                }
                _ => None,
            }
        };
        drop(replaced);

        trace!(node = %id, forking = self.forking(), "value changed");
        self.mark_dirty(id);
        Ok(value)
    }

    /// Free a source or derived whose last handle was dropped.
    pub(crate) fn release(&self, id: NodeId) {
        let inner = self.inner();
        let (hosted, removed) = match inner.graph.try_borrow_mut() {
            Ok(mut graph) => {
                let hosted = graph
                    .derived_mut(id)
                    .map(|derived| std::mem::take(&mut derived.effects))
                    .unwrap_or_default();
                (hosted, graph.remove(id))
            }
            Err(_) => {
                inner.released.borrow_mut().push(id);
                return;
            }
        };

        for effect in hosted {
            self.destroy_effect(effect);
        }
        let evicted = inner
            .overlay
            .try_borrow_mut()
            .ok()
            .and_then(|mut overlay| overlay.as_mut().and_then(|o| o.shift_remove(&id)));

        if removed.is_some() {
            trace!(node = %id, "released node");
        }
        drop(removed);
        drop(evicted);
    }

    /// Release nodes whose handles were dropped mid-update.
    pub(crate) fn sweep_released(&self) {
        loop {
            let next = self.0.released.borrow_mut().pop();
            let Some(id) = next else {
                break;
            };
            self.release(id);
        }
    }

    /// Arrange for a flush according to the configured [`FlushMode`].
    pub(crate) fn schedule_flush(&self) {
        match self.0.config.flush_mode {
            FlushMode::Manual => {}
            FlushMode::Local => {
                if self.0.flush_scheduled.replace(true) {
                    return;
                }
                let rt = self.clone();
                tokio::task::spawn_local(async move {
                    rt.flush();
                });
            }
        }
    }

    /// Run every queued effect.
    ///
    /// Effects run in the order they were queued, each with its previous
    /// cleanup and child effects torn down first. Effects destroyed after
    /// being queued are skipped. While a fork overlay is active the flush is
    /// deferred and nothing runs.
    pub fn flush(&self) -> FlushReport {
        let inner = self.inner();
        inner.flush_scheduled.set(false);
        self.sweep_released();

        let mut report = FlushReport::default();
        if self.forking() {
            debug!("flush deferred until the active fork is released");
            return report;
        }

        loop {
            let next = inner.queue.borrow_mut().pop();
            let Some(id) = next else {
                break;
            };
            let run = match inner.graph.borrow_mut().effect_mut(id) {
                Some(effect) => {
                    effect.dirty = false;
                    effect.run.clone()
                }
                None => continue,
            };

            self.reset_effect(id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let _ctx = ReactiveContext::enter(&inner.stack, Some(id));
                run()
            }));
            report.ran += 1;

            match outcome {
                Ok(cleanup) => self.store_teardown(id, cleanup),
                Err(payload) => match inner.config.effect_panics {
                    PanicPolicy::Isolate => {
                        report.panicked += 1;
                        error!(
                            effect = %id,
                            panic = panic_message(payload.as_ref()),
                            "effect panicked during flush"
                        );
                    }
                    PanicPolicy::Abort => {
                        if !inner.queue.borrow().is_empty() {
                            self.schedule_flush();
                        }
                        panic::resume_unwind(payload);
                    }
                },
            }
        }

        if report.ran > 0 {
            debug!(ran = report.ran, panicked = report.panicked, "flush complete");
        }
        report
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.0.graph.try_borrow().map(|graph| graph.len()).ok();
        f.debug_struct("Runtime")
            .field("config", &self.0.config)
            .field("nodes", &nodes)
            .field("pending_effects", &self.0.queue.try_borrow().map(|q| q.len()).ok())
            .field("forking", &self.0.overlay.try_borrow().map(|o| o.is_some()).ok())
            .finish()
    }
}

/// Guard returned by [`Runtime::enter`]. Restores the previously current
/// runtime when dropped.
#[must_use = "the runtime stops being current when the guard is dropped"]
pub struct EnterGuard {
    prev: Option<Runtime>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let replaced = CURRENT.with(|current| current.replace(prev));
        drop(replaced);
    }
}

/// Owning reference from a typed handle to its node.
///
/// The node is released when the last handle sharing this reference drops.
pub(crate) struct NodeRef {
    rt: Weak<Inner>,
    id: NodeId,
}

impl NodeRef {
    pub(crate) fn new(rt: &Runtime, id: NodeId) -> Self {
        Self {
            rt: rt.downgrade(),
            id,
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn runtime(&self) -> Result<Runtime> {
        Runtime::upgrade(&self.rt).ok_or(ReactiveError::RuntimeDropped)
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if let Some(rt) = Runtime::upgrade(&self.rt) {
            rt.release(self.id);
        }
    }
}

/// Clone the typed value out of a node value.
pub(crate) fn cast<T: Clone + 'static>(value: &Value) -> T {
    value
        .downcast_ref::<T>()
        .cloned()
        .expect("node value has the type of its handle")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Run every queued effect on the current runtime.
///
/// See [`Runtime::flush`].
pub fn flush() -> FlushReport {
    Runtime::current().flush()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
