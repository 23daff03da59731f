//! Integration Tests for Reactive System
//!
//! These tests verify that signals, deriveds, effects and forks work together
//! correctly through the public API.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use ripple_core::{
    derived, effect, flush, fork, root, signal, untrack, Cleanup, DerivedState, FlushMode,
    PanicPolicy, ReactiveError, Runtime, RuntimeConfig,
};

fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

fn counter() -> Rc<Cell<u32>> {
    Rc::new(Cell::new(0))
}

/// Test the basic chain: signal -> derived -> effect, with batched reruns.
#[test]
fn effect_logs_derived_updates() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let lines = log();

    let (count, set_count) = signal(1);
    let double = derived(move || count.get() * 2);

    let out = lines.clone();
    effect(move || out.borrow_mut().push(format!("double: {}", double.get())));
    assert_eq!(*lines.borrow(), ["double: 2"]);

    set_count.set(2).unwrap();
    // Nothing runs until the flush
    assert_eq!(lines.borrow().len(), 1);

    flush();
    assert_eq!(*lines.borrow(), ["double: 2", "double: 4"]);
}

/// Test that several writes before a flush rerun each effect once.
#[test]
fn writes_are_batched_until_flush() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (a, set_a) = signal(1);
    let (b, set_b) = signal(1);
    let a_runs = counter();
    let b_runs = counter();

    let runs = a_runs.clone();
    effect(move || {
        a.get();
        runs.set(runs.get() + 1);
    });
    let runs = b_runs.clone();
    effect(move || {
        b.get();
        runs.set(runs.get() + 1);
    });

    set_a.set(2).unwrap();
    set_a.set(3).unwrap();
    set_b.set(2).unwrap();
    assert_eq!(rt.pending_effects(), 2);

    let report = flush();
    assert_eq!(report.ran, 2);
    assert_eq!(a_runs.get(), 2);
    assert_eq!(b_runs.get(), 2);

    // A second flush has nothing to do
    assert_eq!(flush().ran, 0);
}

/// Test that writing an equal value does nothing.
#[test]
fn equal_write_is_inert() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (name, set_name) = signal(String::from("ripple"));
    let runs = counter();

    let r = runs.clone();
    effect(move || {
        name.get();
        r.set(r.get() + 1);
    });

    set_name.set(String::from("ripple")).unwrap();
    assert_eq!(rt.pending_effects(), 0);
    assert_eq!(flush().ran, 0);
    assert_eq!(runs.get(), 1);
}

/// Test that a diamond-shaped graph reruns its effect once, with
/// consistent values.
#[test]
fn diamond_is_glitch_free() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (a, set_a) = signal(1);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let a1 = a.clone();
    let b = derived(move || a1.get() + 1);
    let c = derived(move || a.get() * 10);

    let out = seen.clone();
    effect(move || out.borrow_mut().push((b.get(), c.get())));

    set_a.set(2).unwrap();
    flush();
    assert_eq!(*seen.borrow(), [(2, 10), (3, 20)]);
}

/// Test that a derived no one reads is never computed.
#[test]
fn unread_derived_is_lazy() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (a, set_a) = signal(1);
    let computed = counter();

    let calls = computed.clone();
    let plus_one = derived(move || {
        calls.set(calls.get() + 1);
        a.get() + 1
    });

    set_a.set(5).unwrap();
    set_a.set(6).unwrap();
    assert_eq!(computed.get(), 0);

    assert_eq!(plus_one.get(), 7);
    assert_eq!(computed.get(), 1);
    assert_eq!(plus_one.state(), Some(DerivedState::Clean));
}

/// Test that reads inside `untrack` do not create subscriptions.
#[test]
fn untracked_reads_do_not_subscribe() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (tracked, set_tracked) = signal(1);
    let (hidden, set_hidden) = signal(1);
    let runs = counter();

    let r = runs.clone();
    effect(move || {
        tracked.get();
        untrack(|| hidden.get());
        r.set(r.get() + 1);
    });

    set_hidden.set(2).unwrap();
    assert_eq!(rt.pending_effects(), 0);

    set_tracked.set(2).unwrap();
    flush();
    assert_eq!(runs.get(), 2);
}

/// Test that writing a signal from inside a derived is refused.
#[test]
fn derived_cannot_write_signals() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (_other, set_other) = signal(0);

    let sneaky = derived(move || set_other.set(1).err());

    assert_eq!(sneaky.get(), Some(ReactiveError::UnsafeMutation));
}

/// Test that a panicking derived can be read again once its input is fixed.
#[test]
fn derived_recovers_after_panic() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (input, set_input) = signal(0);

    let checked = derived(move || {
        let value = input.get();
        assert!(value >= 0, "negative input");
        value
    });
    assert_eq!(checked.get(), 0);

    set_input.set(-1).unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| checked.get()));
    assert!(result.is_err());

    set_input.set(4).unwrap();
    assert_eq!(checked.get(), 4);
}

/// Test that disposing an effect tears down its children deepest first.
#[test]
fn nested_effects_clean_up_deepest_first() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let order = log();

    let out = order.clone();
    let outer = effect(move || {
        let inner_out = out.clone();
        effect(move || {
            let leaf_out = inner_out.clone();
            effect(move || {
                let leaf_out = leaf_out.clone();
                Cleanup::new(move || leaf_out.borrow_mut().push("leaf".into()))
            });
            let inner_out = inner_out.clone();
            Cleanup::new(move || inner_out.borrow_mut().push("inner".into()))
        });
        let out = out.clone();
        Cleanup::new(move || out.borrow_mut().push("outer".into()))
    });
    assert_eq!(rt.node_count(), 3);

    outer.dispose();
    assert_eq!(*order.borrow(), ["leaf", "inner", "outer"]);
    assert!(!outer.is_alive());
    assert_eq!(rt.node_count(), 0);
}

/// Test that a rerun tears down the previous run's children and cleanup.
#[test]
fn rerun_replaces_child_effects() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (count, set_count) = signal(0);
    let child_runs = counter();
    let cleanups = counter();

    let runs = child_runs.clone();
    let cleaned = cleanups.clone();
    effect(move || {
        count.get();
        let runs = runs.clone();
        effect(move || runs.set(runs.get() + 1));
        let cleaned = cleaned.clone();
        Cleanup::new(move || cleaned.set(cleaned.get() + 1))
    });
    assert_eq!(rt.node_count(), 3);

    set_count.set(1).unwrap();
    flush();
    assert_eq!(child_runs.get(), 2);
    assert_eq!(cleanups.get(), 1);
    // The old child is gone, the new one took its place
    assert_eq!(rt.node_count(), 3);
}

/// Test that a root scope owns its effects until disposed.
#[test]
fn root_scope_owns_effects() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (count, set_count) = signal(0);
    let runs = counter();

    let r = runs.clone();
    let disposer = root(move || {
        effect(move || {
            count.get();
            r.set(r.get() + 1);
        });
    });

    set_count.set(1).unwrap();
    flush();
    assert_eq!(runs.get(), 2);

    disposer.dispose();
    set_count.set(2).unwrap();
    flush();
    assert_eq!(runs.get(), 2);
}

/// Test that a fork changes nothing until it is applied.
#[test]
fn fork_then_apply() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (count, set_count) = signal(1);
    let c = count.clone();
    let double = derived(move || c.get() * 2);
    let lines = log();

    let out = lines.clone();
    let d = double.clone();
    effect(move || out.borrow_mut().push(format!("double: {}", d.get())));

    let forked = fork(|| {
        set_count.set(10)?;
        assert_eq!(double.get(), 20);
        Ok::<_, ReactiveError>(())
    })
    .unwrap();

    assert_eq!(count.get(), 1);
    assert_eq!(double.get(), 2);
    assert_eq!(forked.with(|| double.get()).unwrap(), 20);
    assert_eq!(flush().ran, 0);

    forked.apply().unwrap();
    flush();
    assert_eq!(count.get(), 10);
    assert_eq!(*lines.borrow(), ["double: 2", "double: 20"]);
}

/// Test that effects queued before a fork wait for it to finish.
#[test]
fn flush_is_deferred_while_forking() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (count, set_count) = signal(0);
    let runs = counter();

    let r = runs.clone();
    effect(move || {
        count.get();
        r.set(r.get() + 1);
    });
    set_count.set(1).unwrap();
    assert_eq!(rt.pending_effects(), 1);

    let inside = fork(|| {
        assert_eq!(flush().ran, 0);
        Ok::<_, ReactiveError>(())
    });
    assert!(inside.is_ok());
    assert_eq!(runs.get(), 1);

    flush();
    assert_eq!(runs.get(), 2);
}

/// Test that forks cannot nest.
#[test]
fn nested_fork_reports_in_progress() {
    let rt = Runtime::new();
    let _guard = rt.enter();

    let outer = fork(|| {
        let nested = fork(|| Ok::<_, ReactiveError>(()));
        assert_eq!(nested.unwrap_err(), ReactiveError::ForkInProgress);
        Ok::<_, ReactiveError>(())
    })
    .unwrap();

    let inspected = outer.with(|| fork(|| Ok::<_, ReactiveError>(())).map(|_| ()));
    assert_eq!(inspected.unwrap(), Err(ReactiveError::ForkInProgress));
}

/// Test that with the default policy a panicking effect does not stop the
/// rest of the flush.
#[test]
fn isolated_effect_panic_is_reported() {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let (count, set_count) = signal(0);
    let survivor_runs = counter();

    let c = count.clone();
    effect(move || {
        if c.get() > 0 {
            panic!("effect failed");
        }
    });
    let r = survivor_runs.clone();
    effect(move || {
        count.get();
        r.set(r.get() + 1);
    });

    set_count.set(1).unwrap();
    let report = flush();
    assert_eq!(report.ran, 2);
    assert_eq!(report.panicked, 1);
    assert_eq!(survivor_runs.get(), 2);
}

/// Test that the abort policy propagates the panic and keeps the remaining
/// effects queued.
#[test]
fn aborting_effect_panic_propagates() {
    let rt = Runtime::with_config(RuntimeConfig::new().effect_panics(PanicPolicy::Abort));
    let _guard = rt.enter();
    let (count, set_count) = signal(0);
    let survivor_runs = counter();

    let c = count.clone();
    effect(move || {
        if c.get() > 0 {
            panic!("effect failed");
        }
    });
    let r = survivor_runs.clone();
    effect(move || {
        count.get();
        r.set(r.get() + 1);
    });

    set_count.set(1).unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| rt.flush()));
    assert!(result.is_err());
    assert_eq!(rt.pending_effects(), 1);
    assert_eq!(survivor_runs.get(), 1);

    rt.flush();
    assert_eq!(survivor_runs.get(), 2);
}

/// Test that an async fork keeps its overlay across await points.
#[tokio::test]
async fn async_fork_holds_overlay_across_await() {
    let rt = Runtime::new();
    let (count, set_count) = rt.signal(1);

    let setter = set_count.clone();
    let reader = count.clone();
    let forked = rt
        .fork_async(move || async move {
            setter.set(2)?;
            tokio::task::yield_now().await;
            assert_eq!(reader.get(), 2);
            Ok::<_, ReactiveError>(())
        })
        .await
        .unwrap();

    assert_eq!(count.get(), 1);
    forked.apply().unwrap();
    assert_eq!(count.get(), 2);
}

/// Test that the local flush mode runs effects on the next scheduler tick.
#[tokio::test]
async fn local_mode_flushes_on_local_set() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = Runtime::with_config(RuntimeConfig::new().flush_mode(FlushMode::Local));
            let (count, set_count) = rt.signal(0);
            let seen = Rc::new(Cell::new(0));

            let out = seen.clone();
            rt.effect(move || out.set(count.get()));

            set_count.set(1).unwrap();
            set_count.set(2).unwrap();
            assert_eq!(seen.get(), 0);

            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert_eq!(seen.get(), 2);
            assert_eq!(rt.pending_effects(), 0);
        })
        .await;
}
