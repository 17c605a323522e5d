// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Building and running coroutines: composition, combinators, failures,
//! scope aggregation and lifecycle listeners.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use skein::prelude::*;
use skein::{EventKind, LifecycleEvent};

fn context() -> CoroutineContext {
    CoroutineContext::with_config(ContextConfig::default().with_workers(4)).unwrap()
}

#[test]
fn steps_compose_left_to_right() {
    let ctx = context();
    let c = Coroutine::first(apply(|x: i32| x + 1))
        .then(apply(|x: i32| x * 3))
        .then(apply(|x: i32| format!("<{x}>")));
    assert_eq!(c.step_count(), 3);

    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(c.run_blocking(scope, 4).result()?, "<15>");
        assert_eq!(c.run_async(scope, 0).result()?, "<3>");
        Ok(())
    })
    .unwrap();
}

#[test]
fn then_leaves_the_original_chain_alone() {
    let ctx = context();
    let base = Coroutine::first(apply(|x: i32| x + 1));
    let longer = base.then(apply(|x: i32| x * 100));
    assert_eq!(base.step_count(), 1);
    assert_eq!(longer.step_count(), 2);

    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(base.run_blocking(scope, 1).result()?, 2);
        assert_eq!(longer.run_blocking(scope, 1).result()?, 200);
        Ok(())
    })
    .unwrap();
}

#[test]
fn both_run_modes_agree() {
    let ctx = context();
    let c = Coroutine::first(loop_while(|n: &u64| *n < 1_000, apply(|n: u64| n * 3 + 1)))
        .then(apply(|n: u64| vec![n, n + 1, n + 2]))
        .then(collect_each(apply(|n: u64| n % 7)))
        .then(apply(|v: Vec<u64>| v.iter().sum::<u64>()));

    CoroutineScope::launch(&ctx, |scope| {
        for input in [0u64, 1, 5, 999, 1_000, 12_345] {
            let a = c.run_async(scope, input).result()?;
            let b = c.run_blocking(scope, input).result()?;
            assert_eq!(a, b, "input {input}");
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn loop_counts_up_to_ten() {
    let ctx = context();
    let c = Coroutine::first(loop_while(|i: &i32| *i < 10, apply(|i: i32| i + 1)));
    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(c.run_blocking(scope, 1).result()?, 10);
        assert_eq!(c.run_async(scope, 1).result()?, 10);
        // Predicate false from the start: the body never runs.
        assert_eq!(c.run_blocking(scope, 42).result()?, 42);
        Ok(())
    })
    .unwrap();
}

#[test]
fn collect_each_keeps_input_order() {
    let ctx = context();
    let upper = apply(|s: String| s.to_uppercase());
    let c: Coroutine<Vec<String>, Vec<String>> = Coroutine::first(collect_each(upper));
    let input: Vec<String> = "a,b,c,d".split(',').map(String::from).collect();

    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(c.run_blocking(scope, input.clone()).result()?, ["A", "B", "C", "D"]);
        assert_eq!(c.run_async(scope, input.clone()).result()?, ["A", "B", "C", "D"]);
        assert!(c.run_blocking(scope, Vec::new()).result()?.is_empty());
        Ok(())
    })
    .unwrap();
}

#[test]
fn for_each_visits_every_element() {
    let ctx = context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let c: Coroutine<Vec<i32>, ()> = Coroutine::first(for_each(consume(move |n: i32| sink.lock().push(n))));

    CoroutineScope::launch(&ctx, |scope| {
        c.run_blocking(scope, vec![3, 1, 2]).result()?;
        Ok(())
    })
    .unwrap();
    assert_eq!(*seen.lock(), vec![3, 1, 2]);
}

#[test]
fn conditions_pick_a_branch() {
    let ctx = context();
    let only_positive: Coroutine<i32, Option<i32>> =
        Coroutine::first(do_if(|x: &i32| *x > 0, apply(|x: i32| x * 10)));
    let sign = Coroutine::first(do_if_else(
        |x: &i32| *x >= 0,
        supply(|| "non-negative"),
        supply(|| "negative"),
    ));
    let or_else = Coroutine::first(do_if(|s: &String| s.is_empty(), supply(|| 0usize)).or_else(apply(|s: String| s.len())));

    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(only_positive.run_blocking(scope, 4).result()?, Some(40));
        assert_eq!(only_positive.run_async(scope, -4).result()?, None);
        assert_eq!(sign.run_blocking(scope, 0).result()?, "non-negative");
        assert_eq!(sign.run_async(scope, -1).result()?, "negative");
        assert_eq!(or_else.run_blocking(scope, String::new()).result()?, 0);
        assert_eq!(or_else.run_blocking(scope, "four".to_string()).result()?, 4);
        Ok(())
    })
    .unwrap();
}

#[test]
fn subroutine_without_output_yields_none() {
    let ctx = context();
    let big_only: Coroutine<i32, Option<i32>> =
        Coroutine::named("big-only", do_if(|x: &i32| *x > 100, apply(|x: i32| x)));
    let parent = Coroutine::first(apply(|x: i32| x + 1))
        .then(call(&big_only))
        .then(apply(|found: Option<i32>| found.unwrap_or(-1)));

    CoroutineScope::launch(&ctx, |scope| {
        assert_eq!(parent.run_blocking(scope, 5).result()?, -1);
        assert_eq!(parent.run_async(scope, 500).result()?, 501);
        Ok(())
    })
    .unwrap();
}

#[test]
fn failing_step_fails_the_run() {
    let ctx = context();
    let c = Coroutine::first(apply(|x: i32| x + 1))
        .then(try_apply(|x: i32| {
            if x > 1 {
                Err(io::Error::new(io::ErrorKind::Other, "too big"))
            } else {
                Ok(x)
            }
        }))
        .then(apply(|_: i32| -> i32 { unreachable!("runs after a failed step") }));

    CoroutineScope::launch(&ctx, |scope| {
        let run = c.run_blocking(scope, 5);
        assert!(run.is_failed());
        assert!(run.is_finished());
        let err = run.result().unwrap_err();
        assert_eq!(err.to_string(), "step failed: too big");
        // The stored error is handed out again.
        assert!(matches!(run.result(), Err(CoroutineError::Step { .. })));
        run.error_handled();
        run.error_handled();
        assert!(run.is_error_handled());
        Ok(())
    })
    .unwrap();
}

#[test]
fn panicking_step_is_a_failure() {
    let ctx = context();
    let c = Coroutine::named("boom", apply(|x: i32| -> i32 { panic!("bad input {x}") }));
    CoroutineScope::launch(&ctx, |scope| {
        for run in [c.run_async(scope, 7), c.run_blocking(scope, 7)] {
            match run.result() {
                Err(CoroutineError::Panicked(msg)) => assert_eq!(msg, "bad input 7"),
                other => panic!("unexpected {other:?}"),
            }
            run.error_handled();
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn launch_reports_every_unhandled_failure() {
    let ctx = context();
    let failing = Coroutine::named(
        "failing",
        try_apply(|x: i32| -> Result<i32, String> { Err(format!("no {x}")) }),
    );
    let fine = Coroutine::first(apply(|x: i32| x));

    let err = CoroutineScope::launch(&ctx, |scope| {
        failing.run_async(scope, 1);
        fine.run_async(scope, 2);
        failing.run_async(scope, 3);
        Err(CoroutineError::Timeout)
    })
    .unwrap_err();

    assert!(matches!(err.body, Some(CoroutineError::Timeout)));
    assert_eq!(err.failures.len(), 2);
    assert_eq!(err.len(), 3);
    assert!(err.failures.iter().all(|f| f.coroutine == "failing"));
    let mut ids: Vec<u64> = err.failures.iter().map(|f| f.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn handled_errors_are_not_reported() {
    let ctx = context();
    let failing = Coroutine::first(try_apply(|_: ()| -> Result<(), &'static str> { Err("nope") }));
    CoroutineScope::launch(&ctx, |scope| {
        let run = failing.run_async(scope, ());
        run.wait();
        run.error_handled();
        Ok(())
    })
    .unwrap();
}

#[test]
fn panicking_scope_body_is_reported() {
    let ctx = context();
    let err = CoroutineScope::launch(&ctx, |_| panic!("body gave up")).unwrap_err();
    assert!(matches!(err.body, Some(CoroutineError::Panicked(ref m)) if m == "body gave up"));
    assert!(err.failures.is_empty());
}

#[test]
fn listeners_fire_coroutine_then_scope_then_context() {
    let ctx = context();
    let log: Arc<Mutex<Vec<(&'static str, EventKind)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    ctx.add_listener(move |e: &LifecycleEvent| sink.lock().push(("context", e.kind)));
    let sink = log.clone();
    let c = Coroutine::named("watched", apply(|x: i32| x))
        .with_listener(move |e: &LifecycleEvent| sink.lock().push(("coroutine", e.kind)));
    let states = Arc::new(Mutex::new(Vec::new()));

    CoroutineScope::launch(&ctx, |scope| {
        let sink = log.clone();
        scope.add_listener(move |e: &LifecycleEvent| sink.lock().push(("scope", e.kind)));
        let sink = states.clone();
        scope.add_listener(move |e: &LifecycleEvent| {
            assert_eq!(&*e.coroutine, "watched");
            sink.lock().push(e.state);
        });
        c.run_blocking(scope, 1).result()?;
        Ok(())
    })
    .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            ("coroutine", EventKind::Started),
            ("scope", EventKind::Started),
            ("context", EventKind::Started),
            ("coroutine", EventKind::Finished),
            ("scope", EventKind::Finished),
            ("context", EventKind::Finished),
        ]
    );
    assert_eq!(*states.lock(), vec![None, Some(ContinuationState::Finished)]);
}

#[test]
fn continuation_metadata() {
    let ctx = context();
    let c = Coroutine::first(apply(|x: i32| x)).with_name("identity");
    assert_eq!(c.name(), "identity");
    CoroutineScope::launch(&ctx, |scope| {
        let first = c.run_blocking(scope, 1);
        let second = c.run_blocking(scope, 2);
        assert_eq!(first.coroutine_name(), "identity");
        assert_ne!(first.id(), second.id());
        assert_eq!(second.state(), ContinuationState::Finished);
        assert_eq!(scope.continuation_count(), 2);

        let finished = Arc::new(Mutex::new(None));
        let sink = finished.clone();
        second.on_finish(move |state| *sink.lock() = Some(state));
        assert_eq!(*finished.lock(), Some(ContinuationState::Finished));
        Ok(())
    })
    .unwrap();
}
