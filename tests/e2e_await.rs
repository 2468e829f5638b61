//! Await E2E test suite entry point.
//!
//! Exercises the suspend/resume protocol end to end: settled and pending
//! promises, fault identity, context survival across suspension points, and
//! the usage error outside fibers.
//!
//! Run with: `cargo test --test e2e_await`

mod common {
    pub fn init_test_logging() {
        // Initialize tracing for tests if not already done
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }
}

use filament::{assert_with_log, test_complete, test_phase};
use filament::{await_all, await_promise, ErrorKind, Fault, FiberPool, Promise, Task, Value};

fn init_test(name: &str) {
    common::init_test_logging();
    test_phase!(name);
}

#[test]
fn await_with_no_fiber_is_an_immediate_usage_error() {
    init_test("await_with_no_fiber_is_an_immediate_usage_error");
    let promise = Promise::fulfilled(Value::Int(1));
    let err = await_promise(&promise).unwrap_err();
    assert_with_log!(
        err.is_kind(ErrorKind::NoActiveFiber),
        "usage error outside fibers",
        "NoActiveFiber",
        format!("{err:?}")
    );
    // The promise is untouched by the failed attempt.
    assert_eq!(promise.wait(), Ok(Value::Int(1)));
    test_complete!("await_with_no_fiber_is_an_immediate_usage_error");
}

#[test]
fn await_settled_promise_returns_value_directly() {
    init_test("await_settled_promise_returns_value_directly");
    let pool = FiberPool::new();
    let outcome = pool.run(Task::new(|_| {
        let ready = Promise::fulfilled(Value::text("instant"));
        await_promise(&ready)
    }));
    assert_eq!(outcome.wait(), Ok(Value::text("instant")));
    test_complete!("await_settled_promise_returns_value_directly");
}

#[test]
fn await_rejected_promise_preserves_fault_identity() {
    init_test("await_rejected_promise_preserves_fault_identity");
    let pool = FiberPool::new();
    let fault = Fault::msg("identity check");
    let inner = fault.clone();
    let outcome = pool.run(Task::new(move |_| {
        let broken = Promise::rejected(inner.clone());
        match await_promise(&broken) {
            Err(observed) => Ok(Value::Bool(observed.ptr_eq(&inner))),
            Ok(v) => Err(Fault::msg(format!("unexpected value {v:?}"))),
        }
    }));
    assert_with_log!(
        outcome.wait() == Ok(Value::Bool(true)),
        "fault identity across await",
        "Ok(true)",
        format!("{outcome:?}")
    );
    drop(fault);
    test_complete!("await_rejected_promise_preserves_fault_identity");
}

#[test]
fn context_round_trip_across_suspension() {
    init_test("context_round_trip_across_suspension");
    let pool = FiberPool::new();

    let (gate, release) = Promise::pending();
    let suspended_gate = gate.clone();
    let suspended = pool.run(Task::new(move |_| {
        filament::context::set("k", Value::Int(1))?;
        await_promise(&suspended_gate)?;
        Ok(filament::context::get("k").unwrap_or(Value::Null))
    }));

    // While the first fiber is parked, a second fiber sets k=2 in its own
    // context; that must not leak into the suspended fiber's view.
    let interloper = pool.run(Task::new(|_| {
        filament::context::set("k", Value::Int(2))?;
        Ok(filament::context::get("k").unwrap_or(Value::Null))
    }));
    assert_eq!(interloper.wait(), Ok(Value::Int(2)));

    release.fulfill(Value::Null);
    assert_with_log!(
        suspended.wait() == Ok(Value::Int(1)),
        "k survives suspension unchanged",
        "Ok(1)",
        format!("{suspended:?}")
    );
    test_complete!("context_round_trip_across_suspension");
}

#[test]
fn sequential_awaits_in_one_task() {
    init_test("sequential_awaits_in_one_task");
    let pool = FiberPool::new();
    let (first, r1) = Promise::pending();
    let (second, r2) = Promise::pending();

    let outcome = pool.run(Task::new(move |_| {
        let a = await_promise(&first)?.as_int().unwrap_or(0);
        let b = await_promise(&second)?.as_int().unwrap_or(0);
        Ok(Value::Int(a + b))
    }));

    r1.fulfill(Value::Int(30));
    r2.fulfill(Value::Int(12));
    assert_eq!(outcome.wait(), Ok(Value::Int(42)));
    test_complete!("sequential_awaits_in_one_task");
}

#[test]
fn awaiting_another_tasks_promise_chains_fibers() {
    init_test("awaiting_another_tasks_promise_chains_fibers");
    let pool = FiberPool::new();
    let upstream_pool = pool.clone();

    let outcome = pool.run(Task::new(move |_| {
        let upstream = upstream_pool.run(Task::new(|_| Ok(Value::Int(7))));
        let n = await_promise(&upstream)?.as_int().unwrap_or(0);
        Ok(Value::Int(n * 6))
    }));
    assert_eq!(outcome.wait(), Ok(Value::Int(42)));
    test_complete!("awaiting_another_tasks_promise_chains_fibers");
}

#[test]
fn await_all_returns_values_in_input_order() {
    init_test("await_all_returns_values_in_input_order");
    let pool = FiberPool::new();
    let (a, ra) = Promise::pending();
    let (b, rb) = Promise::pending();
    let (c, rc) = Promise::pending();

    let outcome = pool.run(Task::new(move |_| await_all(&[a, b, c])));

    // Settle in reverse; gathered order follows the input order.
    rc.fulfill(Value::Int(3));
    rb.fulfill(Value::Int(2));
    ra.fulfill(Value::Int(1));
    assert_eq!(
        outcome.wait(),
        Ok(Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3)
        ]))
    );
    test_complete!("await_all_returns_values_in_input_order");
}

#[test]
fn await_all_raises_first_rejection() {
    init_test("await_all_raises_first_rejection");
    let pool = FiberPool::new();
    let (a, ra) = Promise::pending();
    let (b, rb) = Promise::pending();
    let fault = Fault::msg("gathered failure");
    let expected = fault.clone();

    let outcome = pool.run(Task::new(move |_| {
        match await_all(&[a, b]) {
            Err(observed) => Ok(Value::Bool(observed.ptr_eq(&expected))),
            Ok(v) => Err(Fault::msg(format!("unexpected value {v:?}"))),
        }
    }));

    rb.reject(fault.clone());
    ra.fulfill(Value::Int(1));
    assert_eq!(outcome.wait(), Ok(Value::Bool(true)));
    test_complete!("await_all_raises_first_rejection");
}

#[test]
fn fault_raised_at_await_site_propagates_to_task_promise() {
    init_test("fault_raised_at_await_site_propagates_to_task_promise");
    let pool = FiberPool::new();
    let fault = Fault::msg("bubbles up");
    let inner = fault.clone();
    let outcome = pool.run(Task::new(move |_| {
        let broken = Promise::rejected(inner.clone());
        // `?` re-raises the awaited fault out of the task body.
        let value = await_promise(&broken)?;
        Ok(value)
    }));
    match outcome.wait() {
        Err(observed) => assert!(observed.ptr_eq(&fault)),
        Ok(_) => panic!("expected rejection"),
    }
    test_complete!("fault_raised_at_await_site_propagates_to_task_promise");
}

#[test]
fn parked_fiber_reports_suspended_status() {
    init_test("parked_fiber_reports_suspended_status");
    let pool = FiberPool::new();
    let (gate, release) = Promise::pending();
    let (id_tx, id_rx) = crossbeam_channel::bounded::<filament::FiberId>(1);

    let outcome = pool.run(Task::new(move |_| {
        if let Some(id) = filament::fiber::current_id() {
            let _ = id_tx.send(id);
        }
        await_promise(&gate)?;
        Ok(Value::Null)
    }));

    let id = id_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("fiber reports its identity");
    // The park happens just after the send; poll briefly for the edge.
    let mut status = pool.fiber_status(id);
    for _ in 0..200 {
        if status == Some(filament::FiberStatus::Suspended) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
        status = pool.fiber_status(id);
    }
    assert_with_log!(
        status == Some(filament::FiberStatus::Suspended),
        "fiber parked on await",
        "Suspended",
        format!("{status:?}")
    );

    release.fulfill(Value::Null);
    outcome.wait().expect("task fulfills");
    assert_with_log!(
        pool.fiber_status(id) == Some(filament::FiberStatus::Idle),
        "fiber idle after completion",
        "Idle",
        format!("{:?}", pool.fiber_status(id))
    );
    test_complete!("parked_fiber_reports_suspended_status");
}

#[test]
fn dropped_promise_resumes_with_unsettled_error() {
    init_test("dropped_promise_resumes_with_unsettled_error");
    let pool = FiberPool::new();
    let (pending, resolver) = Promise::pending();
    let outcome = pool.run(Task::new(move |_| await_promise(&pending)));
    drop(resolver);
    match outcome.wait() {
        Err(fault) => assert_with_log!(
            fault.is_kind(ErrorKind::Unsettled),
            "unsettled fault kind",
            "Unsettled",
            format!("{fault:?}")
        ),
        Ok(_) => panic!("expected rejection"),
    }
    test_complete!("dropped_promise_resumes_with_unsettled_error");
}
