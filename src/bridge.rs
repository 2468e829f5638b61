//! Continuation rerouting: run promise handlers inside pool fibers.
//!
//! [`Bridged`] decorates a [`Promise`] with a pool. Registering a
//! continuation through it *from inside a running fiber* replaces each
//! handler with a wrapper that:
//!
//! 1. shallow-clones the calling fiber's context immediately, at
//!    registration time;
//! 2. when the underlying promise eventually settles, submits a task (the
//!    original handler, the settled value as its argument, the captured
//!    context) to the pool, and yields the task's promise as the
//!    continuation's result, so the caller's chain composes through it.
//!
//! Registered with no fiber active, it is a plain passthrough.
//!
//! The decoration changes *where* a handler body runs (inside a fiber, with
//! ambient state), never *when relative to other continuations*: settlement
//! order, value and fault identity, and chaining semantics of the underlying
//! promise are untouched. Rerouting is opt-in per call site: promises used
//! without the bridge behave exactly as before.

use crate::context::{self, Value};
use crate::fiber;
use crate::pool::{FiberPool, Task};
use crate::error::Fault;
use crate::promise::{ErrHandler, OkHandler, Promise, Settlement};
use crate::tracing_compat::trace;

/// A promise whose continuations execute inside pool fibers.
///
/// Every chaining call returns another `Bridged`, so a whole chain started
/// from one decoration stays rerouted. Use [`Bridged::into_promise`] (or
/// [`Bridged::promise`]) to step back to the undecorated view.
#[derive(Clone, Debug)]
pub struct Bridged {
    promise: Promise,
    pool: FiberPool,
}

impl Bridged {
    /// Decorates `promise` with `pool`.
    #[must_use]
    pub fn new(promise: Promise, pool: &FiberPool) -> Self {
        Self {
            promise,
            pool: pool.clone(),
        }
    }

    /// Borrows the underlying promise.
    #[must_use]
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Unwraps into the underlying promise.
    #[must_use]
    pub fn into_promise(self) -> Promise {
        self.promise
    }

    /// Chains both settlement paths, rerouting handler bodies through the
    /// pool when a fiber is currently running.
    pub fn then<F, G>(&self, on_ok: F, on_err: G) -> Bridged
    where
        F: FnOnce(Value) -> Settlement + Send + 'static,
        G: FnOnce(Fault) -> Settlement + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_ok)), Some(Box::new(on_err)))
    }

    /// Chains the fulfillment path; rejections pass through untouched.
    pub fn map<F>(&self, on_ok: F) -> Bridged
    where
        F: FnOnce(Value) -> Settlement + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_ok)), None)
    }

    /// Chains the rejection path; fulfillments pass through untouched.
    pub fn rescue<G>(&self, on_err: G) -> Bridged
    where
        G: FnOnce(Fault) -> Settlement + Send + 'static,
    {
        self.then_boxed(None, Some(Box::new(on_err)))
    }

    fn then_boxed(&self, on_ok: Option<OkHandler>, on_err: Option<ErrHandler>) -> Bridged {
        let chained = if fiber::is_active() {
            trace!("rerouting continuation registration through the pool");
            let wrapped_ok = on_ok.map(|handler| self.reroute_ok(handler));
            let wrapped_err = on_err.map(|handler| self.reroute_err(handler));
            self.promise.then_boxed(wrapped_ok, wrapped_err)
        } else {
            self.promise.then_boxed(on_ok, on_err)
        };
        Bridged {
            promise: chained,
            pool: self.pool.clone(),
        }
    }

    /// Wraps a fulfillment handler: context captured now, body runs in a
    /// fiber later, the task's promise becomes the continuation result.
    fn reroute_ok(&self, handler: OkHandler) -> OkHandler {
        let pool = self.pool.clone();
        let captured = context::snapshot().unwrap_or_default();
        Box::new(move |value| {
            let task = Task::new(move |mut args| {
                let settled = if args.is_empty() {
                    Value::Null
                } else {
                    args.swap_remove(0)
                };
                handler(settled)
            })
            .with_arguments(vec![value])
            .with_context(captured);
            Ok(Value::Promise(pool.run(task)))
        })
    }

    /// Wraps a rejection handler; the fault rides the closure, identity
    /// intact, since task arguments carry values.
    fn reroute_err(&self, handler: ErrHandler) -> ErrHandler {
        let pool = self.pool.clone();
        let captured = context::snapshot().unwrap_or_default();
        Box::new(move |fault| {
            let task = Task::new(move |_args| handler(fault)).with_context(captured);
            Ok(Value::Promise(pool.run(task)))
        })
    }
}

impl FiberPool {
    /// Decorates `promise` so continuations registered from inside fibers
    /// execute in this pool. See [`Bridged`].
    #[must_use]
    pub fn bridge(&self, promise: &Promise) -> Bridged {
        Bridged::new(promise.clone(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::await_promise;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn passthrough_outside_fibers() {
        init_test("passthrough_outside_fibers");
        let pool = FiberPool::new();
        let bridged = pool.bridge(&Promise::fulfilled(Value::Int(20)));
        let chained = bridged.map(|v| Ok(Value::Int(v.as_int().unwrap_or(0) + 1)));
        assert_eq!(chained.promise().wait(), Ok(Value::Int(21)));
        // No handler ran inside a fiber, so no fiber was ever spawned.
        assert_eq!(pool.live_fibers(), 0);
        crate::test_complete!("passthrough_outside_fibers");
    }

    #[test]
    fn handler_registered_in_fiber_runs_in_fiber() {
        init_test("handler_registered_in_fiber_runs_in_fiber");
        let pool = FiberPool::new();
        let handler_pool = pool.clone();
        let outcome = pool.run(Task::new(move |_| {
            let source = Promise::fulfilled(Value::Int(1));
            let chained = handler_pool
                .bridge(&source)
                .map(|v| {
                    // The rerouted body observes a fiber identity.
                    let inside = crate::fiber::is_active();
                    Ok(Value::list(vec![v, Value::Bool(inside)]))
                })
                .into_promise();
            await_promise(&chained)
        }));
        assert_eq!(
            outcome.wait(),
            Ok(Value::list(vec![Value::Int(1), Value::Bool(true)]))
        );
        crate::test_complete!("handler_registered_in_fiber_runs_in_fiber");
    }

    #[test]
    fn rejection_identity_survives_rerouting() {
        init_test("rejection_identity_survives_rerouting");
        let pool = FiberPool::new();
        let handler_pool = pool.clone();
        let fault = Fault::msg("routed fault");
        let expected = fault.clone();
        let outcome = pool.run(Task::new(move |_| {
            let source = Promise::rejected(expected.clone());
            let chained = handler_pool
                .bridge(&source)
                .rescue(move |observed| Ok(Value::Bool(observed.ptr_eq(&expected))))
                .into_promise();
            await_promise(&chained)
        }));
        assert_eq!(outcome.wait(), Ok(Value::Bool(true)));
        drop(fault);
        crate::test_complete!("rejection_identity_survives_rerouting");
    }

    #[test]
    fn context_captured_at_registration_time() {
        init_test("context_captured_at_registration_time");
        let pool = FiberPool::new();
        let handler_pool = pool.clone();
        let outcome = pool.run(Task::new(move |_| {
            context::set("stage", Value::text("before")).map_err(Fault::new)?;
            let source = Promise::fulfilled(Value::Null);
            let chained = handler_pool
                .bridge(&source)
                .map(|_| Ok(context::get("stage").unwrap_or(Value::Null)))
                .into_promise();
            // Mutating after registration must not affect the capture.
            context::set("stage", Value::text("after")).map_err(Fault::new)?;
            await_promise(&chained)
        }));
        assert_eq!(outcome.wait(), Ok(Value::text("before")));
        crate::test_complete!("context_captured_at_registration_time");
    }
}
