//! Adapters between error-first-callback APIs and promise APIs.
//!
//! [`denodeify`] wraps a callback-taking function into a promise-returning
//! one; [`nodeify`] wraps a promise-returning function into a
//! callback-accepting one. Both build on the promise's unwrapped
//! registration path and the deferred-turn primitive, so they inherit the
//! same settlement and ordering guarantees as the rest of the crate:
//! callbacks are delivered on a later turn (never on the caller's stack),
//! exactly once, and no error path is ever dropped on the floor.

use crate::context::Value;
use crate::defer;
use crate::error::Fault;
use crate::promise::Promise;
use crate::tracing_compat::trace;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// An error-first callback: `(Some(fault), _)` reports failure,
/// `(None, value)` reports success.
pub type NodeCallback = Box<dyn FnOnce(Option<Fault>, Value) + Send + 'static>;

/// Wraps a callback-taking function into a promise-returning one.
///
/// Calling the wrapper truncates the arguments to `max_args` (`None` =
/// unlimited), appends an injected error-first callback, and invokes `f`.
/// The returned promise settles from whichever happens first:
///
/// - the injected callback fires: `(Some(fault), _)` rejects, `(None, v)`
///   fulfills;
/// - `f` returns a promise of its own: its eventual settlement resolves the
///   same promise.
///
/// Only the first settlement claim wins; there is no double settlement. A
/// panic inside `f` rejects the promise instead of escaping, and dropping
/// the injected callback without calling it (with no returned promise)
/// rejects with `Unsettled` rather than hanging consumers.
pub fn denodeify<F>(f: F, max_args: Option<usize>) -> impl Fn(Vec<Value>) -> Promise
where
    F: Fn(Vec<Value>, NodeCallback) -> Option<Promise> + Send + Sync + 'static,
{
    move |mut arguments: Vec<Value>| {
        if let Some(limit) = max_args {
            arguments.truncate(limit);
        }
        let (promise, resolver) = Promise::pending();

        let callback_resolver = resolver.clone();
        let injected: NodeCallback = Box::new(move |error, result| match error {
            Some(fault) => {
                trace!(fault = %fault, "injected callback rejecting");
                callback_resolver.reject(fault);
            }
            None => {
                callback_resolver.fulfill(result);
            }
        });

        match catch_unwind(AssertUnwindSafe(|| f(arguments, injected))) {
            Ok(Some(returned)) => {
                // A promise came back as well: first claim wins.
                resolver.fulfill(Value::Promise(returned));
            }
            Ok(None) => {}
            Err(payload) => {
                resolver.reject(Fault::from_panic(payload));
            }
        }
        promise
    }
}

/// Wraps a promise-returning function into a callback-accepting one.
///
/// The JS idiom probes whether the last argument is invocable; here the
/// callback is an explicit `Option`. Calling the wrapper:
///
/// - `f` fails synchronously: with a callback, the fault is delivered to it
///   on a later turn and `None` is returned; without one, a rejected promise
///   is returned. The wrapper never panics into its caller.
/// - `f` returns a promise: with a callback, its settlement is delivered as
///   `(None, value)` or `(Some(fault), _)` on a later turn, exactly once,
///   and `None` is returned; without one, the promise itself is returned:
///   it already carries the outcome for promise-style callers.
pub fn nodeify<F>(f: F) -> impl Fn(Vec<Value>, Option<NodeCallback>) -> Option<Promise>
where
    F: Fn(Vec<Value>) -> Result<Promise, Fault> + Send + Sync + 'static,
{
    move |arguments, callback| {
        let result = match catch_unwind(AssertUnwindSafe(|| f(arguments))) {
            Ok(result) => result,
            Err(payload) => Err(Fault::from_panic(payload)),
        };
        match (result, callback) {
            (Ok(promise), Some(callback)) => {
                deliver(&promise, callback);
                None
            }
            (Ok(promise), None) => Some(promise),
            (Err(fault), Some(callback)) => {
                trace!(fault = %fault, "delivering synchronous failure to callback");
                defer::enqueue(move || callback(Some(fault), Value::Null));
                None
            }
            (Err(fault), None) => Some(Promise::rejected(fault)),
        }
    }
}

/// Feeds a promise's settlement to an error-first callback.
///
/// Delivery happens on a later turn, never on the stack registering it,
/// and exactly once: `(None, value)` on fulfillment, `(Some(fault), _)` on
/// rejection.
pub fn deliver(promise: &Promise, callback: NodeCallback) {
    promise.on_settled(move |settlement| match settlement {
        Ok(value) => callback(None, value),
        Err(fault) => callback(Some(fault), Value::Null),
    });
}
