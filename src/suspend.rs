//! The await operator: park the current fiber until a promise settles.
//!
//! `await_promise` registers on the promise's *unwrapped* path (continuation
//! rerouting never applies to these internal handlers) and parks the calling
//! fiber on a single-use resume channel. When the promise settles, the
//! resume signal is delivered from a dispatcher turn, never from inside the
//! settling stack, and the fiber wakes with the value, or with the fault
//! raised at the await site with its identity intact.
//!
//! While parked, the fiber consumes no scheduler turns and holds no lock;
//! only its own worker thread is pinned. A resume that can no longer be
//! delivered is re-raised through the unhandled-fault channel on a later
//! turn rather than disappearing into the settlement machinery.

use crate::context::Value;
use crate::defer;
use crate::error::{Error, ErrorKind, Fault};
use crate::fiber::{self, FiberStatus};
use crate::promise::{self, Promise, Settlement};
use crate::tracing_compat::trace;
use crossbeam_channel::bounded;
use std::sync::Arc;

/// Suspends the current fiber until `promise` settles.
///
/// Returns the fulfillment value, or the rejection fault with identity
/// preserved (the same underlying error object that rejected the promise).
/// An already-settled promise resumes within one scheduler turn.
///
/// # Errors
///
/// - [`ErrorKind::NoActiveFiber`] when called outside a running fiber,
///   immediately, without registering anything.
/// - [`ErrorKind::Unsettled`] when the awaited promise is dropped without
///   ever settling (the fiber resumes instead of parking forever).
/// - The promise's own fault when it rejects.
pub fn await_promise(promise: &Promise) -> Result<Value, Fault> {
    let Some(active) = fiber::active_handle() else {
        return Err(Fault::from(Error::with_detail(
            ErrorKind::NoActiveFiber,
            "await_promise requires a running fiber",
        )));
    };
    let state = Arc::clone(active.state());
    drop(active);
    let fiber_id = state.id();

    // The pending await: created per call, resolved exactly once, then gone.
    let (resume_tx, resume_rx) = bounded::<Settlement>(1);
    let parked = Arc::clone(&state);
    promise.on_settled(move |settlement| {
        // Runs on a dispatcher turn, outside the settling stack. A failed
        // resume must not be absorbed here: re-raise it on a later turn.
        if resume_tx.send(settlement).is_err() {
            defer::raise_unhandled(Fault::from(Error::with_detail(
                ErrorKind::ResumeLost,
                format!("{} vanished before its awaited promise settled", parked.id()),
            )));
        }
    });

    state.set_status(FiberStatus::Suspended);
    trace!(fiber = %fiber_id, "fiber suspended on await");
    let resumed = resume_rx.recv();
    state.set_status(FiberStatus::Running);

    match resumed {
        Ok(Ok(value)) => {
            trace!(fiber = %fiber_id, "fiber resumed with value");
            Ok(value)
        }
        Ok(Err(fault)) => {
            trace!(fiber = %fiber_id, fault = %fault, "fiber resumed with fault");
            Err(fault)
        }
        Err(_disconnected) => Err(Fault::from(Error::with_detail(
            ErrorKind::Unsettled,
            "awaited promise dropped before settling",
        ))),
    }
}

/// Normalizes `value` to a promise and awaits it.
///
/// A [`Value::Promise`] suspends until that promise settles; any other
/// value comes straight back after one scheduler turn.
pub fn await_value(value: Value) -> Result<Value, Fault> {
    await_promise(&Promise::resolve_value(value))
}

/// Awaits every promise, returning their values in input order.
///
/// Equivalent to `await_promise` on [`promise::all`]: the first rejection
/// wins, otherwise the result is the `Value::List` of all fulfillments.
pub fn await_all(promises: &[Promise]) -> Result<Value, Fault> {
    await_promise(&promise::all(promises))
}
