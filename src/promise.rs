//! The single-settlement promise primitive.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      PROMISE SETTLEMENT                           │
//! │                                                                   │
//! │   Resolver                                Promise                 │
//! │     │                                        │                    │
//! │     │─── fulfill(value) ──► settled(Ok) ────►├─ on_settled ──► f  │
//! │     │                                        │   (later turn)     │
//! │     │─── reject(fault) ───► settled(Err) ───►├─ then ──► Promise  │
//! │     │                                        │                    │
//! │     │─── fulfill(promise) ► adopts that      │                    │
//! │     │                       promise's state  │                    │
//! │   (all resolvers dropped, nothing claimed)──► settled(Unsettled)  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Semantics:
//!
//! - A promise settles exactly once, to a [`Value`] or a [`Fault`]. The
//!   first `fulfill`/`reject`/adoption claims the resolution; later calls
//!   return `false` and do nothing.
//! - Fulfilling with a [`Value::Promise`] adopts that promise's eventual
//!   settlement (thenable resolution). A settled promise therefore never
//!   *contains* a pending promise.
//! - Continuations fire in registration order, always on a later scheduler
//!   turn, never on the stack that settled the promise or the stack that
//!   registered them.
//! - If every resolver is dropped without settling, the promise rejects with
//!   [`ErrorKind::Unsettled`] so nothing waits forever on it.
//!
//! [`Promise::on_settled`] is the *unwrapped* registration path used by the
//! await operator and the adapters; [`Promise::then`] builds chains on top
//! of it. Rerouting continuations into pool fibers is a separate, opt-in
//! decorator (see [`crate::bridge`]).

use crate::context::Value;
use crate::defer;
use crate::error::{Error, ErrorKind, Fault};
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// The outcome a promise settles to.
pub type Settlement = Result<Value, Fault>;

/// A boxed fulfillment handler for [`Promise::then`] chains.
pub type OkHandler = Box<dyn FnOnce(Value) -> Settlement + Send + 'static>;

/// A boxed rejection handler for [`Promise::then`] chains.
pub type ErrHandler = Box<dyn FnOnce(Fault) -> Settlement + Send + 'static>;

type Continuation = Box<dyn FnOnce(Settlement) + Send + 'static>;

struct Inner {
    /// `None` while pending.
    state: Option<Settlement>,
    /// Set by the first fulfill/reject/adoption; all later ones are ignored.
    resolution_claimed: bool,
    /// Continuations registered before settlement, in registration order.
    waiters: SmallVec<[Continuation; 2]>,
}

struct Shared {
    inner: Mutex<Inner>,
    settled: Condvar,
}

/// Settles the promise and flushes its waiters, in order, on later turns.
fn settle(shared: &Arc<Shared>, settlement: Settlement) {
    let waiters = {
        let mut inner = shared.inner.lock();
        debug_assert!(inner.state.is_none(), "promise settled twice");
        inner.state = Some(settlement.clone());
        std::mem::take(&mut inner.waiters)
    };
    trace!(ok = settlement.is_ok(), waiters = waiters.len(), "promise settled");
    shared.settled.notify_all();
    for waiter in waiters {
        let outcome = settlement.clone();
        defer::enqueue(move || waiter(outcome));
    }
}

/// Claims the resolution slot; returns `false` if already claimed.
fn claim(shared: &Arc<Shared>) -> bool {
    let mut inner = shared.inner.lock();
    if inner.resolution_claimed {
        false
    } else {
        inner.resolution_claimed = true;
        true
    }
}

/// A single-settlement future value.
///
/// Cheaply cloneable; all clones observe the same settlement.
#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

/// The producing half of a promise.
///
/// Cheaply cloneable; the first clone to fulfill or reject wins. When the
/// last resolver is dropped without any claim, the promise rejects with
/// [`ErrorKind::Unsettled`].
#[derive(Clone)]
pub struct Resolver {
    shared: Arc<Shared>,
    _guard: Arc<ResolverGuard>,
}

struct ResolverGuard {
    shared: Arc<Shared>,
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        if claim(&self.shared) {
            settle(
                &self.shared,
                Err(Fault::from(Error::new(ErrorKind::Unsettled))),
            );
        }
    }
}

impl Promise {
    /// Creates a pending promise and its resolver.
    #[must_use]
    pub fn pending() -> (Promise, Resolver) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: None,
                resolution_claimed: false,
                waiters: SmallVec::new(),
            }),
            settled: Condvar::new(),
        });
        let resolver = Resolver {
            shared: Arc::clone(&shared),
            _guard: Arc::new(ResolverGuard {
                shared: Arc::clone(&shared),
            }),
        };
        (Promise { shared }, resolver)
    }

    /// Creates a promise already fulfilled with `value`.
    ///
    /// A [`Value::Promise`] is adopted, so the result settles with the inner
    /// promise's eventual outcome.
    #[must_use]
    pub fn fulfilled(value: Value) -> Promise {
        let (promise, resolver) = Promise::pending();
        resolver.fulfill(value);
        promise
    }

    /// Creates a promise already rejected with `fault`.
    #[must_use]
    pub fn rejected(fault: Fault) -> Promise {
        let (promise, resolver) = Promise::pending();
        resolver.reject(fault);
        promise
    }

    /// Normalizes a value to a promise.
    ///
    /// A [`Value::Promise`] is returned as-is (same settlement, same
    /// identity); anything else becomes an already-fulfilled promise.
    #[must_use]
    pub fn resolve_value(value: Value) -> Promise {
        match value {
            Value::Promise(p) => p,
            other => Promise::fulfilled(other),
        }
    }

    /// Registers a continuation on the unwrapped path.
    ///
    /// The continuation runs on a later turn with a clone of the settlement
    /// (value/fault identity preserved), in registration order relative to
    /// other continuations on this promise. If the promise is already
    /// settled, the continuation still runs on a later turn, never inline.
    pub fn on_settled(&self, f: impl FnOnce(Settlement) + Send + 'static) {
        let mut inner = self.shared.inner.lock();
        match &inner.state {
            Some(settlement) => {
                let outcome = settlement.clone();
                drop(inner);
                defer::enqueue(move || f(outcome));
            }
            None => inner.waiters.push(Box::new(f)),
        }
    }

    /// Chains both settlement paths.
    ///
    /// The returned promise settles with the invoked handler's outcome;
    /// returning `Ok(Value::Promise(p))` chains through `p`. A panicking
    /// handler rejects the chained promise with the panic converted to a
    /// [`Fault`].
    pub fn then<F, G>(&self, on_ok: F, on_err: G) -> Promise
    where
        F: FnOnce(Value) -> Settlement + Send + 'static,
        G: FnOnce(Fault) -> Settlement + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_ok)), Some(Box::new(on_err)))
    }

    /// Chains the fulfillment path; rejections pass through untouched.
    pub fn map<F>(&self, on_ok: F) -> Promise
    where
        F: FnOnce(Value) -> Settlement + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_ok)), None)
    }

    /// Chains the rejection path; fulfillments pass through untouched.
    ///
    /// The handler may recover by returning `Ok`.
    pub fn rescue<G>(&self, on_err: G) -> Promise
    where
        G: FnOnce(Fault) -> Settlement + Send + 'static,
    {
        self.then_boxed(None, Some(Box::new(on_err)))
    }

    /// Boxed-handler form of [`Promise::then`]; absent handlers pass the
    /// settlement through unchanged.
    pub(crate) fn then_boxed(
        &self,
        on_ok: Option<OkHandler>,
        on_err: Option<ErrHandler>,
    ) -> Promise {
        let (next, resolver) = Promise::pending();
        self.on_settled(move |settlement| {
            let outcome = match settlement {
                Ok(value) => match on_ok {
                    Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(value)))
                        .unwrap_or_else(|payload| Err(Fault::from_panic(payload))),
                    None => Ok(value),
                },
                Err(fault) => match on_err {
                    Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(fault)))
                        .unwrap_or_else(|payload| Err(Fault::from_panic(payload))),
                    None => Err(fault),
                },
            };
            match outcome {
                Ok(value) => {
                    resolver.fulfill(value);
                }
                Err(fault) => {
                    resolver.reject(fault);
                }
            }
        });
        next
    }

    /// Blocks the calling *thread* until the promise settles.
    ///
    /// This is the boundary operation for non-fiber code (tests, the
    /// program's outermost layer). Inside a fiber, use
    /// [`crate::suspend::await_promise`] instead; `wait` would pin the
    /// fiber's worker without marking it suspended. Never call it from a
    /// continuation: blocking the turn dispatcher on a settlement that
    /// itself needs a turn cannot make progress.
    #[must_use]
    pub fn wait(&self) -> Settlement {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(settlement) = &inner.state {
                return settlement.clone();
            }
            self.shared.settled.wait(&mut inner);
        }
    }

    /// Returns the settlement if the promise has settled.
    #[must_use]
    pub fn try_settlement(&self) -> Option<Settlement> {
        self.shared.inner.lock().state.clone()
    }

    /// Returns `true` once the promise has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.inner.lock().state.is_some()
    }

    /// Returns `true` if both handles refer to the same promise.
    #[must_use]
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        let state = match &inner.state {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Promise")
            .field("state", &state)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl Resolver {
    /// Fulfills the promise with `value`.
    ///
    /// A [`Value::Promise`] is adopted: this call claims the resolution
    /// immediately and the promise settles with the inner promise's eventual
    /// outcome. Fulfilling a promise with itself rejects it instead (a
    /// resolution cycle can never settle).
    ///
    /// Returns `false` if the resolution was already claimed.
    pub fn fulfill(&self, value: Value) -> bool {
        if !claim(&self.shared) {
            return false;
        }
        match value {
            Value::Promise(adopted) => {
                if Arc::ptr_eq(&adopted.shared, &self.shared) {
                    settle(&self.shared, Err(Fault::msg("promise resolution cycle")));
                } else {
                    let target = Arc::clone(&self.shared);
                    adopted.on_settled(move |settlement| settle(&target, settlement));
                }
            }
            other => settle(&self.shared, Ok(other)),
        }
        true
    }

    /// Rejects the promise with `fault`.
    ///
    /// Returns `false` if the resolution was already claimed.
    pub fn reject(&self, fault: Fault) -> bool {
        if !claim(&self.shared) {
            return false;
        }
        settle(&self.shared, Err(fault));
        true
    }

    /// Settles from a ready `Result`.
    pub fn settle_with(&self, settlement: Settlement) -> bool {
        match settlement {
            Ok(value) => self.fulfill(value),
            Err(fault) => self.reject(fault),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

/// Gathers several promises into one.
///
/// Fulfills with the list of values in input order once every input
/// fulfills; rejects with the first rejection otherwise. An empty slice
/// fulfills with an empty list.
#[must_use]
pub fn all(promises: &[Promise]) -> Promise {
    let (next, resolver) = Promise::pending();
    let count = promises.len();
    if count == 0 {
        resolver.fulfill(Value::list(Vec::new()));
        return next;
    }

    struct Gather {
        slots: Vec<Option<Value>>,
        remaining: usize,
    }
    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; count],
        remaining: count,
    }));

    for (index, promise) in promises.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let resolver = resolver.clone();
        promise.on_settled(move |settlement| match settlement {
            Ok(value) => {
                let mut g = gather.lock();
                g.slots[index] = Some(value);
                g.remaining -= 1;
                if g.remaining == 0 {
                    let items: Vec<Value> = g
                        .slots
                        .iter_mut()
                        .map(|slot| slot.take().unwrap_or(Value::Null))
                        .collect();
                    drop(g);
                    resolver.fulfill(Value::list(items));
                }
            }
            Err(fault) => {
                resolver.reject(fault);
            }
        });
    }
    next
}
