//! Filament: synchronous-style code on a promise-based execution model.
//!
//! A pool of reusable fibers executes submitted tasks and reports each
//! outcome through a single-settlement [`Promise`]. Inside a fiber, code
//! written in plain sequential style can park on any promise with
//! [`suspend::await_promise`], suspending only that fiber, never the
//! scheduler, and resumes with the settled value (or the fault, identity
//! intact) once the promise settles. Ambient per-fiber state rides along:
//! each handoff carries a shallow clone of the submitting fiber's
//! [`Context`], so state visible before a suspension is still there after
//! the resume, isolated from every other fiber.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  caller ── run(task) ──► FiberPool ──► fiber (worker thread)         │
//! │     ▲                        │            │ callback runs…           │
//! │     │                     Promise         │ await_promise(p) ─┐      │
//! │     └── settles ◄────────────┴────────────┤                   ▼      │
//! │                                           │              parked on   │
//! │   p settles ──► dispatcher turn ── resume ┘              PendingAwait│
//! │                                                                      │
//! │  Bridged::then (inside a fiber): handler ► Task{args,context clone}  │
//! │  denodeify / nodeify: error-first callbacks ◄──► promises            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`pool`]: [`FiberPool`], task submission, fiber reuse, lifecycle
//! - [`suspend`]: the await operator over any [`Promise`]
//! - [`bridge`]: [`Bridged`], continuation handlers rerouted into fibers,
//!   with the registering fiber's context captured at registration time
//! - [`wrap`]: [`AsyncFn`], plain callables that return promises
//! - [`adapt`]: [`denodeify`]/[`nodeify`] error-first-callback adapters
//! - [`context`]: the [`Value`] domain and per-fiber ambient [`Context`]
//! - [`promise`]: the single-settlement primitive itself
//! - [`defer`]: the turn queue backing every "later, never inline" rule
//!
//! # Example
//!
//! ```
//! use filament::suspend::await_promise;
//! use filament::{FiberPool, Promise, Task, Value};
//!
//! let pool = FiberPool::new();
//! let outcome = pool.run(Task::new(|_args| {
//!     filament::context::set("request", Value::from("r-17"))?;
//!     let upstream = Promise::fulfilled(Value::from(21_i64));
//!     let n = await_promise(&upstream)?.as_int().unwrap_or(0);
//!     // Context survived the suspension point.
//!     assert_eq!(filament::context::get("request"), Some(Value::from("r-17")));
//!     Ok(Value::Int(n * 2))
//! }));
//! assert_eq!(outcome.wait(), Ok(Value::Int(42)));
//! ```
//!
//! # Concurrency model
//!
//! One cooperative turn dispatcher drives all promise continuations in
//! registration order; each fiber is backed by a dedicated worker thread, so
//! a parked fiber pins only itself. Contexts are cloned at every handoff,
//! never shared by reference. Cancellation and priorities are out of scope:
//! a parked fiber stays parked until its promise settles (racing against a
//! timer promise is the caller's timeout strategy).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapt;
pub mod bridge;
pub mod context;
pub mod defer;
pub mod error;
pub mod fiber;
pub mod pool;
pub mod promise;
pub mod suspend;
pub mod test_logging;
pub mod tracing_compat;
pub mod wrap;

pub use adapt::{denodeify, nodeify, NodeCallback};
pub use bridge::Bridged;
pub use context::{Context, Value};
pub use error::{Error, ErrorKind, Fault};
pub use fiber::{FiberId, FiberStatus};
pub use pool::{FiberPool, PoolConfig, Task};
pub use promise::{Promise, Resolver, Settlement};
pub use suspend::{await_all, await_promise, await_value};
pub use wrap::AsyncFn;

/// Marks the start of a test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::tracing_compat::info!(test = $name, "=== TEST START ===");
    };
}

/// Marks a test as completed in the log.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::tracing_compat::info!(test = $name, "=== TEST COMPLETE ===");
    };
}

/// Assertion with logging for better test output.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        if !$cond {
            $crate::tracing_compat::error!(
                check = $msg,
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed"
            );
        }
        assert!(
            $cond,
            "{}: expected {:?}, got {:?}",
            $msg, $expected, $actual
        );
    }};
}

#[cfg(test)]
pub(crate) mod test_utils {
    /// Initializes tracing output for in-crate tests; safe to call repeatedly.
    pub fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_test_writer()
            .try_init();
    }
}
