//! Async function wrapping: plain callables that return promises.
//!
//! [`FiberPool::async_fn`] turns a synchronous-style body into an
//! [`AsyncFn`] whose every call yields a promise:
//!
//! - called with no fiber active, the body runs as a fresh pool task,
//!   carrying a shallow clone of the caller's context forward (empty when
//!   there is none);
//! - called inside a fiber with `allow_reuse`, the body runs synchronously
//!   in the *current* fiber (no submission, no context clone) and its
//!   outcome is wrapped into an already-settled promise. The reuse flag is
//!   an explicit caller decision: only the caller knows the body needs no
//!   further suspension isolation;
//! - called inside a fiber without `allow_reuse`, a fresh task is submitted
//!   anyway, cloning the current context forward.

use crate::context::{self, Value};
use crate::fiber;
use crate::pool::{FiberPool, Task};
use crate::promise::{Promise, Settlement};
use crate::tracing_compat::trace;
use std::fmt;
use std::sync::Arc;

/// A reusable body for [`AsyncFn`].
pub type AsyncBody = Arc<dyn Fn(Vec<Value>) -> Settlement + Send + Sync + 'static>;

/// A promise-returning wrapper around a synchronous-style body.
#[derive(Clone)]
pub struct AsyncFn {
    pool: FiberPool,
    body: AsyncBody,
    allow_reuse: bool,
    name: Option<Arc<str>>,
}

impl AsyncFn {
    /// Names the wrapper's tasks for logging.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    /// Invokes the body, returning the promise of its outcome.
    #[must_use]
    pub fn call(&self, arguments: Vec<Value>) -> Promise {
        if self.allow_reuse && fiber::is_active() {
            // Reentrant fast path: the caller vouched that running inline in
            // its own fiber is safe, so skip the submission and the clone.
            trace!("async body reusing the current fiber");
            return match (self.body)(arguments) {
                Ok(value) => Promise::fulfilled(value),
                Err(fault) => Promise::rejected(fault),
            };
        }

        let captured = context::snapshot().unwrap_or_default();
        let body = Arc::clone(&self.body);
        let mut task = Task::new(move |args| body(args))
            .with_arguments(arguments)
            .with_context(captured);
        if let Some(name) = &self.name {
            task = task.named(name.to_string());
        }
        self.pool.run(task)
    }

    /// Returns whether this wrapper may reuse the calling fiber.
    #[must_use]
    pub fn allows_reuse(&self) -> bool {
        self.allow_reuse
    }
}

impl fmt::Debug for AsyncFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFn")
            .field("name", &self.name.as_deref().unwrap_or("<unnamed>"))
            .field("allow_reuse", &self.allow_reuse)
            .finish()
    }
}

impl FiberPool {
    /// Wraps `body` into a promise-returning function bound to this pool.
    ///
    /// `allow_reuse` opts into running the body synchronously when a fiber
    /// is already active; see the module docs for the exact dispatch rules.
    pub fn async_fn<F>(&self, body: F, allow_reuse: bool) -> AsyncFn
    where
        F: Fn(Vec<Value>) -> Settlement + Send + Sync + 'static,
    {
        AsyncFn {
            pool: self.clone(),
            body: Arc::new(body),
            allow_reuse,
            name: None,
        }
    }
}
