//! The fiber pool: reusable workers executing tasks against promises.
//!
//! External code submits a [`Task`] with [`FiberPool::run`] and immediately
//! receives the [`Promise`] that will settle with the task's outcome. The
//! pool assigns the task to an idle fiber, or lazily spawns a new one; when
//! the task finishes (normally, with a fault, or by panicking) the fiber
//! re-enters the idle set for reuse, and the promise settles. Errors are
//! caught at the fiber boundary: they reject the task's promise and never
//! escape into the pool's own call stack.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `target_idle_fibers` | 16 |
//! | `thread_name_prefix` | `"filament-fiber"` |
//! | `thread_stack_size` | platform default |
//!
//! # Growth and reuse policy
//!
//! Concurrently-live fibers are unbounded: a submission finding no idle
//! fiber always gets a fresh one, so a task is never queued behind another.
//! Idle retention is bounded by `target_idle_fibers`; a fiber finishing a
//! task terminates instead of re-entering a full idle set. Reuse order is
//! LIFO (the most recently freed fiber is assigned first), which keeps
//! serial submissions on one warm fiber and makes reuse deterministic.
//!
//! The idle set sits behind a mutex: `run` may be called concurrently from
//! any mix of fibers and plain threads.

use crate::context::{Context, Value};
use crate::error::{Error, ErrorKind, Fault};
use crate::fiber::{self, FiberId, FiberState, FiberStatus};
use crate::promise::{Promise, Resolver, Settlement};
use crate::tracing_compat::{debug, trace};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// The callable a task executes inside its fiber.
pub type TaskBody = Box<dyn FnOnce(Vec<Value>) -> Settlement + Send + 'static>;

/// A unit of work for the pool.
///
/// Immutable once submitted; produces exactly one promise. The callback
/// captures its own receiver state; `arguments` travel separately so
/// callers rerouting settled values (see [`crate::bridge`]) can pass them
/// positionally.
pub struct Task {
    callback: TaskBody,
    arguments: Vec<Value>,
    context: Context,
    name: Option<Arc<str>>,
}

impl Task {
    /// Creates a task around a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Settlement + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            arguments: Vec::new(),
            context: Context::new(),
            name: None,
        }
    }

    /// Sets the positional arguments passed to the callback.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Sets the context installed into the executing fiber.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Names the task for logging.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name.as_deref().unwrap_or("<unnamed>"))
            .field("arguments", &self.arguments.len())
            .field("context_entries", &self.context.len())
            .finish()
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle fibers retained for reuse; fibers beyond this terminate after
    /// their task. `0` disables retention entirely.
    pub target_idle_fibers: usize,
    /// Name prefix for fiber worker threads.
    pub thread_name_prefix: String,
    /// Stack size per fiber thread (`None` = platform default).
    pub thread_stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_idle_fibers: 16,
            thread_name_prefix: "filament-fiber".to_owned(),
            thread_stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Normalizes configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "filament-fiber".to_owned();
        }
    }
}

/// An idle worker parked on its inbox, ready for reassignment.
struct IdleFiber {
    state: Arc<FiberState>,
    inbox: Sender<Assignment>,
}

/// A task in flight to a worker, with the resolver for its promise and the
/// worker's own inbox sender (returned to the idle set on completion).
struct Assignment {
    task: Task,
    resolver: Resolver,
    inbox: Sender<Assignment>,
}

struct PoolShared {
    config: PoolConfig,
    idle: Mutex<Vec<IdleFiber>>,
    /// Every live fiber's state cell, keyed by raw identity.
    fibers: Mutex<BTreeMap<u64, Arc<FiberState>>>,
    next_fiber_id: AtomicU64,
    live: AtomicUsize,
    closed: AtomicBool,
}

impl PoolShared {
    /// Re-admits a fiber to the idle set; `false` tells the worker to exit.
    fn retain(&self, fiber: IdleFiber) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.target_idle_fibers {
            false
        } else {
            idle.push(fiber);
            true
        }
    }
}

/// A pool of reusable fibers.
///
/// Cheaply cloneable handle; all clones share the same pool. Dropping the
/// last handle releases every idle fiber; fibers still running finish their
/// task first.
#[derive(Clone)]
pub struct FiberPool {
    shared: Arc<PoolShared>,
}

impl Default for FiberPool {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberPool {
    /// Creates a pool with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with the given configuration.
    #[must_use]
    pub fn with_config(mut config: PoolConfig) -> Self {
        config.normalize();
        Self {
            shared: Arc::new(PoolShared {
                config,
                idle: Mutex::new(Vec::new()),
                fibers: Mutex::new(BTreeMap::new()),
                next_fiber_id: AtomicU64::new(0),
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Submits a task, returning the promise of its outcome immediately.
    ///
    /// Acquires the most recently freed idle fiber, or spawns a new one.
    /// The task's context is installed into the fiber before the callback
    /// runs. A callback fault or panic rejects the promise; nothing escapes
    /// to this call's stack. Safe to call concurrently from fibers and
    /// plain threads alike.
    pub fn run(&self, task: Task) -> Promise {
        let (promise, resolver) = Promise::pending();
        if self.shared.closed.load(Ordering::SeqCst) {
            resolver.reject(Fault::from(Error::new(ErrorKind::PoolClosed)));
            return promise;
        }

        let reused = self.shared.idle.lock().pop();
        match reused {
            Some(idle) => {
                trace!(fiber = %idle.state.id(), "reusing idle fiber");
                let assignment = Assignment {
                    task,
                    resolver,
                    inbox: idle.inbox.clone(),
                };
                if let Err(undelivered) = idle.inbox.send(assignment) {
                    // The worker died under us; fall back to a fresh fiber.
                    let assignment = undelivered.into_inner();
                    self.spawn_fiber(assignment.task, assignment.resolver);
                }
            }
            None => self.spawn_fiber(task, resolver),
        }
        promise
    }

    /// Spawns a fresh worker and hands it its first task.
    fn spawn_fiber(&self, task: Task, resolver: Resolver) {
        let id = FiberId::new(self.shared.next_fiber_id.fetch_add(1, Ordering::SeqCst));
        let state = FiberState::new(id);
        let (inbox_tx, inbox_rx) = unbounded::<Assignment>();

        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.shared
            .fibers
            .lock()
            .insert(id.as_u64(), Arc::clone(&state));
        let pool = Arc::downgrade(&self.shared);
        let worker_state = Arc::clone(&state);
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.shared.config.thread_name_prefix, id.as_u64()));
        if let Some(stack_size) = self.shared.config.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        match builder.spawn(move || worker_loop(worker_state, inbox_rx, pool)) {
            Ok(_join) => {
                debug!(fiber = %id, live = self.shared.live.load(Ordering::SeqCst), "spawned fiber");
                let assignment = Assignment {
                    task,
                    resolver,
                    inbox: inbox_tx.clone(),
                };
                // The worker holds the receiver; this send cannot fail here.
                let _ = inbox_tx.send(assignment);
            }
            Err(spawn_error) => {
                self.shared.live.fetch_sub(1, Ordering::SeqCst);
                self.shared.fibers.lock().remove(&id.as_u64());
                resolver.reject(Fault::msg(format!(
                    "failed to spawn fiber thread: {spawn_error}"
                )));
            }
        }
    }

    /// Closes the pool: idle fibers terminate, later submissions reject
    /// with [`ErrorKind::PoolClosed`]. Tasks already running finish.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.shared.idle.lock());
        debug!(released = drained.len(), "pool shut down");
        drop(drained);
    }

    /// Number of fibers currently alive (idle, running, or suspended).
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Number of fibers parked in the idle set.
    #[must_use]
    pub fn idle_fibers(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Current status of a fiber, or `None` once it has left the pool.
    #[must_use]
    pub fn fiber_status(&self, id: FiberId) -> Option<FiberStatus> {
        self.shared
            .fibers
            .lock()
            .get(&id.as_u64())
            .map(|state| state.status())
    }
}

impl fmt::Debug for FiberPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberPool")
            .field("live", &self.live_fibers())
            .field("idle", &self.idle_fibers())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Per-worker loop: one task at a time, reuse until retention declines.
fn worker_loop(state: Arc<FiberState>, inbox: Receiver<Assignment>, pool: Weak<PoolShared>) {
    while let Ok(assignment) = inbox.recv() {
        let Assignment {
            task,
            resolver,
            inbox: own_inbox,
        } = assignment;
        let Task {
            callback,
            arguments,
            context,
            name,
        } = task;

        state.set_status(FiberStatus::Running);
        trace!(
            fiber = %state.id(),
            task = name.as_deref().unwrap_or("<unnamed>"),
            "task starting"
        );

        let guard = fiber::enter(Arc::clone(&state), context);
        let outcome = catch_unwind(AssertUnwindSafe(move || callback(arguments)));
        drop(guard);

        let settlement = match outcome {
            Ok(settlement) => settlement,
            Err(payload) => Err(Fault::from_panic(payload)),
        };

        state.set_status(FiberStatus::Idle);
        // Re-enter the idle set before settling, so a caller observing the
        // settlement can immediately reuse this fiber.
        let retained = pool.upgrade().is_some_and(|shared| {
            shared.retain(IdleFiber {
                state: Arc::clone(&state),
                inbox: own_inbox,
            })
        });

        debug!(fiber = %state.id(), ok = settlement.is_ok(), retained, "task completed");
        resolver.settle_with(settlement);

        if !retained {
            break;
        }
    }
    state.set_status(FiberStatus::Terminated);
    trace!(fiber = %state.id(), "fiber terminated");
    if let Some(shared) = pool.upgrade() {
        shared.live.fetch_sub(1, Ordering::SeqCst);
        shared.fibers.lock().remove(&state.id().as_u64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn run_settles_with_callback_value() {
        init_test("run_settles_with_callback_value");
        let pool = FiberPool::new();
        let promise = pool.run(Task::new(|_| Ok(Value::Int(5))).named("five"));
        crate::assert_with_log!(
            promise.wait() == Ok(Value::Int(5)),
            "task value",
            "Ok(5)",
            format!("{:?}", promise.try_settlement())
        );
        crate::test_complete!("run_settles_with_callback_value");
    }

    #[test]
    fn run_rejects_with_callback_fault() {
        init_test("run_rejects_with_callback_fault");
        let pool = FiberPool::new();
        let fault = Fault::msg("task failed");
        let thrown = fault.clone();
        let promise = pool.run(Task::new(move |_| Err(thrown)));
        match promise.wait() {
            Err(observed) => assert!(observed.ptr_eq(&fault)),
            Ok(_) => panic!("expected rejection"),
        }
        crate::test_complete!("run_rejects_with_callback_fault");
    }

    #[test]
    fn panicking_task_rejects_instead_of_escaping() {
        init_test("panicking_task_rejects_instead_of_escaping");
        let pool = FiberPool::new();
        let promise = pool.run(Task::new(|_| panic!("kaboom")));
        match promise.wait() {
            Err(fault) => {
                assert!(fault.is_kind(ErrorKind::FiberPanicked));
                assert!(fault.to_string().contains("kaboom"));
            }
            Ok(_) => panic!("expected rejection"),
        }
        // The fiber survives for reuse: the panic was contained.
        let promise = pool.run(Task::new(|_| Ok(Value::Int(1))));
        assert_eq!(promise.wait(), Ok(Value::Int(1)));
        crate::test_complete!("panicking_task_rejects_instead_of_escaping");
    }

    #[test]
    fn serial_tasks_reuse_one_fiber() {
        init_test("serial_tasks_reuse_one_fiber");
        let pool = FiberPool::new();
        let first = pool
            .run(Task::new(|_| {
                Ok(Value::Int(fiber::current_id().map_or(-1, |id| id.as_u64() as i64)))
            }))
            .wait();
        let second = pool
            .run(Task::new(|_| {
                Ok(Value::Int(fiber::current_id().map_or(-1, |id| id.as_u64() as i64)))
            }))
            .wait();
        crate::assert_with_log!(
            first == second,
            "serial submissions reuse the same fiber",
            &first,
            &second
        );
        assert_eq!(pool.live_fibers(), 1);
        crate::test_complete!("serial_tasks_reuse_one_fiber");
    }

    #[test]
    fn arguments_reach_the_callback() {
        init_test("arguments_reach_the_callback");
        let pool = FiberPool::new();
        let promise = pool.run(
            Task::new(|args| {
                let sum = args.iter().filter_map(Value::as_int).sum::<i64>();
                Ok(Value::Int(sum))
            })
            .with_arguments(vec![Value::Int(2), Value::Int(40)]),
        );
        assert_eq!(promise.wait(), Ok(Value::Int(42)));
        crate::test_complete!("arguments_reach_the_callback");
    }

    #[test]
    fn task_context_is_installed() {
        init_test("task_context_is_installed");
        let pool = FiberPool::new();
        let mut context = Context::new();
        context.set("tenant", Value::text("acme"));
        let promise = pool.run(
            Task::new(|_| Ok(crate::context::get("tenant").unwrap_or(Value::Null)))
                .with_context(context),
        );
        assert_eq!(promise.wait(), Ok(Value::text("acme")));
        crate::test_complete!("task_context_is_installed");
    }

    #[test]
    fn shutdown_rejects_new_tasks() {
        init_test("shutdown_rejects_new_tasks");
        let pool = FiberPool::new();
        pool.run(Task::new(|_| Ok(Value::Null))).wait().unwrap();
        pool.shutdown();
        assert_eq!(pool.idle_fibers(), 0);
        match pool.run(Task::new(|_| Ok(Value::Null))).wait() {
            Err(fault) => assert!(fault.is_kind(ErrorKind::PoolClosed)),
            Ok(_) => panic!("expected rejection"),
        }
        crate::test_complete!("shutdown_rejects_new_tasks");
    }

    #[test]
    fn zero_retention_terminates_fibers() {
        init_test("zero_retention_terminates_fibers");
        let pool = FiberPool::with_config(PoolConfig {
            target_idle_fibers: 0,
            ..PoolConfig::default()
        });
        pool.run(Task::new(|_| Ok(Value::Null))).wait().unwrap();
        assert_eq!(pool.idle_fibers(), 0);
        crate::test_complete!("zero_retention_terminates_fibers");
    }

    #[test]
    fn config_normalize_restores_prefix() {
        let mut config = PoolConfig {
            thread_name_prefix: String::new(),
            ..PoolConfig::default()
        };
        config.normalize();
        assert_eq!(config.thread_name_prefix, "filament-fiber");
    }
}
