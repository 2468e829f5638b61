//! The deferred-execution primitive: scheduler turns.
//!
//! A single dispatcher thread drains a FIFO queue of thunks. [`enqueue`]
//! guarantees the thunk runs on a *later* turn, never synchronously within
//! the call that scheduled it, which is what keeps promise settlement from
//! re-entering its own resolution stack and keeps adapter callbacks off
//! their caller's stack. One dequeued thunk execution is one turn.
//!
//! # Unhandled faults
//!
//! A fault that escapes past every handler (for example, a resume that can
//! no longer be delivered) is re-raised here on a later turn: the installed
//! hook receives it, or it is logged at error level. Either way it is
//! counted, so nothing vanishes. A panicking turn is converted to a fault
//! and fed through the same channel; the dispatcher survives.

use crate::error::Fault;
use crate::tracing_compat::{error, trace};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// Hook invoked with faults that escaped every handler.
pub type UnhandledHook = Arc<dyn Fn(Fault) + Send + Sync + 'static>;

enum Turn {
    Run(Thunk),
    Flush(Sender<()>),
}

struct TurnQueue {
    tx: Sender<Turn>,
    unhandled_hook: Mutex<Option<UnhandledHook>>,
    unhandled_seen: AtomicU64,
}

static QUEUE: OnceLock<TurnQueue> = OnceLock::new();

fn queue() -> &'static TurnQueue {
    QUEUE.get_or_init(|| {
        let (tx, rx) = unbounded::<Turn>();
        thread::Builder::new()
            .name("filament-turns".to_owned())
            .spawn(move || {
                while let Ok(turn) = rx.recv() {
                    match turn {
                        Turn::Run(thunk) => {
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(thunk)) {
                                raise_unhandled(Fault::from_panic(payload));
                            }
                        }
                        Turn::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })
            .expect("failed to spawn turn dispatcher thread");
        TurnQueue {
            tx,
            unhandled_hook: Mutex::new(None),
            unhandled_seen: AtomicU64::new(0),
        }
    })
}

/// Schedules `thunk` to run on a later turn.
///
/// Turns run strictly in enqueue order, one at a time, and never
/// synchronously within the call that scheduled them.
pub fn enqueue(thunk: impl FnOnce() + Send + 'static) {
    // The dispatcher thread outlives every sender; this send only fails
    // during process teardown, where the turn is moot anyway.
    let _ = queue().tx.send(Turn::Run(Box::new(thunk)));
}

/// Blocks until every turn enqueued before this call has run.
///
/// Primarily a test aid: deterministic settling points without sleeps.
pub fn barrier() {
    let (done_tx, done_rx) = unbounded();
    if queue().tx.send(Turn::Flush(done_tx)).is_ok() {
        let _ = done_rx.recv();
    }
}

/// Installs (or clears) the hook that receives unhandled faults.
pub fn set_unhandled_hook(hook: Option<UnhandledHook>) {
    *queue().unhandled_hook.lock() = hook;
}

/// Number of unhandled faults re-raised since process start.
#[must_use]
pub fn unhandled_count() -> u64 {
    queue().unhandled_seen.load(Ordering::SeqCst)
}

/// Re-raises a fault that escaped every handler.
///
/// The fault surfaces on a later turn, through the installed hook or as an
/// error-level log line, and is counted either way. It is never delivered
/// synchronously inside the failing call, and never dropped.
pub fn raise_unhandled(fault: Fault) {
    trace!(fault = %fault, "scheduling unhandled fault re-raise");
    let q = queue();
    q.unhandled_seen.fetch_add(1, Ordering::SeqCst);
    let hook = q.unhandled_hook.lock().clone();
    let _ = q.tx.send(Turn::Run(Box::new(move || match hook {
        Some(hook) => hook(fault),
        None => {
            error!(fault = %fault, "unhandled fault escaped its handlers");
        }
    })));
}
