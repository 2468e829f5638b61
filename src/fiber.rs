//! Fiber identity, status, and the current-fiber registration.
//!
//! A fiber is a suspendable unit of execution owned by the pool. Each fiber
//! is backed by a dedicated worker thread (see [`crate::pool`]); while a
//! task runs, the fiber is registered in a thread-local so the await
//! operator, the bridge, and the ambient-context accessors can find "the
//! currently running fiber, if any" without threading a handle through every
//! call.
//!
//! Status transitions:
//!
//! ```text
//!        ┌──────── task assigned ────────┐
//!        │                               ▼
//!      Idle ◄── task completed ──── Running ◄───┐
//!        │                               │      │ settled
//!        │                          await│      │
//!        ▼                               ▼      │
//!   Terminated                      Suspended ──┘
//! ```
//!
//! At most one task is active per fiber; the pool reassigns a fiber only
//! after it reports `Idle`. A fiber that leaves the pool (retention bound
//! reached, or pool dropped) reports `Terminated` and its thread exits.

use crate::context::Context;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Identity of a fiber, stable across reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric identity.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber-{}", self.0)
    }
}

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Parked in the pool, ready for a task.
    Idle,
    /// Executing a task body.
    Running,
    /// Parked on an awaited promise.
    Suspended,
    /// Left the pool; its worker thread has exited or is exiting.
    Terminated,
}

impl FiberStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Suspended => 2,
            Self::Terminated => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Suspended,
            _ => Self::Terminated,
        }
    }
}

/// Shared per-fiber cell: identity plus current status.
pub(crate) struct FiberState {
    id: FiberId,
    status: AtomicU8,
}

impl FiberState {
    pub(crate) fn new(id: FiberId) -> Arc<Self> {
        Arc::new(Self {
            id,
            status: AtomicU8::new(FiberStatus::Idle.as_u8()),
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn status(&self) -> FiberStatus {
        FiberStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: FiberStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }
}

/// The currently running fiber, as seen from its own worker thread.
pub(crate) struct ActiveFiber {
    state: Arc<FiberState>,
    context: RefCell<Context>,
}

impl ActiveFiber {
    pub(crate) fn state(&self) -> &Arc<FiberState> {
        &self.state
    }

    pub(crate) fn id(&self) -> FiberId {
        self.state.id
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Rc<ActiveFiber>>> = const { RefCell::new(None) };
}

/// Registers a fiber as current for the duration of the returned guard.
///
/// Installs `context` as the fiber's active context. The worker thread runs
/// exactly one task per registration; dropping the guard clears the
/// registration (and discards the context) even if the task unwound.
pub(crate) fn enter(state: Arc<FiberState>, context: Context) -> ActiveGuard {
    let active = Rc::new(ActiveFiber {
        state,
        context: RefCell::new(context),
    });
    ACTIVE.with(|slot| {
        debug_assert!(
            slot.borrow().is_none(),
            "fiber registration is not reentrant"
        );
        *slot.borrow_mut() = Some(active);
    });
    ActiveGuard { _private: () }
}

/// Clears the current-fiber registration on drop.
pub(crate) struct ActiveGuard {
    _private: (),
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|slot| slot.borrow_mut().take());
    }
}

/// Clones a handle to the current fiber, if one is running on this thread.
pub(crate) fn active_handle() -> Option<Rc<ActiveFiber>> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

/// Runs `f` against the current fiber's context.
///
/// Returns `None` when no fiber is running on this thread. The context is
/// borrowed only for the duration of `f`; `f` must not recurse into another
/// context accessor.
pub(crate) fn with_active_context<R>(f: impl FnOnce(&mut Context) -> R) -> Option<R> {
    let active = active_handle()?;
    let mut context = active.context.borrow_mut();
    Some(f(&mut context))
}

/// Returns the identity of the currently running fiber, if any.
#[must_use]
pub fn current_id() -> Option<FiberId> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|active| active.id()))
}

/// Returns `true` when called from inside a running fiber.
#[must_use]
pub fn is_active() -> bool {
    current_id().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;

    #[test]
    fn no_fiber_on_plain_threads() {
        assert!(current_id().is_none());
        assert!(!is_active());
        assert!(active_handle().is_none());
    }

    #[test]
    fn enter_registers_and_guard_clears() {
        let state = FiberState::new(FiberId::new(7));
        {
            let _guard = enter(Arc::clone(&state), Context::new());
            assert_eq!(current_id(), Some(FiberId::new(7)));
            assert!(is_active());
        }
        assert!(current_id().is_none());
    }

    #[test]
    fn context_is_visible_while_registered() {
        let state = FiberState::new(FiberId::new(1));
        let mut context = Context::new();
        context.set("k", Value::Int(5));
        let _guard = enter(state, context);

        let read = with_active_context(|ctx| ctx.get("k").cloned()).flatten();
        assert_eq!(read, Some(Value::Int(5)));

        with_active_context(|ctx| {
            ctx.set("k", Value::Int(6));
        });
        let read = with_active_context(|ctx| ctx.get("k").cloned()).flatten();
        assert_eq!(read, Some(Value::Int(6)));
    }

    #[test]
    fn status_round_trip() {
        let state = FiberState::new(FiberId::new(2));
        assert_eq!(state.status(), FiberStatus::Idle);
        state.set_status(FiberStatus::Running);
        assert_eq!(state.status(), FiberStatus::Running);
        state.set_status(FiberStatus::Suspended);
        assert_eq!(state.status(), FiberStatus::Suspended);
        state.set_status(FiberStatus::Terminated);
        assert_eq!(state.status(), FiberStatus::Terminated);
    }

    #[test]
    fn fiber_id_display() {
        assert_eq!(FiberId::new(3).to_string(), "fiber-3");
    }
}
