//! Error types and error handling strategy for Filament.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Panics are isolated at fiber, adapter, and turn boundaries and converted
//!   to [`Fault`]s
//! - No error is silently dropped: every path settles a promise, invokes a
//!   callback, or re-raises through the unhandled-fault channel on a later
//!   turn
//!
//! # Error Categories
//!
//! - **Usage**: an operation that only makes sense inside a running fiber was
//!   called from outside one
//! - **Fiber lifecycle**: a task body panicked, or a settlement could not be
//!   delivered to its parked fiber
//! - **Promise**: a promise was dropped without ever settling
//! - **Pool**: a task was submitted to a pool that has shut down
//!
//! # Settlement errors
//!
//! Promises reject with a [`Fault`]: a cheaply cloneable handle to any
//! `std::error::Error + Send + Sync` value. Cloning a `Fault` preserves
//! identity ([`Fault::ptr_eq`]), so the error observed after an await or a
//! bridged continuation is the same object that rejected the promise, not a
//! copy.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Usage ===
    /// An await or context mutation was attempted with no fiber running.
    NoActiveFiber,

    // === Fiber lifecycle ===
    /// A task body panicked inside its fiber.
    FiberPanicked,
    /// A settlement could not be delivered to the fiber parked on it.
    ResumeLost,

    // === Promise ===
    /// The awaited promise was dropped without ever settling.
    Unsettled,

    // === Pool ===
    /// The pool has shut down and accepts no further tasks.
    PoolClosed,
}

impl ErrorKind {
    /// Returns a static description of the error kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoActiveFiber => "no active fiber",
            Self::FiberPanicked => "fiber panicked",
            Self::ResumeLost => "resume lost",
            Self::Unsettled => "promise dropped unsettled",
            Self::PoolClosed => "pool closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed Filament error.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<Arc<str>>,
}

impl Error {
    /// Creates an error of the given kind with no extra detail.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Creates an error of the given kind with a detail message.
    #[must_use]
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(Arc::from(detail.into())),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the detail message, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// A cloneable, identity-preserving settlement error.
///
/// `Fault` is what promises reject with. It wraps an arbitrary error value
/// behind an `Arc`, so clones are cheap and [`Fault::ptr_eq`] can verify that
/// two observations refer to the same underlying error object.
#[derive(Clone)]
pub struct Fault {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl Fault {
    /// Wraps an arbitrary error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Creates a fault carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Converts a caught panic payload into a fault of kind
    /// [`ErrorKind::FiberPanicked`].
    ///
    /// String payloads (the common case for `panic!("...")`) are preserved as
    /// the detail message.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Some((*s).to_owned())
        } else {
            payload.downcast_ref::<String>().cloned()
        };
        match detail {
            Some(detail) => Self::new(Error::with_detail(ErrorKind::FiberPanicked, detail)),
            None => Self::new(Error::new(ErrorKind::FiberPanicked)),
        }
    }

    /// Returns `true` if both faults refer to the same underlying error.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attempts to view the underlying error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Returns the [`ErrorKind`] when the fault wraps a Filament [`Error`].
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.downcast_ref::<Error>().map(Error::kind)
    }

    /// Returns `true` when the fault wraps a Filament [`Error`] of `kind`.
    #[must_use]
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// Borrows the underlying error object.
    #[must_use]
    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }
}

/// Faults compare by identity: two faults are equal exactly when they wrap
/// the same underlying error object, never by message.
impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault({:?})", self.inner)
    }
}

impl From<Error> for Fault {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

/// A plain message error, for faults with no richer source.
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}
