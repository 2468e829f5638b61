//! Structured-logging shim.
//!
//! With the default-on `tracing` feature, these are the `tracing` macros;
//! without it they compile to nothing, so core modules (and the crate's
//! test macros) can log unconditionally via
//! `crate::tracing_compat::{trace, debug, ...}` and stay dependency-free
//! when tracing is disabled.

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop {
    /// No-op stand-in for `tracing::trace!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __filament_noop_log {
        ($($arg:tt)*) => {};
    }

    pub use crate::__filament_noop_log as debug;
    pub use crate::__filament_noop_log as error;
    pub use crate::__filament_noop_log as info;
    pub use crate::__filament_noop_log as trace;
    pub use crate::__filament_noop_log as warn;
}

#[cfg(not(feature = "tracing"))]
pub use noop::{debug, error, info, trace, warn};
