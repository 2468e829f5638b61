//! Test logging infrastructure.
//!
//! Captures typed events from pool, fiber, await, and settlement paths so a
//! failing test can print exactly what the machinery did, in order, with
//! timestamps.
//!
//! # Overview
//!
//! - [`TestLogLevel`]: configurable verbosity levels
//! - [`TestEvent`]: typed events for the operations under test
//! - [`TestLogger`]: captures and reports events with timestamps
//!
//! # Example
//!
//! ```ignore
//! use filament::test_logging::{TestLogger, TestLogLevel, TestEvent};
//!
//! let logger = TestLogger::new(TestLogLevel::Debug);
//! logger.log(TestEvent::TaskSubmit { name: Some("worker".into()) });
//!
//! // On test completion, print the report
//! println!("{}", logger.report());
//! ```

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

/// Logging verbosity level for tests.
///
/// Levels are ordered from least to most verbose:
/// `Error < Warn < Info < Debug < Trace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only errors and failures.
    Error,
    /// Warnings and above.
    Warn,
    /// General test progress.
    #[default]
    Info,
    /// Detailed pool and settlement operations.
    Debug,
    /// All events including every turn and suspend/resume edge.
    Trace,
}

impl TestLogLevel {
    /// Returns a human-readable name for the level.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Returns the level from the `TEST_LOG_LEVEL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for TestLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TestLogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

/// A typed event captured during a test.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A new fiber worker was spawned.
    FiberSpawn {
        /// Raw fiber identity.
        fiber_id: u64,
    },
    /// An idle fiber was reassigned.
    FiberReuse {
        /// Raw fiber identity.
        fiber_id: u64,
    },
    /// A fiber left the pool.
    FiberTerminate {
        /// Raw fiber identity.
        fiber_id: u64,
    },
    /// A task was submitted to the pool.
    TaskSubmit {
        /// Task name, if any.
        name: Option<String>,
    },
    /// A task finished and its promise settled.
    TaskComplete {
        /// Raw fiber identity.
        fiber_id: u64,
        /// Whether the task fulfilled (vs rejected).
        ok: bool,
    },
    /// A fiber parked on an awaited promise.
    AwaitSuspend {
        /// Raw fiber identity.
        fiber_id: u64,
    },
    /// A parked fiber woke with a settlement.
    AwaitResume {
        /// Raw fiber identity.
        fiber_id: u64,
        /// Whether it resumed with a value (vs a fault).
        ok: bool,
    },
    /// A promise settled.
    PromiseSettle {
        /// Whether it fulfilled.
        ok: bool,
    },
    /// A custom progress event.
    Custom {
        /// Event category.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
    /// A warning-level event.
    Warn {
        /// Event category.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
    /// An error-level event.
    Error {
        /// Event category.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
}

impl TestEvent {
    /// The level this event reports at.
    #[must_use]
    pub const fn level(&self) -> TestLogLevel {
        match self {
            Self::Error { .. } => TestLogLevel::Error,
            Self::Warn { .. } => TestLogLevel::Warn,
            Self::TaskSubmit { .. } | Self::TaskComplete { .. } | Self::Custom { .. } => {
                TestLogLevel::Info
            }
            Self::FiberSpawn { .. } | Self::FiberReuse { .. } | Self::FiberTerminate { .. } => {
                TestLogLevel::Debug
            }
            Self::AwaitSuspend { .. } | Self::AwaitResume { .. } | Self::PromiseSettle { .. } => {
                TestLogLevel::Trace
            }
        }
    }
}

/// One captured event with its offset from logger creation.
#[derive(Debug, Clone)]
struct EventRecord {
    at_micros: u128,
    event: TestEvent,
}

/// Captures test events and renders them as a report.
#[derive(Debug)]
pub struct TestLogger {
    start: Instant,
    min_level: TestLogLevel,
    events: Mutex<Vec<EventRecord>>,
}

impl TestLogger {
    /// Creates a logger capturing events at or below `min_level`.
    #[must_use]
    pub fn new(min_level: TestLogLevel) -> Self {
        Self {
            start: Instant::now(),
            min_level,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Records an event if its level is enabled.
    pub fn log(&self, event: TestEvent) {
        if event.level() > self.min_level {
            return;
        }
        let record = EventRecord {
            at_micros: self.start.elapsed().as_micros(),
            event,
        };
        self.events.lock().expect("lock poisoned").push(record);
    }

    /// Number of captured events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.lock().expect("lock poisoned").len()
    }

    /// Renders every captured event, in order, with timestamps.
    #[must_use]
    pub fn report(&self) -> String {
        let events = self.events.lock().expect("lock poisoned");
        let mut out = String::new();
        let _ = writeln!(out, "=== test log ({} events) ===", events.len());
        for record in events.iter() {
            let _ = writeln!(
                out,
                "[{:>10}us] {:5} {:?}",
                record.at_micros,
                record.event.level(),
                record.event
            );
        }
        out
    }

    /// Asserts that no error-level events were captured.
    ///
    /// # Panics
    ///
    /// Panics with the full report if any error event was logged.
    pub fn assert_no_errors(&self) {
        let error_count = {
            let events = self.events.lock().expect("lock poisoned");
            events
                .iter()
                .filter(|r| matches!(r.event, TestEvent::Error { .. }))
                .count()
        };
        assert!(
            error_count == 0,
            "test logged {} errors\n\nFull log:\n{}",
            error_count,
            self.report()
        );
    }

    /// Counts events matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&TestEvent) -> bool) -> usize {
        self.events
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|r| predicate(&r.event))
            .count()
    }

    /// Clears all captured events.
    pub fn clear(&self) {
        self.events.lock().expect("lock poisoned").clear();
    }
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new(TestLogLevel::Info)
    }
}

// ============================================================================
// Macros
// ============================================================================

/// Log a custom event to a test logger.
///
/// # Example
///
/// ```ignore
/// test_log!(logger, "setup", "Submitting {} tasks", count);
/// ```
#[macro_export]
macro_rules! test_log {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Custom {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Log an error event to a test logger.
#[macro_export]
macro_rules! test_error {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Error {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Log a warning event to a test logger.
#[macro_export]
macro_rules! test_warn {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Warn {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Assert a condition, printing the full log on failure.
#[macro_export]
macro_rules! assert_log {
    ($logger:expr, $cond:expr) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
    ($logger:expr, $cond:expr, $($arg:tt)*) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!($($arg)*);
        }
    };
}

/// Assert equality, printing the full log on failure.
#[macro_export]
macro_rules! assert_eq_log {
    ($logger:expr, $left:expr, $right:expr) => {
        if $left != $right {
            eprintln!("{}", $logger.report());
            panic!(
                "assertion failed: `(left == right)`\n  left: {:?}\n right: {:?}",
                $left, $right
            );
        }
    };
}
