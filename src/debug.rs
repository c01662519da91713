//! Diagnostic logging for simulation runs.
//!
//! Component-tagged lines on stderr, timestamped relative to the first time
//! logging was enabled:
//!
//! ```text
//! [+0042ms] INFO  manager/P3     aborted P3
//! ```
//!
//! Off by default. `--debug` turns it on at `debug` level; the
//! `DEADLOCK_SIM_DEBUG` variable accepts a level name (`trace`, `debug`,
//! `info`, `warn`, `error`) or a plain truthy value.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Environment variable that turns diagnostics on.
pub const ENV_VAR: &str = "DEADLOCK_SIM_DEBUG";

/// Lowest level that is printed; `OFF` disables everything.
static THRESHOLD: AtomicU8 = AtomicU8::new(OFF);
const OFF: u8 = u8::MAX;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Severity of a diagnostic line, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Per-scan and per-scope detail.
    Trace,
    /// Worker lifecycle.
    Debug,
    /// Aborts, cycles, run start and end.
    Info,
    /// Rejected requests, budget exhaustion, final sweep.
    Warn,
    /// Failures that end the run.
    Error,
}

impl Level {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" | "1" | "true" | "yes" | "on" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.pad(label)
    }
}

/// Prints lines at `level` and above.
pub fn enable_at(level: Level) {
    STARTED.get_or_init(Instant::now);
    THRESHOLD.store(level as u8, Ordering::SeqCst);
}

/// Prints lines at debug level and above.
pub fn enable() {
    enable_at(Level::Debug);
}

/// Turns diagnostics off.
pub fn disable() {
    THRESHOLD.store(OFF, Ordering::SeqCst);
}

/// Enables diagnostics from [`ENV_VAR`] if it holds a level name or a truthy
/// value. Returns whether logging is now on.
pub fn init_from_env() -> bool {
    if let Some(level) = std::env::var(ENV_VAR).ok().as_deref().and_then(Level::parse) {
        enable_at(level);
    }
    is_enabled()
}

/// Returns true if any level is printed.
#[inline]
pub fn is_enabled() -> bool {
    THRESHOLD.load(Ordering::Relaxed) != OFF
}

/// Returns true if lines at `level` are printed.
#[inline]
pub fn enabled_for(level: Level) -> bool {
    (level as u8) >= THRESHOLD.load(Ordering::Relaxed)
}

/// Writes one line if `level` passes the threshold.
pub fn log(level: Level, component: &str, message: &str) {
    if !enabled_for(level) {
        return;
    }
    let elapsed = STARTED.get().map_or(0, |start| start.elapsed().as_millis());
    let thread = std::thread::current();
    let origin = format!("{component}/{}", thread.name().unwrap_or("-"));
    let _ = writeln!(io::stderr().lock(), "[+{elapsed:04}ms] {level:<5} {origin:<14} {message}");
}

/// Logs with format arguments; the message is only built when it will be printed.
#[macro_export]
macro_rules! debug_log {
    ($level:expr, $component:expr, $($arg:tt)*) => {
        if $crate::debug::enabled_for($level) {
            $crate::debug::log($level, $component, &format!($($arg)*));
        }
    };
}

/// Logs at trace level.
#[macro_export]
macro_rules! trace {
    ($component:expr, $($arg:tt)*) => {
        $crate::debug_log!($crate::debug::Level::Trace, $component, $($arg)*)
    };
}

/// Logs at debug level.
#[macro_export]
macro_rules! debug {
    ($component:expr, $($arg:tt)*) => {
        $crate::debug_log!($crate::debug::Level::Debug, $component, $($arg)*)
    };
}

/// Logs at info level.
#[macro_export]
macro_rules! info {
    ($component:expr, $($arg:tt)*) => {
        $crate::debug_log!($crate::debug::Level::Info, $component, $($arg)*)
    };
}

/// Logs at warn level.
#[macro_export]
macro_rules! warn {
    ($component:expr, $($arg:tt)*) => {
        $crate::debug_log!($crate::debug::Level::Warn, $component, $($arg)*)
    };
}

/// Logs at error level.
#[macro_export]
macro_rules! error {
    ($component:expr, $($arg:tt)*) => {
        $crate::debug_log!($crate::debug::Level::Error, $component, $($arg)*)
    };
}

/// Reports how long a scope took when dropped.
pub struct ScopeTimer {
    component: &'static str,
    label: &'static str,
    start: Instant,
}

impl ScopeTimer {
    /// Starts timing `label`.
    #[must_use]
    pub fn start(component: &'static str, label: &'static str) -> Self {
        Self { component, label, start: Instant::now() }
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        if enabled_for(Level::Debug) {
            let ms = self.start.elapsed().as_secs_f64() * 1000.0;
            log(Level::Debug, self.component, &format!("{} took {ms:.2}ms", self.label));
        }
    }
}

/// Times the rest of the enclosing scope.
#[macro_export]
macro_rules! time_scope {
    ($component:expr, $label:expr) => {
        let _timer = $crate::debug::ScopeTimer::start($component, $label);
    };
}
