//! Progress, log and status reporting.
//!
//! Every long-running operation in the crate reports through a
//! [`ProgressSink`] handed to it by the caller. The sink is the only channel
//! between the processing core and whatever sits on top of it (the CLI, a
//! GUI, a test recorder), so the core never prints and never holds global
//! state.
//!
//! | Method | Meaning |
//! |---|---|
//! | `progress(pct)` | Overall completion, always within 0–100 |
//! | `log(msg, level)` | Human-readable event at a [`LogLevel`] |
//! | `status(text)` | Short "what is happening now" line |
//!
//! Implementations must be `Send + Sync`: per-image workers running on the
//! rayon pool log through the same sink concurrently.

use std::fmt;

/// Severity of a sink log message.
///
/// `Success` sits between `Info` and `Warn`: it marks a completed unit of
/// work (a pack written, an image transformed) rather than a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver for progress, log and status events.
pub trait ProgressSink: Send + Sync {
    /// Overall progress in percent. Callers go through [`Reporter`], which
    /// clamps before forwarding, so implementations may assume 0–100.
    fn progress(&self, percent: u8);

    fn log(&self, message: &str, level: LogLevel);

    fn status(&self, text: &str);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn progress(&self, _percent: u8) {}
    fn log(&self, _message: &str, _level: LogLevel) {}
    fn status(&self, _text: &str) {}
}

/// Sink that forwards to the [`log`] facade.
///
/// `Success` is emitted at info level with a `SUCCESS` prefix, `Fatal` at
/// error level with a `FATAL` prefix. Progress and status go to debug/info.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn progress(&self, percent: u8) {
        log::debug!("progress {percent}%");
    }

    fn log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Success => log::info!("SUCCESS {message}"),
            LogLevel::Warn => log::warn!("{message}"),
            LogLevel::Error => log::error!("{message}"),
            LogLevel::Fatal => log::error!("FATAL {message}"),
        }
    }

    fn status(&self, text: &str) {
        log::info!("{text}");
    }
}

/// Thin wrapper the processing code reports through.
///
/// Converts fractional progress to a clamped percentage and gives each level
/// a named method so call sites read like the events they report.
#[derive(Clone, Copy)]
pub struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink }
    }

    /// Report a raw percentage, clamped into 0–100.
    pub fn percent(&self, value: f64) {
        self.sink.progress(clamp_percent(value));
    }

    /// Report `done` out of `total` as a percentage. A zero total reads as
    /// complete.
    pub fn fraction(&self, done: usize, total: usize) {
        if total == 0 {
            self.sink.progress(100);
        } else {
            self.percent(done as f64 / total as f64 * 100.0);
        }
    }

    pub fn reset(&self) {
        self.sink.progress(0);
    }

    pub fn status(&self, text: &str) {
        self.sink.status(text);
    }

    pub fn log(&self, message: &str, level: LogLevel) {
        self.sink.log(message, level);
    }

    pub fn info(&self, message: &str) {
        self.log(message, LogLevel::Info);
    }

    pub fn success(&self, message: &str) {
        self.log(message, LogLevel::Success);
    }

    pub fn warn(&self, message: &str) {
        self.log(message, LogLevel::Warn);
    }

    pub fn error(&self, message: &str) {
        self.log(message, LogLevel::Error);
    }

    pub fn fatal(&self, message: &str) {
        self.log(message, LogLevel::Fatal);
    }
}

/// Clamp an arbitrary percentage into the 0–100 range. NaN maps to 0.
pub fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0) as u8
}
