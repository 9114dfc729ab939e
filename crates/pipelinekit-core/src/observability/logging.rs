//! Minimal logging facade.
//!
//! # Why
//! The teacher crate this one is grounded on targets `no_std + alloc` and
//! deliberately does not depend on `tracing`/`log` — structured logging is
//! expressed as a small trait instead, so the core stays usable in
//! environments that can't carry either crate's runtime. This crate follows
//! the same choice rather than reaching for an ecosystem logging crate the
//! teacher itself avoids.

use alloc::borrow::Cow;
use alloc::vec::Vec;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A single structured log line: a severity, a message, and a small set of
/// key/value fields (mirroring the fields attached to a [`crate::observability::hub::PipelineEvent`]).
pub struct LogRecord<'a> {
    pub severity: LogSeverity,
    pub target: &'static str,
    pub message: Cow<'a, str>,
    pub fields: Vec<(&'static str, Cow<'a, str>)>,
}

impl<'a> LogRecord<'a> {
    pub fn new(severity: LogSeverity, target: &'static str, message: impl Into<Cow<'a, str>>) -> Self {
        Self {
            severity,
            target,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: &'static str, value: impl Into<Cow<'a, str>>) -> Self {
        self.fields.push((key, value.into()));
        self
    }
}

/// Sink a [`LogRecord`] is handed to. Implementors decide formatting and
/// destination; the core never assumes a specific backend.
pub trait Logger: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);
}

/// Discards every record. The default when no logger is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _record: &LogRecord<'_>) {}
}

/// Writes one line per record to stderr. Only available with the `std`
/// feature, since it needs `std::io`.
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrLogger;

#[cfg(feature = "std")]
impl Logger for StderrLogger {
    fn log(&self, record: &LogRecord<'_>) {
        use std::io::Write;
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "[{}] {}: {}", record.severity, record.target, record.message);
        for (key, value) in &record.fields {
            let _ = write!(stderr, " {key}={value}");
        }
        let _ = writeln!(stderr);
    }
}
