//! Crate-wide error type and the stable string codes every caller can key
//! metrics, alerts and retry predicates off of.
//!
//! # Why
//! Every layer (chain, semaphore, resilience middlewares, cache) needs to
//! surface failures that are both human-readable and machine-classifiable.
//! `PipelineError` carries a stable `&'static str` code plus an optional
//! boxed cause, the same split `spark_core::CoreError` uses, so the crate
//! never has to invent a second error type to bridge `core::error::Error`.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use core::fmt;

/// Stable string tags, one per taxonomy entry. Consumers match on these
/// instead of on `Debug` output, which is allowed to change.
pub mod codes {
    pub const INVALID_COMMAND_TYPE: &str = "pipeline.invalid_command_type";
    pub const INVALID_RESULT_TYPE: &str = "pipeline.invalid_result_type";
    pub const NEXT_ALREADY_CALLED: &str = "pipeline.next_already_called";
    pub const MAX_DEPTH_EXCEEDED: &str = "pipeline.max_depth_exceeded";
    pub const ACQUIRE_TIMEOUT: &str = "semaphore.acquire_timeout";
    pub const QUEUE_FULL: &str = "semaphore.queue_full";
    pub const MEMORY_LIMIT_EXCEEDED: &str = "semaphore.memory_limit_exceeded";
    pub const SHUTTING_DOWN: &str = "semaphore.shutting_down";
    pub const CANCELLED: &str = "pipeline.cancelled";
    pub const TIMEOUT: &str = "governance.timeout";
    pub const CIRCUIT_OPEN: &str = "governance.circuit_open";
    pub const BULKHEAD_FULL: &str = "governance.bulkhead_full";
    pub const RATE_LIMIT_EXCEEDED: &str = "governance.rate_limit_exceeded";
    pub const POOL_EXHAUSTED: &str = "pool.exhausted";
    pub const RETRY_EXHAUSTED: &str = "governance.retry_exhausted";
    pub const INVALID_CONFIG: &str = "config.invalid";
}

type Cause = Box<dyn core::error::Error + Send + Sync + 'static>;

/// The crate's single error type. A stable `code`, a human message that
/// must never carry command payloads or secrets (see §7 of the execution
/// core's error handling rules), and an optional cause chain.
pub struct PipelineError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Cause>,
}

impl PipelineError {
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl core::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn core::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineError")
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl core::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn core::error::Error + 'static))
    }
}

/// Crate-wide result alias, mirroring `spark_core::Result`.
pub type Result<T, E = PipelineError> = core::result::Result<T, E>;
