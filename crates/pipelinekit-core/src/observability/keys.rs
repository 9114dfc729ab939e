//! Canonical event and metric names. A single source of truth so the core,
//! the governance middlewares and anything bridging events into metrics
//! never drift on a string literal, the same role `spark_core::observability::keys`
//! plays for transport/codec telemetry.

/// Event names emitted by the core and the canonical resilience
/// middlewares.
pub mod events {
    pub const PIPELINE_WILL_EXECUTE: &str = "pipeline.will_execute";
    pub const PIPELINE_DID_EXECUTE: &str = "pipeline.did_execute";
    pub const PIPELINE_DID_FAIL: &str = "pipeline.did_fail";
    pub const MIDDLEWARE_WILL_EXECUTE: &str = "middleware.will_execute";
    pub const MIDDLEWARE_DID_EXECUTE: &str = "middleware.did_execute";
    pub const MIDDLEWARE_DID_FAIL: &str = "middleware.did_fail";
    pub const MIDDLEWARE_RETRY: &str = "middleware.retry";
    pub const CIRCUIT_BREAKER_STATE_CHANGED: &str = "circuit_breaker.state_changed";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit.exceeded";
    pub const BULKHEAD_FULL: &str = "bulkhead.full";
    pub const TIMEOUT_EXCEEDED: &str = "timeout.exceeded";
}

/// Metric names bridged from the events above, or recorded directly.
pub mod metrics {
    pub const COMMAND_STARTED: &str = "command.started";
    pub const COMMAND_COMPLETED: &str = "command.completed";
    pub const COMMAND_FAILED: &str = "command.failed";
    pub const COMMAND_DURATION: &str = "command.duration";
    pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker.state";
    pub const RATE_LIMIT_HIT: &str = "rate_limit.hit";
    pub const SEMAPHORE_QUEUE_DEPTH: &str = "semaphore.queue_depth";
    pub const SEMAPHORE_QUEUE_BYTES: &str = "semaphore.queue_bytes";
    pub const POOL_HIT_RATIO: &str = "pool.hit_ratio";
    pub const SUBSCRIBER_OVERFLOW: &str = "subscriber.overflow";
    pub const CARDINALITY_DROPPED: &str = "cardinality.dropped";
}
