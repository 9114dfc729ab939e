//! Observability fabric: structured events, the metrics they bridge into,
//! and a minimal logging facade — the three things the core itself emits,
//! grounded on the teacher's `observability/` namespace split
//! (`facade`, `keys`) generalized from transport/codec telemetry to
//! pipeline/middleware telemetry.

pub mod hub;
pub mod keys;
pub mod logging;
pub mod metrics;

pub use hub::{EventHub, PipelineEvent, SubscriptionHandle};
pub use logging::{LogRecord, LogSeverity, Logger, NoopLogger};
pub use metrics::{Counter, Gauge, Histogram, MetricsRegistry, Timer};
