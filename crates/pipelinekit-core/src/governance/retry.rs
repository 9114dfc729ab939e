//! Retry middleware (§4.G.5): the one retry-capable middleware in the
//! canonical chain, allowed to call `next` up to `max_attempts` times
//! without tripping the next-guard's single-invocation rule.

use alloc::sync::Arc;
use async_trait::async_trait;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::governance::jitter::jitter_factor;
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::Command;
use crate::pipeline::middleware::{priority, Middleware, Next};
use crate::time::Clock;

#[derive(Clone, Copy, Debug)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, factor: f64 },
    /// Exponential with up to `jitter_range` (fraction, e.g. `0.2` = ±20%)
    /// deterministic jitter derived from the attempt number and a seed, so
    /// repeated runs under [`crate::time::MockClock`] stay reproducible.
    ExponentialJitter {
        base: Duration,
        factor: f64,
        jitter_range: f64,
    },
}

impl Backoff {
    fn wait_for(&self, attempt: u32, seed: u64) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, factor } => {
                scale(base, factor.powi(attempt as i32))
            }
            Backoff::ExponentialJitter {
                base,
                factor,
                jitter_range,
            } => {
                let nominal = scale(base, factor.powi(attempt as i32));
                let scale_factor = jitter_factor(seed ^ (attempt as u64), jitter_range);
                scale(nominal, scale_factor)
            }
        }
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64((duration.as_secs_f64() * factor.max(0.0)).max(0.0))
}

/// Whether a given error should be retried. Default: the spec's
/// network/timeout/transient classes.
pub type RetryPredicate = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

fn default_retryable(error: &PipelineError) -> bool {
    matches!(
        error.code(),
        codes::TIMEOUT | codes::ACQUIRE_TIMEOUT | codes::CIRCUIT_OPEN | codes::BULKHEAD_FULL
    )
}

#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub max_total_time: Option<Duration>,
    pub retryable: RetryPredicate,
}

impl RetryConfig {
    pub fn try_new(max_attempts: u32, backoff: Backoff) -> Result<Self, PipelineError> {
        if max_attempts == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "max_attempts must be at least 1",
            ));
        }
        Ok(Self {
            max_attempts,
            backoff,
            max_total_time: None,
            retryable: Arc::new(default_retryable),
        })
    }

    pub fn with_max_total_time(mut self, max_total_time: Duration) -> Self {
        self.max_total_time = Some(max_total_time);
        self
    }

    pub fn with_retryable(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }
}

pub struct Retry {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    seed_counter: AtomicU64,
}

impl Retry {
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            seed_counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<C: Command> Middleware<C> for Retry {
    fn priority(&self) -> u32 {
        priority::RETRY
    }

    fn name(&self) -> &'static str {
        "retry"
    }

    fn is_retry_capable(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError> {
        let started = self.clock.now();
        let seed = self.seed_counter.fetch_add(1, Ordering::Relaxed);
        let mut attempt = 0u32;

        loop {
            if context.cancellation().is_cancelled() {
                return Err(PipelineError::new(codes::CANCELLED, "cancelled before retry attempt"));
            }

            let result = next.call(command.clone(), context.clone()).await;
            match result {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    let retryable = (self.config.retryable)(&error);
                    let attempts_remaining = attempt < self.config.max_attempts;
                    let elapsed = self.clock.now() - started;
                    let within_total_time = self
                        .config
                        .max_total_time
                        .map(|budget| elapsed < budget)
                        .unwrap_or(true);

                    if !retryable || !attempts_remaining || !within_total_time {
                        return Err(error);
                    }

                    // `attempt` counts failures so far; the initial call is
                    // attempt 1, so the attempt this retry is about to make
                    // is `attempt + 1` (a handler failing on calls 1 and 2
                    // before succeeding emits `attempt` 2 then 3).
                    let wait = self.config.backoff.wait_for(attempt, seed);
                    context.emit(
                        PipelineEvent::new(events::MIDDLEWARE_RETRY)
                            .with_command_type(command.command_type())
                            .with_property("attempt", (attempt + 1) as i64)
                            .with_property("error_code", error.code())
                            .with_property("next_backoff_ms", wait.as_millis() as i64),
                    );

                    if !wait.is_zero() {
                        self.clock.sleep(wait).await;
                    }
                }
            }
        }
    }
}
