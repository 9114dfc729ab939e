//! Configuration surface: every tunable governance/concurrency knob
//! validated through the same `try_new` idiom as
//! `spark_core::governance::timeout::profile::Timeout::try_new`, plus an
//! optional `config-toml` feature (mirroring `spark_core`'s own optional
//! `serde`+`toml` gating) that loads a [`PipelineConfig`] aggregate from a
//! TOML document.

use core::time::Duration;

use crate::concurrency::SemaphoreConfig;
use crate::error::{codes, PipelineError};
use crate::governance::{Backoff, BulkheadConfig, CircuitBreakerConfig, RateLimitScope, RateLimiterConfig, RateLimitingStrategy, RetryConfig, TimeoutConfig};

/// The middleware chain's own depth cap (§4.E), kept in `config` alongside
/// the other governance knobs rather than buried in `pipeline::chain`.
#[derive(Clone, Copy, Debug)]
pub struct ChainConfig {
    pub max_depth: usize,
}

impl ChainConfig {
    pub fn try_new(max_depth: usize) -> Result<Self, PipelineError> {
        if max_depth == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "chain max_depth must be at least 1",
            ));
        }
        Ok(Self { max_depth })
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { max_depth: 100 }
    }
}

/// Plain, TOML-representable settings for every resilience/concurrency
/// knob. Kept separate from the runtime `*Config` types (which carry
/// closures — `Arc<dyn Fn>` scope extractors, failure predicates — that
/// cannot round-trip through `serde`); [`PipelineConfig::semaphore_config`]
/// and friends fill those closures in with sensible global/default
/// behavior.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "config-toml", derive(serde::Deserialize))]
pub struct PipelineConfig {
    pub chain_max_depth: usize,
    pub semaphore_max_concurrency: usize,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_second: f64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_success_threshold: u32,
    pub circuit_breaker_reset_timeout_ms: u64,
    pub bulkhead_max_concurrency: usize,
    pub bulkhead_max_queue: usize,
    pub timeout_deadline_ms: u64,
    pub timeout_grace_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_factor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chain_max_depth: 100,
            semaphore_max_concurrency: 64,
            rate_limit_capacity: 100.0,
            rate_limit_refill_per_second: 50.0,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_reset_timeout_ms: 30_000,
            bulkhead_max_concurrency: 32,
            bulkhead_max_queue: 0,
            timeout_deadline_ms: 5_000,
            timeout_grace_ms: 0,
            retry_max_attempts: 3,
            retry_backoff_base_ms: 50,
            retry_backoff_factor: 2.0,
        }
    }
}

impl PipelineConfig {
    /// Parses a TOML document into a [`PipelineConfig`]. Missing fields are
    /// an error, not silently defaulted — callers that want defaults
    /// should start from `PipelineConfig::default()` and override fields
    /// in Rust instead of relying on partial TOML.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(document: &str) -> Result<Self, PipelineError> {
        toml::from_str(document)
            .map_err(|err| PipelineError::new(codes::INVALID_CONFIG, err.to_string()).with_cause(err))
    }

    pub fn chain_config(&self) -> Result<ChainConfig, PipelineError> {
        ChainConfig::try_new(self.chain_max_depth)
    }

    pub fn semaphore_config(&self) -> Result<SemaphoreConfig, PipelineError> {
        SemaphoreConfig::try_new(self.semaphore_max_concurrency)
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(
            RateLimitingStrategy::TokenBucket {
                capacity: self.rate_limit_capacity,
                refill_per_second: self.rate_limit_refill_per_second,
            },
            RateLimitScope::Global,
        )
    }

    pub fn circuit_breaker_config(&self) -> Result<CircuitBreakerConfig, PipelineError> {
        CircuitBreakerConfig::try_new(
            "default",
            self.circuit_breaker_failure_threshold,
            self.circuit_breaker_success_threshold,
            Duration::from_millis(self.circuit_breaker_reset_timeout_ms),
        )
    }

    pub fn bulkhead_config(&self) -> Result<BulkheadConfig, PipelineError> {
        BulkheadConfig::try_new(self.bulkhead_max_concurrency, self.bulkhead_max_queue)
    }

    pub fn timeout_config(&self) -> Result<TimeoutConfig, PipelineError> {
        TimeoutConfig::try_new(
            Duration::from_millis(self.timeout_deadline_ms),
            Duration::from_millis(self.timeout_grace_ms),
        )
    }

    pub fn retry_config(&self) -> Result<RetryConfig, PipelineError> {
        RetryConfig::try_new(
            self.retry_max_attempts,
            Backoff::Exponential {
                base: Duration::from_millis(self.retry_backoff_base_ms),
                factor: self.retry_backoff_factor,
            },
        )
    }
}
