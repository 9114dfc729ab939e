//! Resilience middlewares (§4.G): rate limiting, circuit breaking,
//! bulkheads, timeout and retry, plus their canonical priority ordering
//! (outer → inner): `RateLimit(50) → CircuitBreaker(100) → Bulkhead(200) →
//! Timeout(300) → Retry(400) → Handler`.
//!
//! Grounded on the teacher's own `governance::timeout::profile::Timeout`
//! (soft/hard split, generalized here to single-deadline-plus-grace) and
//! `governance::retry::adaptive` (deterministic SplitMix64 jitter driven by
//! an injectable clock instead of a `rand` dependency).

pub mod bulkhead;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;
pub mod timeout;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadIsolation};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::{RateLimitScope, RateLimiter, RateLimiterConfig, RateLimitingStrategy};
pub use retry::{Backoff, Retry, RetryConfig};
pub use timeout::{Timeout, TimeoutConfig};

mod jitter {
    //! Deterministic pseudo-random jitter, the same SplitMix64-style mixer
    //! the teacher's `governance::retry::adaptive` module uses, so backoff
    //! waits stay reproducible under `MockClock` instead of depending on a
    //! `rand` crate.

    #[inline]
    pub fn mix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9E3779B97F4A7C15);
        x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
        x ^ (x >> 31)
    }

    /// A deterministic value in `[1.0 - range, 1.0 + range]` derived from
    /// `seed`, used to scale a backoff duration without retaining any
    /// external randomness source.
    pub fn jitter_factor(seed: u64, range: f64) -> f64 {
        let mixed = mix64(seed);
        let mantissa = (mixed >> 11) as f64;
        let unit = mantissa / ((1u64 << 53) as f64);
        1.0 + (unit * 2.0 - 1.0) * range
    }
}
