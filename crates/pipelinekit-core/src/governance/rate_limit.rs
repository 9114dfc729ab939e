//! Rate limiting middleware (§4.G.1): token bucket, sliding window or
//! adaptive strategies, scoped per identifier.
//!
//! Book-keeping is sharded by identifier: each key hashes into one of a
//! fixed number of `HashMap` buckets, each behind its own `spin::Mutex`, so
//! concurrent callers with different identifiers rarely contend on the same
//! lock — one lock per distinct caller would not scale, and one lock for
//! the whole limiter would serialize every identifier behind the busiest
//! one.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use async_trait::async_trait;
use core::time::Duration;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::Command;
use crate::pipeline::middleware::{priority, Middleware, Next};
use crate::time::Clock;

/// Which pool of requests a limit applies to.
#[derive(Clone, Debug)]
pub enum RateLimitScope {
    Global,
    PerUser,
    PerCommand,
    /// Identifier extracted by a caller-supplied function; falls back to
    /// `metadata.user_id` when the spec's default extractor is wanted.
    PerIdentifier(Arc<dyn Fn(&Context) -> String + Send + Sync>),
}

impl RateLimitScope {
    fn key(&self, context: &Context, command_type: &'static str) -> String {
        match self {
            RateLimitScope::Global => String::from("__global__"),
            RateLimitScope::PerUser => context
                .metadata()
                .user_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| String::from("__anonymous__")),
            RateLimitScope::PerCommand => command_type.to_string(),
            RateLimitScope::PerIdentifier(extractor) => extractor(context),
        }
    }

    /// Stable label for the `scope` property on `rate_limit.exceeded`.
    fn label(&self) -> &'static str {
        match self {
            RateLimitScope::Global => "global",
            RateLimitScope::PerUser => "per_user",
            RateLimitScope::PerCommand => "per_command",
            RateLimitScope::PerIdentifier(_) => "per_identifier",
        }
    }
}

#[derive(Clone)]
pub enum RateLimitingStrategy {
    /// `capacity` tokens, refilled continuously at `refill_per_second`.
    TokenBucket {
        capacity: f64,
        refill_per_second: f64,
    },
    /// At most `max_events` within a rolling `window`.
    SlidingWindow { window: Duration, max_events: u32 },
    /// `base_rate` scaled by a caller-supplied load signal in `[0, 1]`;
    /// a signal of `1.0` allows the full `base_rate`, `0.0` allows none.
    Adaptive {
        base_rate: f64,
        load_signal: Arc<dyn Fn() -> f64 + Send + Sync>,
    },
}

/// A strategy is stateless configuration; per-identifier state (token
/// count, window counters) lives in [`RateLimiter`]'s bucket table, created
/// lazily the first time an identifier is seen.
#[derive(Clone)]
pub struct RateLimiterConfig {
    pub strategy: RateLimitingStrategy,
    pub scope: RateLimitScope,
}

impl RateLimiterConfig {
    pub fn new(strategy: RateLimitingStrategy, scope: RateLimitScope) -> Self {
        Self { strategy, scope }
    }
}

struct TokenBucketState {
    tokens: f64,
    last_refill: std::time::Instant,
}

struct SlidingWindowState {
    window_start: std::time::Instant,
    count: u32,
}

enum BucketState {
    TokenBucket(TokenBucketState),
    SlidingWindow(SlidingWindowState),
    Adaptive(TokenBucketState),
}

/// Number of lock-striped shards the identifier space is hashed across.
/// Fixed rather than sized to the caller's expected cardinality: the point
/// is to bound lock contention, not to pre-size storage.
const SHARD_COUNT: usize = 16;

fn shard_index(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

pub struct RateLimiter {
    strategy: RateLimitingStrategy,
    scope: RateLimitScope,
    clock: Arc<dyn Clock>,
    shards: Vec<spin::Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            strategy: config.strategy,
            scope: config.scope,
            clock,
            shards: (0..SHARD_COUNT)
                .map(|_| spin::Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    /// Returns `Ok(())` if the request is admitted, or `Err((remaining,
    /// reset_at))` describing when capacity is next available.
    fn check(&self, key: String) -> Result<(), (f64, Duration)> {
        let now = self.clock.now();
        let mut buckets = self.shards[shard_index(&key)].lock();
        match &self.strategy {
            RateLimitingStrategy::TokenBucket {
                capacity,
                refill_per_second,
            } => {
                let state = buckets.entry(key).or_insert_with(|| {
                    BucketState::TokenBucket(TokenBucketState {
                        tokens: *capacity,
                        last_refill: now,
                    })
                });
                let BucketState::TokenBucket(tb) = state else {
                    unreachable!("bucket kind fixed per limiter")
                };
                let elapsed = now.saturating_duration_since(tb.last_refill).as_secs_f64();
                tb.tokens = (tb.tokens + elapsed * refill_per_second).min(*capacity);
                tb.last_refill = now;
                if tb.tokens >= 1.0 {
                    tb.tokens -= 1.0;
                    Ok(())
                } else {
                    let deficit = 1.0 - tb.tokens;
                    let wait = Duration::from_secs_f64((deficit / refill_per_second).max(0.0));
                    Err((tb.tokens, wait))
                }
            }
            RateLimitingStrategy::SlidingWindow { window, max_events } => {
                let state = buckets.entry(key).or_insert_with(|| {
                    BucketState::SlidingWindow(SlidingWindowState {
                        window_start: now,
                        count: 0,
                    })
                });
                let BucketState::SlidingWindow(sw) = state else {
                    unreachable!("bucket kind fixed per limiter")
                };
                if now.saturating_duration_since(sw.window_start) >= *window {
                    sw.window_start = now;
                    sw.count = 0;
                }
                if sw.count < *max_events {
                    sw.count += 1;
                    Ok(())
                } else {
                    let reset_in = window.saturating_sub(now.saturating_duration_since(sw.window_start));
                    Err((0.0, reset_in))
                }
            }
            RateLimitingStrategy::Adaptive {
                base_rate,
                load_signal,
            } => {
                let effective_rate = base_rate * (1.0 - load_signal().clamp(0.0, 1.0));
                let capacity = effective_rate.max(1.0);
                let state = buckets.entry(key).or_insert_with(|| {
                    BucketState::Adaptive(TokenBucketState {
                        tokens: capacity,
                        last_refill: now,
                    })
                });
                let BucketState::Adaptive(tb) = state else {
                    unreachable!("bucket kind fixed per limiter")
                };
                let elapsed = now.saturating_duration_since(tb.last_refill).as_secs_f64();
                tb.tokens = (tb.tokens + elapsed * effective_rate).min(capacity);
                tb.last_refill = now;
                if tb.tokens >= 1.0 {
                    tb.tokens -= 1.0;
                    Ok(())
                } else {
                    let deficit = 1.0 - tb.tokens;
                    let wait = if effective_rate > 0.0 {
                        Duration::from_secs_f64(deficit / effective_rate)
                    } else {
                        Duration::from_secs(1)
                    };
                    Err((tb.tokens, wait))
                }
            }
        }
    }
}

#[async_trait]
impl<C: Command> Middleware<C> for RateLimiter {
    fn priority(&self) -> u32 {
        priority::RATE_LIMIT
    }

    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError> {
        let key = self.scope.key(&context, command.command_type());
        match self.check(key.clone()) {
            Ok(()) => next.call(command, context).await,
            Err((remaining, reset_in)) => {
                context.emit(
                    PipelineEvent::new(events::RATE_LIMIT_EXCEEDED)
                        .with_command_type(command.command_type())
                        .with_property("scope", self.scope.label())
                        .with_property("identifier", key.clone())
                        .with_property("remaining", remaining)
                        .with_property("reset_in_ms", reset_in.as_millis() as i64),
                );
                Err(PipelineError::new(
                    codes::RATE_LIMIT_EXCEEDED,
                    alloc::format!("rate limit exceeded, retry in {:?}", reset_in),
                ))
            }
        }
    }
}
