//! Circuit breaker middleware (§4.G.2, §3.8): a per-name `Closed` /
//! `Open{until}` / `HalfOpen{probes_remaining}` state machine driven by an
//! injectable [`Clock`] so tests are deterministic.
//!
//! Only compiles with the `std` feature: the `until`/`opened_at` deadlines
//! are `std::time::Instant`s, produced by [`Clock::now`].

use alloc::string::String;
use alloc::sync::Arc;
use async_trait::async_trait;
use core::time::Duration;
use std::time::Instant;

use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::Command;
use crate::pipeline::middleware::{priority, Middleware, Next};
use crate::time::Clock;

/// The finite machine described in §3.8. `Open`/`HalfOpen` carry the data
/// needed to decide the next transition without a second lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen { probes_remaining: u32 },
}

impl CircuitState {
    fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub name: Arc<str>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max: u32,
}

impl CircuitBreakerConfig {
    pub fn try_new(
        name: impl Into<Arc<str>>,
        failure_threshold: u32,
        success_threshold: u32,
        reset_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if failure_threshold == 0 || success_threshold == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "failure_threshold and success_threshold must be at least 1",
            ));
        }
        Ok(Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            reset_timeout,
            half_open_max: 1,
        })
    }

    pub fn with_half_open_max(mut self, half_open_max: u32) -> Self {
        self.half_open_max = half_open_max;
        self
    }
}

struct Counters {
    consecutive_failures: u32,
    consecutive_successes: u32,
}

/// Failures that count toward tripping the breaker are whatever this
/// predicate says; the default treats every handler/middleware error as a
/// failure. Configurable so callers can ignore e.g. validation errors that
/// should never open the circuit.
pub type FailurePredicate = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: spin::Mutex<CircuitState>,
    counters: spin::Mutex<Counters>,
    is_failure: FailurePredicate,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_failure_predicate(config, clock, Arc::new(|_: &PipelineError| true))
    }

    pub fn with_failure_predicate(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        is_failure: FailurePredicate,
    ) -> Self {
        Self {
            config,
            clock,
            state: spin::Mutex::new(CircuitState::Closed),
            counters: spin::Mutex::new(Counters {
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
            is_failure,
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    fn transition(&self, context: &Context, from: CircuitState, to: CircuitState) {
        *self.state.lock() = to;
        context.emit(
            PipelineEvent::new(events::CIRCUIT_BREAKER_STATE_CHANGED)
                .with_property("name", String::from(&*self.config.name))
                .with_property("from", from.label())
                .with_property("to", to.label()),
        );
    }

    fn open(&self, context: &Context, from: CircuitState) {
        self.reset_counters();
        let until = self.clock.now() + self.config.reset_timeout;
        self.transition(context, from, CircuitState::Open { until });
    }

    fn record_failure(&self, context: &Context) {
        let current = *self.state.lock();
        match current {
            CircuitState::HalfOpen { .. } => self.open(context, current),
            CircuitState::Closed => {
                let mut counters = self.counters.lock();
                counters.consecutive_failures += 1;
                counters.consecutive_successes = 0;
                let tripped = counters.consecutive_failures >= self.config.failure_threshold;
                drop(counters);
                if tripped {
                    self.open(context, current);
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn record_success(&self, context: &Context) {
        let current = *self.state.lock();
        match current {
            CircuitState::HalfOpen { .. } => {
                let mut counters = self.counters.lock();
                counters.consecutive_successes += 1;
                counters.consecutive_failures = 0;
                let recovered = counters.consecutive_successes >= self.config.success_threshold;
                drop(counters);
                if recovered {
                    self.reset_counters();
                    self.transition(context, current, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                self.counters.lock().consecutive_failures = 0;
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn reset_counters(&self) {
        let mut counters = self.counters.lock();
        counters.consecutive_failures = 0;
        counters.consecutive_successes = 0;
    }

    /// Checks whether an `Open` breaker's cool-down has elapsed and, if so,
    /// moves it to `HalfOpen`. Returns the (possibly updated) state.
    fn poll_open_expiry(&self, context: &Context) -> CircuitState {
        let current = *self.state.lock();
        if let CircuitState::Open { until } = current {
            if self.clock.now() >= until {
                let next = CircuitState::HalfOpen {
                    probes_remaining: self.config.half_open_max,
                };
                self.transition(context, current, next);
                return next;
            }
        }
        current
    }

    /// Claims one of a `HalfOpen` breaker's trial slots. Returns `false`
    /// (admitting nothing) if the breaker isn't `HalfOpen` or its probes are
    /// already exhausted, so concurrent callers during the trial window
    /// don't all reach the handler at once.
    fn try_consume_half_open_probe(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CircuitState::HalfOpen { probes_remaining } if probes_remaining > 0 => {
                *state = CircuitState::HalfOpen {
                    probes_remaining: probes_remaining - 1,
                };
                true
            }
            _ => false,
        }
    }

    /// Returns a probe slot claimed by [`Self::try_consume_half_open_probe`]
    /// once its call has completed. A no-op if the breaker already left
    /// `HalfOpen` (closed on success or reopened on failure) while the
    /// probe was in flight — only a breaker still `HalfOpen` has a slot to
    /// give back.
    fn release_half_open_probe(&self) {
        let mut state = self.state.lock();
        if let CircuitState::HalfOpen { probes_remaining } = *state {
            *state = CircuitState::HalfOpen {
                probes_remaining: (probes_remaining + 1).min(self.config.half_open_max),
            };
        }
    }
}

#[async_trait]
impl<C: Command> Middleware<C> for CircuitBreaker {
    fn priority(&self) -> u32 {
        priority::CIRCUIT_BREAKER
    }

    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError> {
        let state = self.poll_open_expiry(&context);
        if matches!(state, CircuitState::Open { .. }) {
            context.emit(
                PipelineEvent::new(events::CIRCUIT_BREAKER_STATE_CHANGED)
                    .with_property("name", String::from(&*self.config.name))
                    .with_property("from", "open")
                    .with_property("to", "open"),
            );
            return Err(PipelineError::new(
                codes::CIRCUIT_OPEN,
                alloc::format!("circuit '{}' is open", self.config.name),
            ));
        }

        let is_half_open_probe = matches!(state, CircuitState::HalfOpen { .. });
        if is_half_open_probe && !self.try_consume_half_open_probe() {
            context.emit(
                PipelineEvent::new(events::CIRCUIT_BREAKER_STATE_CHANGED)
                    .with_property("name", String::from(&*self.config.name))
                    .with_property("from", "half_open")
                    .with_property("to", "half_open"),
            );
            return Err(PipelineError::new(
                codes::CIRCUIT_OPEN,
                alloc::format!(
                    "circuit '{}' is half-open with no trial slots free",
                    self.config.name
                ),
            ));
        }

        let result = match next.call(command, context.clone()).await {
            Ok(value) => {
                self.record_success(&context);
                Ok(value)
            }
            Err(error) => {
                if (self.is_failure)(&error) {
                    self.record_failure(&context);
                }
                Err(error)
            }
        };
        if is_half_open_probe {
            self.release_half_open_probe();
        }
        result
    }
}
