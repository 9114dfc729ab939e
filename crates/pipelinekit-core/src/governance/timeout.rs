//! Timeout middleware (§4.G.4): races `next(cmd, ctx)` against a sleep for
//! `deadline`, cooperatively cancelling the inner task on timeout and
//! honoring an optional grace period plus context-carried deadline budget.
//!
//! No `futures::select!` here: the crate's only async-combinator dependency
//! is `futures` as a *dev*-dependency (tests/benches), so production code
//! hand-rolls the two-future race the teacher's own timeout profile uses,
//! just generalized from a soft/hard split to deadline-plus-grace.

use alloc::sync::Arc;
use async_trait::async_trait;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll};
use core::time::Duration;

use crate::context::{Context, DeadlineBudget};
use crate::error::{codes, PipelineError};
use crate::future::BoxFuture;
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::Command;
use crate::pipeline::middleware::{priority, Middleware, Next};
use crate::time::Clock;

#[derive(Clone, Copy, Debug)]
pub struct TimeoutConfig {
    pub deadline: Duration,
    pub grace: Duration,
}

impl TimeoutConfig {
    /// `grace` cannot exceed `deadline / 2` — a grace window longer than
    /// that would make the nominal deadline meaningless.
    pub fn try_new(deadline: Duration, grace: Duration) -> Result<Self, PipelineError> {
        if grace > deadline / 2 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "timeout grace must not exceed deadline / 2",
            ));
        }
        Ok(Self { deadline, grace })
    }
}

pub struct Timeout {
    config: TimeoutConfig,
    clock: Arc<dyn Clock>,
}

impl Timeout {
    pub fn new(config: TimeoutConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// The deadline actually in force: the context's remaining
    /// `DeadlineBudget` if one is present, otherwise the configured
    /// `deadline`.
    fn effective_deadline(&self, context: &Context) -> Duration {
        context
            .get::<DeadlineBudget>()
            .map(|budget| budget.0)
            .unwrap_or(self.config.deadline)
    }
}

#[async_trait]
impl<C: Command> Middleware<C> for Timeout {
    fn priority(&self) -> u32 {
        priority::TIMEOUT
    }

    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError> {
        let deadline = self.effective_deadline(&context);
        if deadline.is_zero() {
            return Err(PipelineError::new(
                codes::TIMEOUT,
                "deadline budget already exhausted",
            ));
        }

        let cancellation = context.cancellation();
        let started = self.clock.now();
        let command_type = command.command_type();
        let ctx_for_inner = context.clone();
        let inner: BoxFuture<'static, Result<C::Result, PipelineError>> =
            Box::pin(async move { next.call(command, ctx_for_inner).await });

        let grace_sleep = self.clock.sleep(deadline + self.config.grace);
        let race = Race::new(inner, grace_sleep);

        match race.await {
            RaceOutcome::Left(result) => {
                let elapsed = self.clock.now() - started;
                if elapsed > deadline {
                    context.emit(
                        PipelineEvent::new(events::TIMEOUT_EXCEEDED)
                            .with_command_type(command_type)
                            .with_duration(elapsed)
                            .with_property("within_grace", true)
                            .with_property("deadline_ms", deadline.as_millis() as i64),
                    );
                }
                if let Some(budget) = context.get::<DeadlineBudget>() {
                    let remaining = budget.0.saturating_sub(elapsed);
                    context.set(DeadlineBudget(remaining));
                }
                result
            }
            RaceOutcome::Right(()) => {
                cancellation.cancel();
                let elapsed = self.clock.now() - started;
                context.emit(
                    PipelineEvent::new(events::TIMEOUT_EXCEEDED)
                        .with_command_type(command_type)
                        .with_duration(elapsed)
                        .with_property("deadline_ms", deadline.as_millis() as i64),
                );
                if context.contains::<DeadlineBudget>() {
                    context.set(DeadlineBudget(Duration::ZERO));
                }
                Err(PipelineError::new(
                    codes::TIMEOUT,
                    alloc::format!("deadline of {:?} exceeded (elapsed {:?})", deadline, elapsed),
                ))
            }
        }
    }
}

enum RaceOutcome<L, R> {
    Left(L),
    Right(R),
}

/// Polls both futures on every wake until one resolves. Both sides are
/// already `Pin<Box<dyn Future>>`, so polling needs only `as_mut()` — no
/// `Unpin` bound on the erased future type is required.
struct Race<L: ?Sized, R: ?Sized> {
    left: Pin<Box<L>>,
    right: Pin<Box<R>>,
}

impl<L: ?Sized, R> Race<L, R>
where
    L: Future,
    R: Future,
{
    fn new(left: Pin<Box<L>>, right: Pin<Box<R>>) -> Self {
        Self { left, right }
    }
}

impl<L: ?Sized, R: ?Sized> Future for Race<L, R>
where
    L: Future,
    R: Future,
{
    type Output = RaceOutcome<L::Output, R::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = this.left.as_mut().poll(cx) {
            return Poll::Ready(RaceOutcome::Left(value));
        }
        if let Poll::Ready(value) = this.right.as_mut().poll(cx) {
            return Poll::Ready(RaceOutcome::Right(value));
        }
        Poll::Pending
    }
}
