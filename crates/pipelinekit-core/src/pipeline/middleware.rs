//! Middleware trait, canonical priorities, and the next-guard that enforces
//! the chain's single-invocation contract.

use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::future::BoxFuture;
use crate::pipeline::command::Command;
use alloc::sync::Arc;
use async_trait::async_trait;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Canonical priorities (§6.3): lower runs outer-most. `Handler` sits past
/// every declared middleware so it is always innermost.
pub mod priority {
    pub const RATE_LIMIT: u32 = 50;
    pub const CIRCUIT_BREAKER: u32 = 100;
    pub const BULKHEAD: u32 = 200;
    pub const TIMEOUT: u32 = 300;
    pub const RETRY: u32 = 400;
    pub const HANDLER: u32 = u32::MAX;

    /// Priority a middleware gets if it doesn't declare its own.
    pub const DEFAULT: u32 = 1_000;
}

/// An interceptor in the execution chain. `priority` decides ordering;
/// `is_retry_capable` opts out of the next-guard's single-invocation rule.
#[async_trait]
pub trait Middleware<C: Command>: Send + Sync + crate::sealed::Sealed {
    fn priority(&self) -> u32 {
        priority::DEFAULT
    }

    /// Stable name used in `middleware.*` events. Defaults to the Rust type
    /// name, which is good enough for ad-hoc middlewares in tests; named
    /// governance middlewares override this with a stable string.
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    /// Declares that this middleware may call `next` more than once
    /// sequentially (only [`crate::governance::retry::Retry`] does this).
    fn is_retry_capable(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError>;
}

type InnerFn<C> = Arc<
    dyn Fn(Arc<C>, Arc<Context>) -> BoxFuture<'static, Result<<C as Command>::Result, PipelineError>>
        + Send
        + Sync,
>;

struct NextGuardState {
    in_flight: AtomicBool,
    calls: AtomicU64,
    retry_capable: bool,
}

impl NextGuardState {
    fn new(retry_capable: bool) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            retry_capable,
        }
    }
}

struct ResetInFlight<'a>(&'a AtomicBool);

impl Drop for ResetInFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The continuation a middleware calls to run the rest of the chain.
/// Enforces: at most one invocation for a non-retry-capable middleware, and
/// no concurrent double-entry for any middleware (a second call while the
/// first is still outstanding always fails, retry-capable or not).
pub struct Next<C: Command> {
    inner: InnerFn<C>,
    state: Arc<NextGuardState>,
}

impl<C: Command> Next<C> {
    pub(crate) fn new(inner: InnerFn<C>, retry_capable: bool) -> Self {
        Self {
            inner,
            state: Arc::new(NextGuardState::new(retry_capable)),
        }
    }

    pub async fn call(&self, command: Arc<C>, context: Arc<Context>) -> Result<C::Result, PipelineError> {
        if self.state.in_flight.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::new(
                codes::NEXT_ALREADY_CALLED,
                "next invoked while a prior invocation is still outstanding",
            ));
        }
        let _reset = ResetInFlight(&self.state.in_flight);

        let prior_calls = self.state.calls.fetch_add(1, Ordering::AcqRel);
        if prior_calls > 0 && !self.state.retry_capable {
            return Err(PipelineError::new(
                codes::NEXT_ALREADY_CALLED,
                "next already called once by a non-retry-capable middleware",
            ));
        }

        (self.inner)(command, context).await
    }
}
