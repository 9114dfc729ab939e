//! Ordered middleware composition: registration, compilation into a cached
//! closure, and the depth cap.
//!
//! # Why
//! Per-execution ordering work must be zero — sorting happens once, at
//! registration-change time, not once per request. `ChainBuilder` owns the
//! registration list; `compile` folds it (handler innermost, lowest
//! priority outermost) into one boxed closure that every execution reuses.

use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::future::BoxFuture;
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::{Command, Handler};
use crate::pipeline::middleware::{priority, Middleware, Next};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// The cached, ready-to-run composition of middlewares plus handler.
pub type CompiledChain<C> = Arc<
    dyn Fn(Arc<C>, Arc<Context>) -> BoxFuture<'static, Result<<C as Command>::Result, PipelineError>>
        + Send
        + Sync,
>;

struct Registration<C: Command> {
    priority: u32,
    sequence: u64,
    middleware: Arc<dyn Middleware<C>>,
}

/// Builds a [`CompiledChain`] from a set of registered middlewares plus a
/// fixed handler. `add_middleware`/`remove_middleware` mutate the
/// registration list; `compile` does the ordering work, once.
pub struct ChainBuilder<C: Command> {
    registrations: Vec<Registration<C>>,
    next_sequence: u64,
    max_depth: usize,
}

impl<C: Command> ChainBuilder<C> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            registrations: Vec::new(),
            next_sequence: 0,
            max_depth,
        }
    }

    pub fn middleware_count(&self) -> usize {
        self.registrations.len()
    }

    /// Registers `middleware`. Fails with `MaxDepthExceeded` once the chain
    /// would exceed the configured depth cap — this guards against stack
    /// overflow from runaway recursive composition, not a performance
    /// tuning knob.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware<C>>) -> Result<(), PipelineError> {
        if self.registrations.len() >= self.max_depth {
            return Err(PipelineError::new(
                codes::MAX_DEPTH_EXCEEDED,
                alloc::format!("chain depth cap of {} reached", self.max_depth),
            ));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let mw_priority = middleware.priority();
        self.registrations.push(Registration {
            priority: mw_priority,
            sequence,
            middleware,
        });
        Ok(())
    }

    /// Removes every middleware whose `name()` equals `name`. Returns the
    /// number removed.
    pub fn remove_middleware(&mut self, name: &str) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.middleware.name() != name);
        before - self.registrations.len()
    }

    /// Sorts by ascending priority (ties broken by insertion order) and
    /// folds the handler plus every middleware into one boxed closure.
    pub fn compile(&self, handler: Arc<dyn Handler<C>>) -> CompiledChain<C> {
        let mut ordered: Vec<&Registration<C>> = self.registrations.iter().collect();
        ordered.sort_by_key(|r| (r.priority, r.sequence));

        let mut composed: CompiledChain<C> = Arc::new(move |command, context| {
            let handler = handler.clone();
            Box::pin(async move { handler.handle(&command, &context).await })
        });

        for registration in ordered.into_iter().rev() {
            let middleware = registration.middleware.clone();
            let priority = registration.priority;
            let retry_capable = middleware.is_retry_capable();
            let inner = composed;
            composed = Arc::new(move |command: Arc<C>, context: Arc<Context>| {
                let middleware = middleware.clone();
                let inner = inner.clone();
                Box::pin(async move {
                    let name = middleware.name();
                    context.emit(
                        PipelineEvent::new(events::MIDDLEWARE_WILL_EXECUTE)
                            .with_command_type(command.command_type())
                            .with_property("middleware", name)
                            .with_property("priority", priority as i64),
                    );
                    let started = std::time::Instant::now();
                    let next = Next::new(inner, retry_capable);
                    let result = middleware.execute(command.clone(), context.clone(), next).await;
                    let elapsed = started.elapsed();
                    match &result {
                        Ok(_) => {
                            context.emit(
                                PipelineEvent::new(events::MIDDLEWARE_DID_EXECUTE)
                                    .with_command_type(command.command_type())
                                    .with_duration(elapsed)
                                    .with_property("middleware", name),
                            );
                        }
                        Err(error) => {
                            context.emit(
                                PipelineEvent::new(events::MIDDLEWARE_DID_FAIL)
                                    .with_command_type(command.command_type())
                                    .with_duration(elapsed)
                                    .with_error_class(error.code())
                                    .with_property("middleware", name),
                            );
                        }
                    }
                    result
                })
            });
        }

        composed
    }
}

/// The priority a middleware with no explicit override is sorted at.
pub const fn default_priority() -> u32 {
    priority::DEFAULT
}
