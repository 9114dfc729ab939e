//! Standard pipeline (§4.F): one compiled chain, one fixed handler,
//! optional `max_concurrency` — a thin wrapper over the backpressure
//! semaphore with `strategy = Error` and `max_outstanding = max_concurrency`.

use alloc::sync::Arc;
use core::time::Duration;

use crate::concurrency::{BackpressureSemaphore, OverflowStrategy, SemaphoreConfig};
use crate::context::{Context, CurrentContext};
use crate::error::PipelineError;
use crate::observability::hub::{EventHub, PipelineEvent};
use crate::observability::keys::events;
use crate::pipeline::chain::{ChainBuilder, CompiledChain};
use crate::pipeline::command::{Command, Handler};
use crate::pipeline::middleware::Middleware;

pub struct StandardPipeline<C: Command> {
    chain: CompiledChain<C>,
    semaphore: Option<BackpressureSemaphore>,
    hub: Option<Arc<EventHub>>,
}

/// Builds a [`StandardPipeline`] from a fixed handler and middleware set.
/// Mirrors `ChainBuilder`'s `add_middleware`/depth-cap contract, then
/// compiles exactly once.
pub struct StandardPipelineBuilder<C: Command> {
    chain_builder: ChainBuilder<C>,
    handler: Arc<dyn Handler<C>>,
    max_concurrency: Option<usize>,
    hub: Option<Arc<EventHub>>,
}

impl<C: Command> StandardPipelineBuilder<C> {
    pub fn new(handler: Arc<dyn Handler<C>>, max_depth: usize) -> Self {
        Self {
            chain_builder: ChainBuilder::new(max_depth),
            handler,
            max_concurrency: None,
            hub: None,
        }
    }

    pub fn add_middleware(
        mut self,
        middleware: Arc<dyn Middleware<C>>,
    ) -> Result<Self, PipelineError> {
        self.chain_builder.add_middleware(middleware)?;
        Ok(self)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn build(self) -> Result<StandardPipeline<C>, PipelineError> {
        let semaphore = match self.max_concurrency {
            Some(max_concurrency) => {
                let mut config = SemaphoreConfig::try_new(max_concurrency)?;
                config.max_outstanding = Some(max_concurrency);
                config.strategy = OverflowStrategy::Error;
                Some(BackpressureSemaphore::new(config))
            }
            None => None,
        };
        Ok(StandardPipeline {
            chain: self.chain_builder.compile(self.handler),
            semaphore,
            hub: self.hub,
        })
    }
}

impl<C: Command> StandardPipeline<C> {
    /// Runs `command` through the compiled chain.
    ///
    /// Context lifecycle (§4.F): uses `context` if supplied, else builds one
    /// with fresh metadata wired to this pipeline's hub; sets it as the
    /// task-local current context for the call's duration; acquires a
    /// concurrency slot first if one is configured; emits
    /// `pipeline.will_execute`/`did_execute`/`did_fail` around the run.
    pub async fn execute(
        &self,
        command: Arc<C>,
        context: Option<Arc<Context>>,
    ) -> Result<C::Result, PipelineError> {
        let context = context.unwrap_or_else(|| Arc::new(Context::new(self.hub.as_ref())));
        let _guard = CurrentContext::enter(context.clone());

        let _permit = match &self.semaphore {
            Some(semaphore) => Some(semaphore.try_acquire(0)?),
            None => None,
        };

        context.emit(
            PipelineEvent::new(events::PIPELINE_WILL_EXECUTE)
                .with_command_type(command.command_type())
                .with_property("pipeline_type", "standard"),
        );
        let started = std::time::Instant::now();

        let result = (self.chain)(command.clone(), context.clone()).await;
        let duration: Duration = started.elapsed();

        match &result {
            Ok(_) => {
                context.emit(
                    PipelineEvent::new(events::PIPELINE_DID_EXECUTE)
                        .with_command_type(command.command_type())
                        .with_duration(duration)
                        .with_property("success", true),
                );
            }
            Err(error) => {
                context.emit(
                    PipelineEvent::new(events::PIPELINE_DID_FAIL)
                        .with_command_type(command.command_type())
                        .with_duration(duration)
                        .with_error_class(error.code()),
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use async_trait::async_trait;

    struct Echo;
    impl Command for Echo {
        type Result = u32;
        fn command_type(&self) -> &'static str {
            "Echo"
        }
    }

    struct EchoHandler;
    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, _command: &Arc<Echo>, _context: &Arc<Context>) -> Result<u32, PipelineError> {
            Ok(42)
        }
    }

    #[test]
    fn executes_handler_with_no_middleware() {
        let pipeline = StandardPipelineBuilder::new(Arc::new(EchoHandler), 100)
            .build()
            .unwrap();
        let result = futures::executor::block_on(pipeline.execute(Arc::new(Echo), None)).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn max_concurrency_of_zero_is_rejected_at_build_time() {
        let err = StandardPipelineBuilder::new(Arc::new(EchoHandler), 100)
            .with_max_concurrency(0)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CONFIG);
    }

    #[test]
    fn exhausted_concurrency_fails_fast() {
        let pipeline = StandardPipelineBuilder::new(Arc::new(EchoHandler), 100)
            .with_max_concurrency(1)
            .build()
            .unwrap();
        let semaphore = pipeline.semaphore.as_ref().unwrap();
        let held = semaphore.try_acquire(0).unwrap();
        let err = futures::executor::block_on(pipeline.execute(Arc::new(Echo), None)).unwrap_err();
        assert_eq!(err.code(), codes::QUEUE_FULL);
        drop(held);
    }
}
