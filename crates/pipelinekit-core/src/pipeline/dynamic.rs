//! Dynamic pipeline (§4.F): middlewares may be registered or removed at
//! runtime. A mutation invalidates the compiled chain; the next `execute`
//! rebuilds it lazily and reuses the rebuilt closure until the next
//! mutation, so steady-state per-call ordering work stays zero.

use alloc::sync::Arc;
use core::time::Duration;

use crate::context::{Context, CurrentContext};
use crate::error::PipelineError;
use crate::observability::hub::{EventHub, PipelineEvent};
use crate::observability::keys::events;
use crate::pipeline::chain::{ChainBuilder, CompiledChain};
use crate::pipeline::command::{Command, Handler};
use crate::pipeline::middleware::Middleware;

struct Compiled<C: Command> {
    chain: CompiledChain<C>,
    /// Bumped on every `add_middleware`/`remove_middleware`; a cached
    /// compilation is stale once its `generation` no longer matches the
    /// builder's.
    generation: u64,
}

pub struct DynamicPipeline<C: Command> {
    handler: Arc<dyn Handler<C>>,
    builder: spin::Mutex<ChainBuilder<C>>,
    generation: core::sync::atomic::AtomicU64,
    compiled: spin::Mutex<Option<Compiled<C>>>,
    hub: Option<Arc<EventHub>>,
}

impl<C: Command> DynamicPipeline<C> {
    pub fn new(handler: Arc<dyn Handler<C>>, max_depth: usize) -> Self {
        Self {
            handler,
            builder: spin::Mutex::new(ChainBuilder::new(max_depth)),
            generation: core::sync::atomic::AtomicU64::new(0),
            compiled: spin::Mutex::new(None),
            hub: None,
        }
    }

    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware<C>>) -> Result<(), PipelineError> {
        self.builder.lock().add_middleware(middleware)?;
        self.generation
            .fetch_add(1, core::sync::atomic::Ordering::AcqRel);
        Ok(())
    }

    pub fn remove_middleware(&self, name: &str) -> usize {
        let removed = self.builder.lock().remove_middleware(name);
        if removed > 0 {
            self.generation
                .fetch_add(1, core::sync::atomic::Ordering::AcqRel);
        }
        removed
    }

    pub fn middleware_count(&self) -> usize {
        self.builder.lock().middleware_count()
    }

    fn compiled_chain(&self) -> CompiledChain<C> {
        let current_generation = self.generation.load(core::sync::atomic::Ordering::Acquire);
        let mut compiled = self.compiled.lock();
        if let Some(existing) = compiled.as_ref() {
            if existing.generation == current_generation {
                return existing.chain.clone();
            }
        }
        let chain = self.builder.lock().compile(self.handler.clone());
        *compiled = Some(Compiled {
            chain: chain.clone(),
            generation: current_generation,
        });
        chain
    }

    /// Same context lifecycle as [`crate::pipeline::standard::StandardPipeline::execute`],
    /// minus the concurrency slot (dynamic pipelines have no built-in
    /// `max_concurrency`; compose a bulkhead middleware for that instead).
    pub async fn execute(
        &self,
        command: Arc<C>,
        context: Option<Arc<Context>>,
    ) -> Result<C::Result, PipelineError> {
        let context = context.unwrap_or_else(|| Arc::new(Context::new(self.hub.as_ref())));
        let _guard = CurrentContext::enter(context.clone());
        let chain = self.compiled_chain();

        context.emit(
            PipelineEvent::new(events::PIPELINE_WILL_EXECUTE)
                .with_command_type(command.command_type())
                .with_property("pipeline_type", "dynamic"),
        );
        let started = std::time::Instant::now();

        let result = chain(command.clone(), context.clone()).await;
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
