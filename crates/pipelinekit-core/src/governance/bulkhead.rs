//! Bulkhead middleware (§4.G.3): isolates a partition of concurrent
//! executions on top of the same [`crate::concurrency::BackpressureSemaphore`]
//! every other concurrency control in this crate is built on, with one
//! semaphore per partition, allocated lazily on first use.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use async_trait::async_trait;
use core::time::Duration;

use crate::concurrency::{BackpressureSemaphore, OverflowStrategy, Priority, SemaphoreConfig};
use crate::context::Context;
use crate::error::{codes, PipelineError};
use crate::observability::hub::PipelineEvent;
use crate::observability::keys::events;
use crate::pipeline::command::Command;
use crate::pipeline::middleware::{priority, Middleware, Next};

/// How a bulkhead's partitions are derived from a request.
#[derive(Clone)]
pub enum BulkheadIsolation {
    /// One shared partition for all traffic.
    Global,
    /// One partition per key extracted from the context, e.g. a tenant id.
    Tagged(Arc<dyn Fn(&Context) -> String + Send + Sync>),
}

#[derive(Clone)]
pub struct BulkheadConfig {
    pub max_concurrency: usize,
    pub max_queue: usize,
    pub isolation: BulkheadIsolation,
}

impl BulkheadConfig {
    pub fn try_new(max_concurrency: usize, max_queue: usize) -> Result<Self, PipelineError> {
        if max_concurrency == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "bulkhead max_concurrency must be at least 1",
            ));
        }
        Ok(Self {
            max_concurrency,
            max_queue,
            isolation: BulkheadIsolation::Global,
        })
    }

    pub fn with_isolation(mut self, isolation: BulkheadIsolation) -> Self {
        self.isolation = isolation;
        self
    }
}

pub struct Bulkhead {
    config: BulkheadConfig,
    partitions: spin::Mutex<BTreeMap<String, Arc<BackpressureSemaphore>>>,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            partitions: spin::Mutex::new(BTreeMap::new()),
        }
    }

    fn partition_key(&self, context: &Context) -> String {
        match &self.config.isolation {
            BulkheadIsolation::Global => String::from("__global__"),
            BulkheadIsolation::Tagged(extractor) => extractor(context),
        }
    }

    fn semaphore_for(&self, key: &str) -> Arc<BackpressureSemaphore> {
        if let Some(semaphore) = self.partitions.lock().get(key) {
            return semaphore.clone();
        }
        let mut partitions = self.partitions.lock();
        partitions
            .entry(key.to_string())
            .or_insert_with(|| {
                let mut semaphore_config = SemaphoreConfig::try_new(self.config.max_concurrency)
                    .expect("max_concurrency already validated by BulkheadConfig::try_new");
                semaphore_config.max_outstanding =
                    Some(self.config.max_concurrency + self.config.max_queue);
                semaphore_config.strategy = OverflowStrategy::Suspend;
                Arc::new(BackpressureSemaphore::new(semaphore_config))
            })
            .clone()
    }
}

#[async_trait]
impl<C: Command> Middleware<C> for Bulkhead {
    fn priority(&self) -> u32 {
        priority::BULKHEAD
    }

    fn name(&self) -> &'static str {
        "bulkhead"
    }

    async fn execute(
        &self,
        command: Arc<C>,
        context: Arc<Context>,
        next: Next<C>,
    ) -> Result<C::Result, PipelineError> {
        let key = self.partition_key(&context);
        let semaphore = self.semaphore_for(&key);
        let acquired = match semaphore.acquire(Priority::Normal, 0, None, Duration::ZERO) {
            Ok(future) => future.await,
            Err(error) => Err(error),
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(_) => {
                context.emit(
                    PipelineEvent::new(events::BULKHEAD_FULL)
                        .with_command_type(command.command_type())
                        .with_property("partition", key.clone()),
                );
                return Err(PipelineError::new(
                    codes::BULKHEAD_FULL,
                    alloc::format!("bulkhead partition '{}' is full", key),
                ));
            }
        };
        let result = next.call(command, context).await;
        permit.release();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cmd;
    impl Command for Cmd {
        type Result = ();
        fn command_type(&self) -> &'static str {
            "Cmd"
        }
    }

    #[test]
    fn config_rejects_zero_concurrency() {
        assert!(BulkheadConfig::try_new(0, 0).is_err());
    }

    #[test]
    fn separate_partitions_get_independent_semaphores() {
        let bulkhead = Bulkhead::new(BulkheadConfig::try_new(1, 0).unwrap());
        let a = bulkhead.semaphore_for("a");
        let b = bulkhead.semaphore_for("b");
        let permit_a = a.try_acquire(0).unwrap();
        assert!(b.try_acquire(0).is_ok());
        assert!(a.try_acquire(0).is_err());
        drop(permit_a);
        assert!(a.try_acquire(0).is_ok());
    }
}
