//! Integration coverage for the middleware chain and the two pipeline
//! offerings, driven only through the crate's public API.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipelinekit_core::context::Context;
use pipelinekit_core::error::PipelineError;
use pipelinekit_core::observability::hub::EventHub;
use pipelinekit_core::pipeline::{
    Command, DynamicPipeline, Handler, Middleware, Next, StandardPipelineBuilder,
};

struct Probe;
impl Command for Probe {
    type Result = ();
    fn command_type(&self) -> &'static str {
        "Probe"
    }
}

struct NoopHandler;
#[async_trait]
impl Handler<Probe> for NoopHandler {
    async fn handle(&self, _command: &Arc<Probe>, _context: &Arc<Context>) -> Result<(), PipelineError> {
        Ok(())
    }
}

struct RecordingMiddleware {
    label: &'static str,
    priority: u32,
    order: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Middleware<Probe> for RecordingMiddleware {
    fn priority(&self) -> u32 {
        self.priority
    }

    async fn execute(
        &self,
        command: Arc<Probe>,
        context: Arc<Context>,
        next: Next<Probe>,
    ) -> Result<(), PipelineError> {
        self.order.lock().unwrap().push(self.label);
        next.call(command, context).await
    }
}

/// S1 — middlewares A(300), B(100), C(200) added in that order execute as
/// B, C, A: ascending priority, regardless of registration order.
#[test]
fn middlewares_execute_in_ascending_priority_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StandardPipelineBuilder::new(Arc::new(NoopHandler), 100)
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "A",
            priority: 300,
            order: order.clone(),
        }))
        .unwrap()
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "B",
            priority: 100,
            order: order.clone(),
        }))
        .unwrap()
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "C",
            priority: 200,
            order: order.clone(),
        }))
        .unwrap()
        .build()
        .unwrap();

    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["B", "C", "A"]);
}

#[test]
fn same_priority_ties_break_by_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StandardPipelineBuilder::new(Arc::new(NoopHandler), 100)
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "first",
            priority: 100,
            order: order.clone(),
        }))
        .unwrap()
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "second",
            priority: 100,
            order: order.clone(),
        }))
        .unwrap()
        .build()
        .unwrap();

    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

/// Each middleware's run is bracketed by `middleware.will_execute` and
/// either `middleware.did_execute` or `middleware.did_fail`, independent of
/// the pipeline-level `pipeline.*` events.
#[test]
fn chain_emits_middleware_lifecycle_events_around_each_middleware() {
    let hub = EventHub::new();
    let sub = hub.subscribe(Some("middleware.*"), 16);
    let order = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StandardPipelineBuilder::new(Arc::new(NoopHandler), 100)
        .with_hub(hub)
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "only",
            priority: 100,
            order: order.clone(),
        }))
        .unwrap()
        .build()
        .unwrap();

    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();

    let will = sub.try_recv().expect("will_execute");
    assert_eq!(will.name(), "middleware.will_execute");
    let did = sub.try_recv().expect("did_execute");
    assert_eq!(did.name(), "middleware.did_execute");
    assert!(sub.try_recv().is_none());
}

/// A middleware whose chain fails still gets a matching `did_fail`, not a
/// `did_execute`.
#[test]
fn chain_emits_did_fail_when_a_middleware_run_errors() {
    let hub = EventHub::new();
    let sub = hub.subscribe(Some("middleware.*"), 16);
    let pipeline = StandardPipelineBuilder::new(Arc::new(FailingHandler), 100)
        .with_hub(hub)
        .add_middleware(Arc::new(PassthroughMiddleware))
        .unwrap()
        .build()
        .unwrap();

    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap_err();

    sub.try_recv().expect("will_execute");
    let did = sub.try_recv().expect("did_fail");
    assert_eq!(did.name(), "middleware.did_fail");
}

struct FailingHandler;
#[async_trait]
impl Handler<Probe> for FailingHandler {
    async fn handle(&self, _command: &Arc<Probe>, _context: &Arc<Context>) -> Result<(), PipelineError> {
        Err(PipelineError::new(
            pipelinekit_core::error::codes::TIMEOUT,
            "downstream failed",
        ))
    }
}

struct PassthroughMiddleware;
#[async_trait]
impl Middleware<Probe> for PassthroughMiddleware {
    async fn execute(
        &self,
        command: Arc<Probe>,
        context: Arc<Context>,
        next: Next<Probe>,
    ) -> Result<(), PipelineError> {
        next.call(command, context).await
    }
}

struct RejectingMiddleware;
#[async_trait]
impl Middleware<Probe> for RejectingMiddleware {
    async fn execute(
        &self,
        command: Arc<Probe>,
        context: Arc<Context>,
        next: Next<Probe>,
    ) -> Result<(), PipelineError> {
        let first = next.call(command.clone(), context.clone()).await;
        assert!(first.is_ok());
        // A second call from a non-retry-capable middleware must be
        // rejected by the next-guard, not silently re-run the handler.
        let second = next.call(command, context).await;
        second
    }
}

#[test]
fn non_retry_capable_middleware_cannot_call_next_twice() {
    let pipeline = StandardPipelineBuilder::new(Arc::new(NoopHandler), 100)
        .add_middleware(Arc::new(RejectingMiddleware))
        .unwrap()
        .build()
        .unwrap();

    let err = futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap_err();
    assert_eq!(err.code(), pipelinekit_core::error::codes::NEXT_ALREADY_CALLED);
}

#[test]
fn dynamic_pipeline_reuses_compiled_chain_until_mutated() {
    let pipeline = DynamicPipeline::new(Arc::new(NoopHandler), 100);
    assert_eq!(pipeline.middleware_count(), 0);
    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    pipeline
        .add_middleware(Arc::new(RecordingMiddleware {
            label: "dyn",
            priority: 100,
            order: order.clone(),
        }))
        .unwrap();
    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["dyn"]);

    assert_eq!(
        pipeline.remove_middleware(core::any::type_name::<RecordingMiddleware>()),
        1
    );
    futures::executor::block_on(pipeline.execute(Arc::new(Probe), None)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["dyn"]);
}
