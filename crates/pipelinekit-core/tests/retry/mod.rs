//! Integration coverage for the retry middleware driven through a real
//! pipeline rather than calling `Retry::execute` directly, so the
//! next-guard's retry-capable exemption and the canonical middleware
//! ordering are exercised too.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipelinekit_core::context::Context;
use pipelinekit_core::error::{codes, PipelineError};
use pipelinekit_core::governance::{Backoff, Retry, RetryConfig};
use pipelinekit_core::observability::hub::{AttributeValue, EventHub};
use pipelinekit_core::pipeline::{Command, Handler, StandardPipelineBuilder};
use pipelinekit_core::time::{MockClock, SystemClock};

struct Flaky;
impl Command for Flaky {
    type Result = u32;
    fn command_type(&self) -> &'static str {
        "Flaky"
    }
}

/// Fails with a retryable error `fail_times` times, then succeeds.
struct FlakyHandler {
    calls: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl Handler<Flaky> for FlakyHandler {
    async fn handle(&self, _command: &Arc<Flaky>, _context: &Arc<Context>) -> Result<u32, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            Err(PipelineError::new(codes::TIMEOUT, "transient"))
        } else {
            Ok(call)
        }
    }
}

/// S2 — a handler that fails twice then succeeds is retried exactly twice
/// and the pipeline ultimately reports success, with the attempt count
/// visible to the handler.
#[test]
fn retry_recovers_after_transient_failures_within_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    // Fixed(ZERO) backoff: the retry loop never calls `clock.sleep`, so a
    // non-advancing MockClock cannot stall it.
    let clock = Arc::new(MockClock::new());
    let retry = Retry::new(
        RetryConfig::try_new(5, Backoff::Fixed(Duration::ZERO)).unwrap(),
        clock,
    );

    let pipeline = StandardPipelineBuilder::new(
        Arc::new(FlakyHandler {
            calls: calls.clone(),
            fail_times: 2,
        }),
        100,
    )
    .add_middleware(Arc::new(retry))
    .unwrap()
    .build()
    .unwrap();

    let result = futures::executor::block_on(pipeline.execute(Arc::new(Flaky), None)).unwrap();
    assert_eq!(result, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Each retry emits `middleware.retry` with the attempt number about to be
/// made — the initial call is attempt 1, so a handler failing on calls 1
/// and 2 before succeeding on call 3 emits `attempt` 2 then 3.
#[test]
fn retry_events_carry_the_upcoming_attempt_number() {
    let hub = EventHub::new();
    let sub = hub.subscribe(Some("middleware.retry"), 8);
    let calls = Arc::new(AtomicU32::new(0));
    let clock = Arc::new(MockClock::new());
    let retry = Retry::new(
        RetryConfig::try_new(5, Backoff::Fixed(Duration::ZERO)).unwrap(),
        clock,
    );

    let pipeline = StandardPipelineBuilder::new(
        Arc::new(FlakyHandler {
            calls: calls.clone(),
            fail_times: 2,
        }),
        100,
    )
    .with_hub(hub)
    .add_middleware(Arc::new(retry))
    .unwrap()
    .build()
    .unwrap();

    futures::executor::block_on(pipeline.execute(Arc::new(Flaky), None)).unwrap();

    let attempts: Vec<i64> = std::iter::from_fn(|| sub.try_recv())
        .map(|event| {
            event
                .properties()
                .iter()
                .find(|(key, _)| key.as_ref() == "attempt")
                .map(|(_, value)| match value {
                    AttributeValue::Int(n) => *n,
                    other => panic!("expected an int attempt, got {other:?}"),
                })
                .expect("attempt property present")
        })
        .collect();
    assert_eq!(attempts, vec![2, 3]);
}

/// A handler that always fails with a retryable error exhausts
/// `max_attempts` and the original error code surfaces unchanged — no
/// separate "retries exhausted" wrapper error replaces it.
#[test]
fn retry_gives_up_after_max_attempts_and_surfaces_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let clock = Arc::new(MockClock::new());
    let retry = Retry::new(
        RetryConfig::try_new(3, Backoff::Fixed(Duration::ZERO)).unwrap(),
        clock,
    );

    let pipeline = StandardPipelineBuilder::new(
        Arc::new(FlakyHandler {
            calls: calls.clone(),
            fail_times: u32::MAX,
        }),
        100,
    )
    .add_middleware(Arc::new(retry))
    .unwrap()
    .build()
    .unwrap();

    let err = futures::executor::block_on(pipeline.execute(Arc::new(Flaky), None)).unwrap_err();
    assert_eq!(err.code(), codes::TIMEOUT);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// A non-retryable error (one the default predicate rejects) is returned
/// on the first failure without any further attempts.
#[test]
fn non_retryable_error_is_not_retried() {
    struct AlwaysInvalid;
    #[async_trait]
    impl Handler<Flaky> for AlwaysInvalid {
        async fn handle(&self, _command: &Arc<Flaky>, _context: &Arc<Context>) -> Result<u32, PipelineError> {
            Err(PipelineError::new(codes::INVALID_CONFIG, "not retryable"))
        }
    }

    let clock = Arc::new(MockClock::new());
    let retry = Retry::new(
        RetryConfig::try_new(5, Backoff::Fixed(Duration::ZERO)).unwrap(),
        clock,
    );
    let pipeline = StandardPipelineBuilder::new(Arc::new(AlwaysInvalid), 100)
        .add_middleware(Arc::new(retry))
        .unwrap()
        .build()
        .unwrap();

    let err = futures::executor::block_on(pipeline.execute(Arc::new(Flaky), None)).unwrap_err();
    assert_eq!(err.code(), codes::INVALID_CONFIG);
}

struct SlowFlakyHandler {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler<Flaky> for SlowFlakyHandler {
    async fn handle(&self, _command: &Arc<Flaky>, _context: &Arc<Context>) -> Result<u32, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        Err(PipelineError::new(codes::TIMEOUT, "transient"))
    }
}

/// A `max_total_time` budget cuts retries short even if attempts remain,
/// once the configured total elapsed (measured via the real clock, since
/// the budget is consumed by handler work rather than backoff sleeps)
/// exceeds it.
#[test]
fn max_total_time_budget_stops_retries_even_with_attempts_remaining() {
    let calls = Arc::new(AtomicU32::new(0));
    let retry = Retry::new(
        RetryConfig::try_new(10, Backoff::Fixed(Duration::ZERO))
            .unwrap()
            .with_max_total_time(Duration::from_millis(15)),
        Arc::new(SystemClock),
    );

    let pipeline = StandardPipelineBuilder::new(Arc::new(SlowFlakyHandler { calls: calls.clone() }), 100)
        .add_middleware(Arc::new(retry))
        .unwrap()
        .build()
        .unwrap();

    let err = futures::executor::block_on(pipeline.execute(Arc::new(Flaky), None)).unwrap_err();
    assert_eq!(err.code(), codes::TIMEOUT);
    // Each call costs 20ms against a 15ms total budget, so the loop must
    // stop well short of the configured `max_attempts = 10`.
    assert!(calls.load(Ordering::SeqCst) < 10);
}
