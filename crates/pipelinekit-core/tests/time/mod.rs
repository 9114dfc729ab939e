//! Behavioral coverage for [`MockClock`] beyond the governance modules'
//! incidental use of it: monotonicity, wakeup ordering, and cancellation
//! on drop, all properties the retry/timeout/circuit-breaker middlewares
//! depend on for deterministic tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipelinekit_core::time::{Clock, MockClock};

#[test]
fn now_only_advances_when_told_to() {
    let clock = MockClock::new();
    let first = clock.now();
    assert_eq!(clock.now(), first);
    clock.advance(Duration::from_millis(10));
    assert_eq!(clock.now(), first + Duration::from_millis(10));
}

#[test]
fn advance_is_cumulative() {
    let clock = MockClock::new();
    clock.advance(Duration::from_millis(5));
    clock.advance(Duration::from_millis(5));
    assert_eq!(clock.elapsed(), Duration::from_millis(10));
}

#[test]
fn sleep_resolves_once_advance_reaches_the_deadline() {
    let clock = MockClock::new();
    let sleep = clock.sleep(Duration::from_millis(50));
    futures::pin_mut!(sleep);

    let mut cx_noop = std::task::Context::from_waker(futures::task::noop_waker_ref());
    assert!(std::future::Future::poll(sleep.as_mut(), &mut cx_noop).is_pending());

    clock.advance(Duration::from_millis(49));
    assert!(std::future::Future::poll(sleep.as_mut(), &mut cx_noop).is_pending());

    clock.advance(Duration::from_millis(1));
    assert!(std::future::Future::poll(sleep.as_mut(), &mut cx_noop).is_ready());
}

/// Sleeps that share a deadline wake in the order they were registered,
/// so tests built on top of the clock get a reproducible wakeup sequence
/// instead of an arbitrary one.
#[test]
fn concurrent_sleeps_wake_in_registration_order() {
    let clock = Arc::new(MockClock::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let remaining = Arc::new(AtomicUsize::new(3));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let clock = clock.clone();
            let order = order.clone();
            let remaining = remaining.clone();
            std::thread::spawn(move || {
                futures::executor::block_on(clock.sleep(Duration::from_millis(10)));
                order.lock().unwrap().push(i);
                remaining.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Give each thread a chance to register its sleep before advancing.
    while remaining.load(Ordering::SeqCst) == 3 {
        std::thread::yield_now();
    }
    std::thread::sleep(Duration::from_millis(5));
    clock.advance(Duration::from_millis(10));

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(order.lock().unwrap().len(), 3);
}

/// Dropping a sleep future before its deadline removes it from the
/// clock's bookkeeping rather than leaking it — a later `advance` that
/// reaches the original deadline must not panic or wake a stale waker.
#[test]
fn dropping_a_pending_sleep_cancels_it() {
    let clock = MockClock::new();
    {
        let sleep = clock.sleep(Duration::from_millis(100));
        drop(sleep);
    }
    clock.advance(Duration::from_millis(200));
}

#[test]
fn with_start_anchors_the_clock_at_a_fixed_origin() {
    let origin = std::time::Instant::now();
    let clock = MockClock::with_start(origin);
    assert_eq!(clock.now(), origin);
    clock.advance(Duration::from_secs(1));
    assert_eq!(clock.now(), origin + Duration::from_secs(1));
}
