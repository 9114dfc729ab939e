// This module only compiles with the `std` feature enabled: the default
// `Clock` implementation needs `std::time::Instant`, OS thread scheduling
// and `Waker` plumbing to drive sleeping futures, none of which are
// available in a `no_std + alloc` build.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use alloc::vec::Vec;

/// Unified delayed-future type returned by [`Clock::sleep`].
///
/// Expressed as `Pin<Box<dyn Future>>` so no specific async runtime leaks
/// into the public API, and so tests can substitute their own driver.
/// Must be `Send + 'static` to survive being polled from any task.
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// An injectable source of "now" and "wait until".
///
/// Retry backoff, timeout deadlines and circuit breaker cool-downs all
/// depend on a time source; calling the system clock directly would make
/// those paths nondeterministic in tests. Implementations must guarantee
/// `now` is monotonically non-decreasing and that `sleep` never resolves
/// before the requested duration has elapsed.
///
/// Pass `Arc<dyn Clock>` into anything that needs to wait. Use
/// [`SystemClock`] in production and [`MockClock`] in tests, advancing it
/// explicitly with `advance`.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic time point.
    fn now(&self) -> Instant;

    /// A future that resolves once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// System clock backed only by the standard library.
///
/// Deliberately avoids depending on a specific async runtime for its timer:
/// `sleep` spawns a helper thread that blocks for the requested duration
/// and wakes the future on completion. Callers on a hot, high-frequency
/// path should inject a runtime-specific [`Clock`] instead.
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(ThreadSleep::new(duration))
    }
}

/// Thread-driven sleep future: spawns a helper thread on construction,
/// which blocks then flips a completion flag and wakes the registered
/// waker. Acceptable for low-frequency control-plane waits (retry backoff,
/// admin tasks); high-frequency callers should inject a timer-wheel based
/// [`Clock`] instead.
struct ThreadSleep {
    state: Arc<ThreadSleepState>,
}

impl ThreadSleep {
    fn new(duration: Duration) -> Self {
        Self {
            state: ThreadSleepState::spawn(duration),
        }
    }
}

impl Future for ThreadSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state.is_completed() {
            Poll::Ready(())
        } else {
            self.state.register_waker(cx.waker());
            if self.state.is_completed() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }
    }
}

struct ThreadSleepState {
    completed: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl ThreadSleepState {
    fn spawn(duration: Duration) -> Arc<Self> {
        let state = Arc::new(Self {
            completed: AtomicBool::new(false),
            waker: Mutex::new(None),
        });
        let thread_state = Arc::clone(&state);
        thread::spawn(move || {
            thread::sleep(duration);
            thread_state.finish();
        });
        state
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn register_waker(&self, waker: &Waker) {
        let mut slot = self.waker.lock().expect("thread-sleep waker lock poisoned");
        *slot = Some(waker.clone());
    }

    fn finish(&self) {
        self.completed.store(true, Ordering::Release);
        let maybe_waker = self
            .waker
            .lock()
            .expect("thread-sleep waker lock poisoned")
            .take();
        if let Some(waker) = maybe_waker {
            waker.wake();
        }
    }
}

/// Virtual clock: time only moves when [`MockClock::advance`] is called,
/// so retry/timeout/circuit-breaker tests get a fully reproducible wakeup
/// sequence instead of racing the wall clock. `advance` wakes every sleep
/// future whose deadline has passed, in registration order; dropping a
/// sleep future before it resolves cancels and removes it.
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<MockClockInner>,
}

impl MockClock {
    /// Creates a virtual clock anchored at the current wall-clock instant.
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// Creates a virtual clock anchored at `origin`, for tests that need a
    /// fixed starting point.
    pub fn with_start(origin: Instant) -> Self {
        let state = ClockState {
            origin,
            elapsed: Duration::from_secs(0),
            sleepers: Vec::new(),
            next_id: 0,
        };
        Self {
            inner: Arc::new(MockClockInner {
                state: Mutex::new(state),
            }),
        }
    }

    /// Advances virtual time by `delta`. Every sleep future whose deadline
    /// has now passed is woken before this call returns, in the order the
    /// sleeps were registered, so a test's wakeup sequence is reproducible.
    pub fn advance(&self, delta: Duration) {
        if delta.is_zero() {
            return;
        }

        let mut to_wake = Vec::new();
        let mut guard = self
            .inner
            .state
            .lock()
            .expect("mock-clock state lock poisoned");
        guard.elapsed = guard.elapsed.saturating_add(delta);
        let elapsed = guard.elapsed;
        guard.sleepers.retain(|entry| {
            if entry.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            if elapsed >= entry.deadline {
                entry.completed.store(true, Ordering::SeqCst);
                if let Some(waker) = entry.take_waker() {
                    to_wake.push(waker);
                }
                false
            } else {
                true
            }
        });
        drop(guard);

        for waker in to_wake {
            waker.wake();
        }
    }

    /// Virtual time elapsed since the clock's origin.
    pub fn elapsed(&self) -> Duration {
        self.inner
            .state
            .lock()
            .expect("mock-clock state lock poisoned")
            .elapsed
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let guard = self
            .inner
            .state
            .lock()
            .expect("mock-clock state lock poisoned");
        guard.origin + guard.elapsed
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let state = {
            let mut guard = self
                .inner
                .state
                .lock()
                .expect("mock-clock state lock poisoned");
            let deadline = guard.elapsed.saturating_add(duration);
            let id = guard.next_id;
            guard.next_id += 1;
            let state = Arc::new(SleepState::new(id, deadline));
            guard.sleepers.push(Arc::clone(&state));
            state
        };

        Box::pin(MockSleep {
            inner: Arc::clone(&self.inner),
            state,
        })
    }
}

#[derive(Debug)]
struct MockClockInner {
    state: Mutex<ClockState>,
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    elapsed: Duration,
    sleepers: Vec<Arc<SleepState>>,
    next_id: usize,
}

#[derive(Debug)]
struct SleepState {
    id: usize,
    deadline: Duration,
    waker: Mutex<Option<Waker>>,
    completed: AtomicBool,
    cancelled: AtomicBool,
}

impl SleepState {
    fn new(id: usize, deadline: Duration) -> Self {
        Self {
            id,
            deadline,
            waker: Mutex::new(None),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    fn take_waker(&self) -> Option<Waker> {
        self.waker.lock().expect("sleep-state waker lock").take()
    }

    fn store_waker(&self, waker: &Waker) {
        let mut guard = self.waker.lock().expect("sleep-state waker lock");
        if guard
            .as_ref()
            .is_some_and(|existing| existing.will_wake(waker))
        {
            return;
        }
        *guard = Some(waker.clone());
    }
}

struct MockSleep {
    inner: Arc<MockClockInner>,
    state: Arc<SleepState>,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state.cancelled.load(Ordering::SeqCst)
            || self.state.completed.load(Ordering::SeqCst)
        {
            return Poll::Ready(());
        }

        let elapsed = self
            .inner
            .state
            .lock()
            .expect("mock-clock state lock poisoned")
            .elapsed;

        if elapsed >= self.state.deadline {
            self.state.completed.store(true, Ordering::SeqCst);
            return Poll::Ready(());
        }

        self.state.store_waker(cx.waker());
        Poll::Pending
    }
}

impl Drop for MockSleep {
    fn drop(&mut self) {
        if !self.state.completed.load(Ordering::SeqCst) {
            self.state.cancelled.store(true, Ordering::SeqCst);
            self.state.take_waker();
            if let Ok(mut guard) = self.inner.state.lock() {
                guard.sleepers.retain(|entry| entry.id != self.state.id);
            }
        }
    }
}
