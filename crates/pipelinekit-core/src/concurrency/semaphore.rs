//! Bounded concurrency with a bounded, priority-aware wait queue:
//! `try_acquire`/`acquire`/`release`, fair scheduling, cancellation and
//! timeout.
//!
//! # Why
//! Every layer that needs to bound concurrent work — the pipeline's own
//! `max_concurrency`, bulkhead partitions, (in spirit) the rate limiter —
//! is built on this one primitive instead of each reinventing a queue.
//!
//! # How
//! `available` is a signed counter: positive means free permits, zero or
//! negative means that many waiters are queued. The fast path is a CAS loop
//! decrementing a positive counter; a miss builds a [`Waiter`], pushes it
//! onto a priority min-heap keyed by `(Reverse(priority), enqueue_seq)` (so
//! higher priority wins, FIFO within a priority), and indexes it by id in a
//! side map for O(1) cancellation — the same per-waiter-state shape as
//! [`crate::time::clock::MockClock`]'s sleeper bookkeeping, generalized from
//! "woken by time" to "woken by release".

use alloc::collections::{BTreeMap, BinaryHeap};
use alloc::sync::Arc;
use core::cmp::Reverse;
use core::future::Future;
use core::pin::Pin;
#[cfg(not(any(loom, pipelinekit_loom)))]
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
#[cfg(any(loom, pipelinekit_loom))]
use loom::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use core::task::{Context as TaskContext, Poll, Waker};
use core::time::Duration;

use crate::error::{codes, PipelineError};

/// Relative urgency of a queued waiter. Higher always preempts lower among
/// ready waiters; no fairness is promised *across* priorities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// What happens to an acquire that would exceed `max_outstanding` or
/// `max_queue_memory_bytes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Block the caller if within caps (this is the non-overflow path);
    /// overflow itself still errors under `Suspend` once caps are hit.
    Suspend,
    /// Fail immediately rather than queue.
    DropNewest,
    /// Evict the lowest-priority, oldest queued waiter (resumed with
    /// `Evicted`) to make room for the new one.
    DropOldest,
    /// Fail immediately with an overload error.
    Error,
}

#[derive(Clone, Debug)]
pub struct SemaphoreConfig {
    pub max_concurrency: usize,
    pub max_outstanding: Option<usize>,
    pub max_queue_memory_bytes: Option<u64>,
    pub default_priority: Priority,
    pub strategy: OverflowStrategy,
    pub waiter_timeout: Option<Duration>,
    pub cleanup_interval: Duration,
}

impl SemaphoreConfig {
    pub fn try_new(max_concurrency: usize) -> Result<Self, PipelineError> {
        if max_concurrency == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "max_concurrency must be at least 1",
            ));
        }
        Ok(Self {
            max_concurrency,
            max_outstanding: None,
            max_queue_memory_bytes: None,
            default_priority: Priority::Normal,
            strategy: OverflowStrategy::Suspend,
            waiter_timeout: None,
            cleanup_interval: Duration::from_millis(250),
        })
    }
}

/// Terminal outcomes for a queued waiter. Exactly one fires per waiter,
/// ever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    Granted,
    Cancelled,
    TimedOut,
    Evicted,
    ShuttingDown,
}

struct WaiterState {
    id: u64,
    priority: Priority,
    enqueue_seq: u64,
    size_bytes: u64,
    deadline: Option<Duration>,
    resolution: spin::Mutex<Option<Resolution>>,
    waker: spin::Mutex<Option<Waker>>,
}

impl WaiterState {
    fn resolve(&self, resolution: Resolution) -> bool {
        let mut slot = self.resolution.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(resolution);
        drop(slot);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
        true
    }
}

/// Order waiters by `(Reverse(priority), enqueue_seq)`: `BinaryHeap` is a
/// max-heap, so wrapping priority in `Reverse` combined with a plain
/// (ascending) sequence makes the heap pop the *highest* priority, and
/// within a tie the *smallest* (earliest) sequence number — exactly the
/// "strict priority then FIFO" ordering the semaphore promises.
struct HeapEntry(Reverse<Priority>, Reverse<u64>, Arc<WaiterState>);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        // BinaryHeap pops the greatest; we want the entry with the lowest
        // Reverse(priority)/Reverse(seq) pair (i.e. highest priority, then
        // earliest sequence) to compare as *greatest*, so invert here too.
        other.0.cmp(&self.0).then_with(|| other.1.cmp(&self.1))
    }
}

/// A snapshot of the semaphore's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreStats {
    pub available_permits: i64,
    pub queued_waiters: usize,
    pub queued_bytes: u64,
    pub total_acquired: u64,
    pub total_released: u64,
}

/// The public right to occupy one concurrency slot. Dropping it without
/// calling `release` leaks the permit — callers should always release
/// (or use a scope guard) exactly once.
pub struct Permit {
    semaphore: Arc<BackpressureSemaphoreInner>,
    released: AtomicBool,
}

impl Permit {
    /// Releases the permit. Idempotent: a second call is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.release_one();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}

struct BackpressureSemaphoreInner {
    available: AtomicI64,
    config: SemaphoreConfig,
    waiters: spin::Mutex<WaiterBook>,
    next_waiter_id: AtomicU64,
    next_enqueue_seq: AtomicU64,
    queued_bytes: AtomicU64,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    shutting_down: AtomicBool,
}

struct WaiterBook {
    heap: BinaryHeap<HeapEntry>,
    index: BTreeMap<u64, Arc<WaiterState>>,
}

impl BackpressureSemaphoreInner {
    fn outstanding(&self) -> i64 {
        self.config.max_concurrency as i64 - self.available.load(Ordering::Acquire)
    }

    fn release_one(&self) {
        self.total_released.fetch_add(1, Ordering::Relaxed);
        loop {
            let next_waiter = {
                let mut book = self.waiters.lock();
                match book.heap.pop() {
                    None => None,
                    Some(HeapEntry(_, _, waiter)) => {
                        book.index.remove(&waiter.id);
                        Some(waiter)
                    }
                }
            };
            match next_waiter {
                None => {
                    self.available.fetch_add(1, Ordering::AcqRel);
                    return;
                }
                Some(waiter) => {
                    self.queued_bytes
                        .fetch_sub(waiter.size_bytes, Ordering::Relaxed);
                    if waiter.resolve(Resolution::Granted) {
                        self.total_acquired.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    // Already resolved (cancelled/timed out) by someone else
                    // between pop and resolve — try the next one instead of
                    // leaking the permit.
                    continue;
                }
            }
        }
    }

    fn try_take_permit(&self) -> bool {
        loop {
            let current = self.available.load(Ordering::Acquire);
            if current <= 0 {
                return false;
            }
            if self
                .available
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.total_acquired.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
    }

    fn cancel_waiter(&self, id: u64) -> bool {
        let waiter = {
            let mut book = self.waiters.lock();
            let found = book.index.remove(&id);
            if found.is_some() {
                book.heap.retain(|entry| entry.2.id != id);
            }
            found
        };
        match waiter {
            Some(waiter) => {
                self.queued_bytes
                    .fetch_sub(waiter.size_bytes, Ordering::Relaxed);
                waiter.resolve(Resolution::Cancelled)
            }
            None => false,
        }
    }

    /// Sweeps waiters whose deadline has passed. Should be invoked roughly
    /// every `cleanup_interval`. Uses the positive-sense comparison
    /// `now >= deadline` deliberately.
    fn sweep_timeouts(&self, now: Duration) {
        let expired: alloc::vec::Vec<Arc<WaiterState>> = {
            let mut book = self.waiters.lock();
            let mut expired = alloc::vec::Vec::new();
            let remaining: BinaryHeap<HeapEntry> = book
                .heap
                .drain()
                .filter_map(|entry| {
                    let is_expired = entry
                        .2
                        .deadline
                        .map(|deadline| now >= deadline)
                        .unwrap_or(false);
                    if is_expired {
                        book.index.remove(&entry.2.id);
                        expired.push(entry.2.clone());
                        None
                    } else {
                        Some(entry)
                    }
                })
                .collect();
            book.heap = remaining;
            expired
        };
        for waiter in expired {
            self.queued_bytes
                .fetch_sub(waiter.size_bytes, Ordering::Relaxed);
            waiter.resolve(Resolution::TimedOut);
        }
    }

    fn stats(&self) -> SemaphoreStats {
        let book = self.waiters.lock();
        SemaphoreStats {
            available_permits: self.available.load(Ordering::Acquire),
            queued_waiters: book.index.len(),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
        }
    }

    fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: alloc::vec::Vec<Arc<WaiterState>> = {
            let mut book = self.waiters.lock();
            let waiters: alloc::vec::Vec<_> = book.heap.drain().map(|e| e.2).collect();
            book.index.clear();
            waiters
        };
        for waiter in drained {
            waiter.resolve(Resolution::ShuttingDown);
        }
    }
}

/// Bounded concurrency + bounded wait queue with priority, timeout and
/// cancellation (§4.B of the execution core). Cheap to clone-share via the
/// inner `Arc`.
#[derive(Clone)]
pub struct BackpressureSemaphore {
    inner: Arc<BackpressureSemaphoreInner>,
}

impl BackpressureSemaphore {
    pub fn new(config: SemaphoreConfig) -> Self {
        let available = config.max_concurrency as i64;
        Self {
            inner: Arc::new(BackpressureSemaphoreInner {
                available: AtomicI64::new(available),
                config,
                waiters: spin::Mutex::new(WaiterBook {
                    heap: BinaryHeap::new(),
                    index: BTreeMap::new(),
                }),
                next_waiter_id: AtomicU64::new(0),
                next_enqueue_seq: AtomicU64::new(0),
                queued_bytes: AtomicU64::new(0),
                total_acquired: AtomicU64::new(0),
                total_released: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Non-blocking: returns a permit immediately if one is free, otherwise
    /// an overload error. Never queues.
    pub fn try_acquire(&self, size_bytes: u64) -> Result<Permit, PipelineError> {
        let _ = size_bytes;
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(PipelineError::new(codes::SHUTTING_DOWN, "semaphore is shutting down"));
        }
        if self.inner.try_take_permit() {
            Ok(Permit {
                semaphore: self.inner.clone(),
                released: AtomicBool::new(false),
            })
        } else {
            Err(PipelineError::new(codes::QUEUE_FULL, "no permits available"))
        }
    }

    /// Awaits a permit, honoring `priority`, `size_bytes` (for memory
    /// accounting) and an optional `now`-relative `deadline`.
    pub fn acquire(
        &self,
        priority: Priority,
        size_bytes: u64,
        deadline: Option<Duration>,
        now: Duration,
    ) -> Result<AcquireFuture, PipelineError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(PipelineError::new(codes::SHUTTING_DOWN, "semaphore is shutting down"));
        }

        if self.inner.try_take_permit() {
            return Ok(AcquireFuture::ready(Permit {
                semaphore: self.inner.clone(),
                released: AtomicBool::new(false),
            }));
        }

        if let Some(max_outstanding) = self.inner.config.max_outstanding {
            let pending = self.inner.waiters.lock().index.len() as i64;
            let outstanding = self.inner.outstanding().max(0) + pending;
            if outstanding >= max_outstanding as i64 {
                match self.inner.config.strategy {
                    OverflowStrategy::DropNewest | OverflowStrategy::Error | OverflowStrategy::Suspend => {
                        return Err(PipelineError::new(codes::QUEUE_FULL, "max_outstanding reached"));
                    }
                    OverflowStrategy::DropOldest => {
                        self.evict_lowest_priority_oldest();
                    }
                }
            }
        }

        if let Some(cap) = self.inner.config.max_queue_memory_bytes {
            if self.inner.queued_bytes.load(Ordering::Relaxed) + size_bytes > cap {
                match self.inner.config.strategy {
                    OverflowStrategy::DropNewest
                    | OverflowStrategy::Error
                    | OverflowStrategy::Suspend => {
                        return Err(PipelineError::new(
                            codes::MEMORY_LIMIT_EXCEEDED,
                            "max_queue_memory_bytes reached",
                        ));
                    }
                    OverflowStrategy::DropOldest => {
                        self.evict_lowest_priority_oldest();
                    }
                }
            }
        }

        let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let seq = self.inner.next_enqueue_seq.fetch_add(1, Ordering::Relaxed);
        let effective_deadline = deadline.map(|d| now + d);
        let waiter = Arc::new(WaiterState {
            id,
            priority,
            enqueue_seq: seq,
            size_bytes,
            deadline: effective_deadline,
            resolution: spin::Mutex::new(None),
            waker: spin::Mutex::new(None),
        });

        {
            let mut book = self.inner.waiters.lock();
            book.heap
                .push(HeapEntry(Reverse(priority), Reverse(seq), waiter.clone()));
            book.index.insert(id, waiter.clone());
        }
        self.inner
            .queued_bytes
            .fetch_add(size_bytes, Ordering::Relaxed);

        Ok(AcquireFuture::pending(self.inner.clone(), waiter))
    }

    fn evict_lowest_priority_oldest(&self) {
        let evicted = {
            let mut book = self.inner.waiters.lock();
            let mut rest: alloc::vec::Vec<HeapEntry> = book.heap.drain().collect();
            if rest.is_empty() {
                return;
            }
            // The heap's `Ord` makes the *best* candidate (highest priority,
            // earliest sequence) the max; the eviction target is the
            // opposite end: lowest priority, latest sequence.
            let mut worst_idx = 0;
            for (idx, entry) in rest.iter().enumerate().skip(1) {
                if entry.cmp(&rest[worst_idx]) == core::cmp::Ordering::Less {
                    worst_idx = idx;
                }
            }
            let worst = rest.swap_remove(worst_idx);
            book.index.remove(&worst.2.id);
            for entry in rest {
                book.heap.push(entry);
            }
            worst.2
        };
        self.inner
            .queued_bytes
            .fetch_sub(evicted.size_bytes, Ordering::Relaxed);
        evicted.resolve(Resolution::Evicted);
    }

    /// Cancels the specific waiter `id` — never any other waiter. A no-op
    /// if `id` is unknown or already resolved.
    pub fn cancel(&self, id: u64) {
        self.inner.cancel_waiter(id);
    }

    /// Sweeps timed-out waiters. Call roughly every `cleanup_interval`.
    pub fn sweep_timeouts(&self, now: Duration) {
        self.inner.sweep_timeouts(now);
    }

    pub fn stats(&self) -> SemaphoreStats {
        self.inner.stats()
    }

    /// Drains the queue, resuming every waiter with a shutdown error, and
    /// rejects subsequent acquires.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.inner.config
    }
}

enum AcquireState {
    Ready(Option<Permit>),
    Pending {
        semaphore: Arc<BackpressureSemaphoreInner>,
        waiter: Arc<WaiterState>,
    },
}

/// Future returned by [`BackpressureSemaphore::acquire`].
pub struct AcquireFuture {
    state: AcquireState,
    waiter_id: Option<u64>,
}

impl AcquireFuture {
    fn ready(permit: Permit) -> Self {
        Self {
            state: AcquireState::Ready(Some(permit)),
            waiter_id: None,
        }
    }

    fn pending(semaphore: Arc<BackpressureSemaphoreInner>, waiter: Arc<WaiterState>) -> Self {
        let id = waiter.id;
        Self {
            state: AcquireState::Pending { semaphore, waiter },
            waiter_id: Some(id),
        }
    }

    /// The stable id of the underlying waiter, usable with
    /// [`BackpressureSemaphore::cancel`]. `None` if the acquire resolved
    /// immediately and never queued.
    pub fn waiter_id(&self) -> Option<u64> {
        self.waiter_id
    }
}

impl Future for AcquireFuture {
    type Output = Result<Permit, PipelineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            AcquireState::Ready(permit) => Poll::Ready(Ok(permit
                .take()
                .expect("AcquireFuture::Ready polled after completion"))),
            AcquireState::Pending { semaphore, waiter } => {
                if let Some(resolution) = *waiter.resolution.lock() {
                    return Poll::Ready(match resolution {
                        Resolution::Granted => Ok(Permit {
                            semaphore: semaphore.clone(),
                            released: AtomicBool::new(false),
                        }),
                        Resolution::Cancelled => {
                            Err(PipelineError::new(codes::CANCELLED, "waiter cancelled"))
                        }
                        Resolution::TimedOut => {
                            Err(PipelineError::new(codes::ACQUIRE_TIMEOUT, "waiter deadline passed"))
                        }
                        Resolution::Evicted => {
                            Err(PipelineError::new(codes::QUEUE_FULL, "waiter evicted by a higher-priority arrival"))
                        }
                        Resolution::ShuttingDown => {
                            Err(PipelineError::new(codes::SHUTTING_DOWN, "semaphore shut down while waiting"))
                        }
                    });
                }
                let mut waker_slot = waiter.waker.lock();
                let needs_store = waker_slot
                    .as_ref()
                    .is_none_or(|existing| !existing.will_wake(cx.waker()));
                if needs_store {
                    *waker_slot = Some(cx.waker().clone());
                }
                drop(waker_slot);
                // Re-check after registering the waker to close the race
                // against a release that resolved us between the first
                // check and the store above.
                if let Some(resolution) = *waiter.resolution.lock() {
                    return Poll::Ready(match resolution {
                        Resolution::Granted => Ok(Permit {
                            semaphore: semaphore.clone(),
                            released: AtomicBool::new(false),
                        }),
                        Resolution::Cancelled => {
                            Err(PipelineError::new(codes::CANCELLED, "waiter cancelled"))
                        }
                        Resolution::TimedOut => {
                            Err(PipelineError::new(codes::ACQUIRE_TIMEOUT, "waiter deadline passed"))
                        }
                        Resolution::Evicted => {
                            Err(PipelineError::new(codes::QUEUE_FULL, "waiter evicted by a higher-priority arrival"))
                        }
                        Resolution::ShuttingDown => {
                            Err(PipelineError::new(codes::SHUTTING_DOWN, "semaphore shut down while waiting"))
                        }
                    });
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for AcquireFuture {
    fn drop(&mut self) {
        if let AcquireState::Pending { semaphore, waiter } = &self.state {
            if waiter.resolution.lock().is_none() {
                semaphore.cancel_waiter(waiter.id);
            }
        }
    }
}
