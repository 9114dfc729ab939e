//! Typed metrics: counters, gauges, timers and histograms, each backed by a
//! bounded accumulator (never an unbounded raw-sample vector), plus a
//! cardinality cap and a bridge that turns canonical events into canonical
//! metrics.
//!
//! # Why
//! Mirrors the teacher's `Counter`/`Gauge` split (re-exported from
//! `spark_core::observability`), backed here by atomics the same way
//! `kernel::types`' budget counters are, rather than behind a full lock for
//! every increment.

use alloc::borrow::ToOwned;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use crate::observability::hub::{AttributeValue, EventHub, PipelineEvent, Subscriber};
use crate::observability::keys::metrics as metric_names;

/// A small, ordered tag set. Kept as a sorted `Vec` rather than a `HashMap`
/// since tag sets are small (a handful of entries) and need a stable key
/// for the registry's lookup table.
pub type Tags = Vec<(String, String)>;

fn tags_key(tags: &Tags) -> String {
    let mut sorted = tags.clone();
    sorted.sort();
    let mut key = String::new();
    for (k, v) in &sorted {
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push(';');
    }
    key
}

/// Monotonically increasing count.
pub struct Counter {
    value: AtomicU64,
    window_start: spin::Mutex<std::time::Instant>,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            window_start: spin::Mutex::new(std::time::Instant::now()),
        }
    }

    pub fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn decrement(&self, n: u64) {
        self.value.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn get_and_reset(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }

    /// Average per-second rate since the last call to `rate` (or since
    /// construction), without retaining individual samples.
    pub fn rate(&self, _window: Duration) -> f64 {
        let mut start = self.window_start.lock();
        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let count = self.get_and_reset();
        *start = std::time::Instant::now();
        count as f64 / elapsed
    }
}

/// Absolute latest value.
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set(&self, v: f64) {
        self.bits.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn adjust(&self, delta: f64) {
        loop {
            let current = self.bits.load(Ordering::Relaxed);
            let next = (f64::from_bits(current) + delta).to_bits();
            if self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn compare_and_set(&self, expected: f64, new: f64) -> bool {
        self.bits
            .compare_exchange(
                expected.to_bits(),
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    pub fn get_and_set(&self, v: f64) -> f64 {
        f64::from_bits(self.bits.swap(v.to_bits(), Ordering::Relaxed))
    }
}

/// How `Histogram::observe` assigns a value to a bucket.
#[derive(Clone, Debug)]
pub enum BucketingPolicy {
    Linear { start: f64, width: f64, count: usize },
    Exponential { start: f64, factor: f64, count: usize },
    Logarithmic { base: f64, count: usize },
    Explicit(Vec<f64>),
}

impl BucketingPolicy {
    fn bounds(&self) -> Vec<f64> {
        match self {
            BucketingPolicy::Linear {
                start,
                width,
                count,
            } => (0..*count).map(|i| start + width * i as f64).collect(),
            BucketingPolicy::Exponential {
                start,
                factor,
                count,
            } => (0..*count)
                .map(|i| start * factor.powi(i as i32))
                .collect(),
            BucketingPolicy::Logarithmic { base, count } => {
                (0..*count).map(|i| base.powi(i as i32)).collect()
            }
            BucketingPolicy::Explicit(bounds) => bounds.clone(),
        }
    }
}

struct HistogramState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    bucket_counts: Vec<u64>,
    bucket_bounds: Vec<f64>,
}

impl HistogramState {
    fn new(policy: &BucketingPolicy) -> Self {
        let bounds = policy.bounds();
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.0,
            bucket_counts: alloc::vec![0; bounds.len() + 1],
            bucket_bounds: bounds,
        }
    }

    fn observe(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.last = v;
        let idx = self
            .bucket_bounds
            .iter()
            .position(|bound| v <= *bound)
            .unwrap_or(self.bucket_bounds.len());
        self.bucket_counts[idx] += 1;
    }
}

/// Bounded-statistics distribution tracker: count/sum/min/max/last plus
/// fixed bucket counts — never an unbounded list of raw samples.
pub struct Histogram {
    state: spin::Mutex<HistogramState>,
}

impl Histogram {
    fn new(policy: BucketingPolicy) -> Self {
        Self {
            state: spin::Mutex::new(HistogramState::new(&policy)),
        }
    }

    pub fn observe(&self, v: f64) {
        self.state.lock().observe(v);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        HistogramSnapshot {
            count: state.count,
            sum: state.sum,
            min: if state.count == 0 { 0.0 } else { state.min },
            max: if state.count == 0 { 0.0 } else { state.max },
            last: state.last,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

/// Duration-specialized histogram.
pub struct Timer {
    histogram: Histogram,
}

impl Timer {
    fn new() -> Self {
        Self {
            histogram: Histogram::new(BucketingPolicy::Exponential {
                start: 0.001,
                factor: 2.0,
                count: 20,
            }),
        }
    }

    pub fn observe(&self, duration: Duration) {
        self.histogram.observe(duration.as_secs_f64());
    }

    /// Times `f`, records the elapsed duration, and returns `f`'s result.
    pub fn measure<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed());
        result
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        self.histogram.snapshot()
    }
}

enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Timer(Arc<Timer>),
    Histogram(Arc<Histogram>),
}

/// Central registry: factories for each metric kind, a per-name cardinality
/// cap, and an optional bridge subscribing to an [`EventHub`] to translate
/// canonical events into canonical metrics.
pub struct MetricsRegistry {
    metrics: spin::Mutex<BTreeMap<(String, String), Metric>>,
    known_tag_sets: spin::Mutex<BTreeMap<String, alloc::collections::BTreeSet<String>>>,
    cardinality_cap: usize,
    cardinality_dropped: Counter,
}

impl MetricsRegistry {
    pub fn new(cardinality_cap: usize) -> Arc<Self> {
        Arc::new(Self {
            metrics: spin::Mutex::new(BTreeMap::new()),
            known_tag_sets: spin::Mutex::new(BTreeMap::new()),
            cardinality_cap,
            cardinality_dropped: Counter::new(),
        })
    }

    /// Returns `false` (and increments `cardinality.dropped`) when `name`
    /// has already reached its distinct-tag-set cap and `tags` is new.
    fn admit(&self, name: &str, key: &str) -> bool {
        let mut known = self.known_tag_sets.lock();
        let set = known.entry(name.to_owned()).or_default();
        if set.contains(key) {
            return true;
        }
        if set.len() >= self.cardinality_cap {
            self.cardinality_dropped.increment(1);
            return false;
        }
        set.insert(key.to_owned());
        true
    }

    pub fn cardinality_dropped(&self) -> u64 {
        self.cardinality_dropped.get()
    }

    pub fn counter(&self, name: &str, tags: Tags) -> Option<Arc<Counter>> {
        let key = tags_key(&tags);
        if !self.admit(name, &key) {
            return None;
        }
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry((name.to_owned(), key))
            .or_insert_with(|| Metric::Counter(Arc::new(Counter::new())));
        match entry {
            Metric::Counter(c) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str, tags: Tags) -> Option<Arc<Gauge>> {
        let key = tags_key(&tags);
        if !self.admit(name, &key) {
            return None;
        }
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry((name.to_owned(), key))
            .or_insert_with(|| Metric::Gauge(Arc::new(Gauge::new())));
        match entry {
            Metric::Gauge(g) => Some(g.clone()),
            _ => None,
        }
    }

    pub fn timer(&self, name: &str, tags: Tags) -> Option<Arc<Timer>> {
        let key = tags_key(&tags);
        if !self.admit(name, &key) {
            return None;
        }
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry((name.to_owned(), key))
            .or_insert_with(|| Metric::Timer(Arc::new(Timer::new())));
        match entry {
            Metric::Timer(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn histogram(&self, name: &str, tags: Tags, policy: BucketingPolicy) -> Option<Arc<Histogram>> {
        let key = tags_key(&tags);
        if !self.admit(name, &key) {
            return None;
        }
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry((name.to_owned(), key))
            .or_insert_with(|| Metric::Histogram(Arc::new(Histogram::new(policy))));
        match entry {
            Metric::Histogram(h) => Some(h.clone()),
            _ => None,
        }
    }

    /// Subscribes to `hub` and, for every canonical event, updates the
    /// matching canonical metric. Returns the subscriber so the caller
    /// controls its lifetime (and can drop it to stop bridging).
    pub fn bridge(self: &Arc<Self>, hub: &Arc<EventHub>) -> Subscriber {
        hub.subscribe(None::<&str>, 1024)
    }

    /// Drains `subscriber` and applies every buffered event to its
    /// canonical metric, then records the subscriber's own overflow count
    /// (see [`Self::record_subscriber_overflow`]). Call this periodically
    /// (e.g. from a background task) to keep the bridge's queue from
    /// filling.
    pub fn drain_bridge(&self, subscriber: &Subscriber) {
        while let Some(event) = subscriber.try_recv() {
            self.apply_event(&event);
        }
        self.record_subscriber_overflow(Vec::new(), subscriber);
    }

    /// Publishes an [`EventHub`] subscriber's dropped-event count as
    /// [`metric_names::SUBSCRIBER_OVERFLOW`]. Unlike the counters `apply_event`
    /// updates incrementally from individual events, this is a gauge snapshot
    /// of [`Subscriber::overflow_count`], which is itself already a running
    /// total.
    pub fn record_subscriber_overflow(&self, tags: Tags, subscriber: &Subscriber) {
        if let Some(g) = self.gauge(metric_names::SUBSCRIBER_OVERFLOW, tags) {
            g.set(subscriber.overflow_count() as f64);
        }
    }

    /// Publishes a [`crate::concurrency::semaphore::BackpressureSemaphore`]'s
    /// queue depth and queued-byte total as
    /// [`metric_names::SEMAPHORE_QUEUE_DEPTH`] /
    /// [`metric_names::SEMAPHORE_QUEUE_BYTES`]. Call this periodically (e.g.
    /// alongside [`Self::drain_bridge`]) for every semaphore whose queue
    /// depth should be observable.
    pub fn record_semaphore_stats(
        &self,
        tags: Tags,
        stats: crate::concurrency::semaphore::SemaphoreStats,
    ) {
        if let Some(g) = self.gauge(metric_names::SEMAPHORE_QUEUE_DEPTH, tags.clone()) {
            g.set(stats.queued_waiters as f64);
        }
        if let Some(g) = self.gauge(metric_names::SEMAPHORE_QUEUE_BYTES, tags) {
            g.set(stats.queued_bytes as f64);
        }
    }

    /// Publishes a [`crate::concurrency::pool::ObjectPool`]'s hit ratio
    /// (`hits / (hits + misses)`, `0.0` before any acquire) as
    /// [`metric_names::POOL_HIT_RATIO`].
    pub fn record_pool_stats(&self, tags: Tags, stats: crate::concurrency::pool::PoolStats) {
        let total = stats.hits + stats.misses;
        let ratio = if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        };
        if let Some(g) = self.gauge(metric_names::POOL_HIT_RATIO, tags) {
            g.set(ratio);
        }
    }

    /// Publishes a [`crate::governance::circuit_breaker::CircuitBreaker`]'s
    /// state as [`metric_names::CIRCUIT_BREAKER_STATE`] (`0` closed, `1`
    /// half-open, `2` open).
    pub fn record_circuit_state(
        &self,
        tags: Tags,
        state: crate::governance::circuit_breaker::CircuitState,
    ) {
        let value = match state {
            crate::governance::circuit_breaker::CircuitState::Closed => 0.0,
            crate::governance::circuit_breaker::CircuitState::HalfOpen { .. } => 1.0,
            crate::governance::circuit_breaker::CircuitState::Open { .. } => 2.0,
        };
        if let Some(g) = self.gauge(metric_names::CIRCUIT_BREAKER_STATE, tags) {
            g.set(value);
        }
    }

    fn apply_event(&self, event: &PipelineEvent) {
        match event.name() {
            crate::observability::keys::events::PIPELINE_WILL_EXECUTE => {
                if let Some(c) = self.counter(metric_names::COMMAND_STARTED, Vec::new()) {
                    c.increment(1);
                }
            }
            crate::observability::keys::events::PIPELINE_DID_EXECUTE => {
                if let Some(c) = self.counter(metric_names::COMMAND_COMPLETED, Vec::new()) {
                    c.increment(1);
                }
                if let (Some(t), Some(duration)) = (
                    self.timer(metric_names::COMMAND_DURATION, Vec::new()),
                    event.duration(),
                ) {
                    t.observe(duration);
                }
            }
            crate::observability::keys::events::PIPELINE_DID_FAIL => {
                if let Some(c) = self.counter(metric_names::COMMAND_FAILED, Vec::new()) {
                    c.increment(1);
                }
            }
            crate::observability::keys::events::RATE_LIMIT_EXCEEDED => {
                if let Some(c) = self.counter(metric_names::RATE_LIMIT_HIT, Vec::new()) {
                    c.increment(1);
                }
            }
            _ => {}
        }
        let _ = event.properties();
    }
}
