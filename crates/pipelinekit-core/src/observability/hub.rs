//! In-process publish/subscribe for structured pipeline events.
//!
//! # Why
//! The core and the resilience middlewares need to announce what happened
//! (a middleware ran, a circuit tripped, a retry fired) without coupling to
//! any specific metrics or logging backend. Subscribers — the metrics
//! bridge (`observability::metrics`), a test probe, a future audit sink —
//! register independently.
//!
//! # What
//! Delivery is best-effort and non-blocking: each subscriber owns a bounded
//! ring buffer; a full buffer drops the event and increments that
//! subscriber's overflow counter rather than back-pressuring the publisher.
//! Events carry a hub-wide monotonic sequence id so a subscriber can detect
//! gaps caused by drops.

use alloc::borrow::Cow;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

/// A single property value attached to an event.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Str(Cow<'static, str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&'static str> for AttributeValue {
    fn from(value: &'static str) -> Self {
        AttributeValue::Str(Cow::Borrowed(value))
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(Cow::Owned(value))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// A structured record describing something that happened during a
/// pipeline execution.
#[derive(Clone, Debug)]
pub struct PipelineEvent {
    sequence: u64,
    name: Cow<'static, str>,
    correlation_id: Option<String>,
    command_type: Option<&'static str>,
    duration: Option<Duration>,
    error_class: Option<&'static str>,
    properties: Vec<(Cow<'static, str>, AttributeValue)>,
}

impl PipelineEvent {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sequence: 0,
            name: name.into(),
            correlation_id: None,
            command_type: None,
            duration: None,
            error_class: None,
            properties: Vec::new(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_command_type(mut self, command_type: &'static str) -> Self {
        self.command_type = Some(command_type);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_error_class(mut self, error_class: &'static str) -> Self {
        self.error_class = Some(error_class);
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn error_class(&self) -> Option<&'static str> {
        self.error_class
    }

    pub fn properties(&self) -> &[(Cow<'static, str>, AttributeValue)] {
        &self.properties
    }
}

/// Opaque handle returned by [`EventHub::subscribe`], used to
/// [`EventHub::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct SubscriptionState {
    handle: u64,
    filter: Option<String>,
    queue: spin::Mutex<VecDeque<PipelineEvent>>,
    capacity: usize,
    overflow: AtomicU64,
}

fn matches(filter: &Option<String>, name: &str) -> bool {
    match filter {
        None => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => pattern == name,
        },
    }
}

/// A subscriber's inbox: a bounded queue it can drain at its own pace.
pub struct Subscriber {
    state: Arc<SubscriptionState>,
}

impl Subscriber {
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.state.handle)
    }

    /// Pops the oldest buffered event, if any.
    pub fn try_recv(&self) -> Option<PipelineEvent> {
        self.state.queue.lock().pop_front()
    }

    /// Count of events dropped because this subscriber's queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.state.overflow.load(Ordering::Relaxed)
    }
}

/// In-process event bus. Cheap to clone-share via `Arc`; holds no reference
/// back to any [`crate::context::Context`], so a context's `Weak` pointer to
/// the hub never forms a cycle.
pub struct EventHub {
    subscriptions: spin::Mutex<Vec<Arc<SubscriptionState>>>,
    next_handle: AtomicU64,
    sequence: AtomicU64,
    shutdown: AtomicBool,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: spin::Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Registers a subscriber. `filter` of `None` matches every event; a
    /// filter ending in `*` matches by prefix; otherwise it must match the
    /// event name exactly.
    pub fn subscribe(&self, filter: Option<impl Into<String>>, capacity: usize) -> Subscriber {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriptionState {
            handle,
            filter: filter.map(Into::into),
            queue: spin::Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            overflow: AtomicU64::new(0),
        });
        self.subscriptions.lock().push(state.clone());
        Subscriber { state }
    }

    /// Removes a subscription. O(1) amortized: swap-removes from the
    /// backing vector.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut subs = self.subscriptions.lock();
        if let Some(pos) = subs.iter().position(|s| s.handle == handle.0) {
            subs.swap_remove(pos);
        }
    }

    /// Publishes `event` to every matching subscriber. Best-effort: a
    /// subscriber at capacity has the event dropped for it and its overflow
    /// counter incremented, rather than blocking the publisher. A no-op
    /// after [`EventHub::shutdown`].
    pub fn post(&self, mut event: PipelineEvent) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        event.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let subs = self.subscriptions.lock();
        for sub in subs.iter() {
            if !matches(&sub.filter, &event.name) {
                continue;
            }
            let mut queue = sub.queue.lock();
            if queue.len() >= sub.capacity {
                sub.overflow.fetch_add(1, Ordering::Relaxed);
            } else {
                queue.push_back(event.clone());
            }
        }
    }

    /// Drains all subscriptions and marks the hub shut down; subsequent
    /// `post` calls are no-ops.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self {
            subscriptions: spin::Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}
