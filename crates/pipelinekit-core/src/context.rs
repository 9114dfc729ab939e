//! Per-request context: immutable metadata, typed key/value storage, an
//! event-emitter handle back to the hub, and task-local exposure so deep
//! call chains can reach "the current context" without threading it through
//! every signature.
//!
//! # Why
//! Middlewares and handlers need a shared place to stash per-request state
//! (deadlines, auth claims, trace spans) and to emit events, without forcing
//! every function signature in the chain to carry an extra parameter.
//!
//! # What
//! [`Context`] bundles [`Metadata`] (set once, read-only afterward) with a
//! [`TypedStorage`] map keyed by `TypeId`. [`CurrentContext`] exposes the
//! context of the execution presently running on this thread.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::any::{Any, TypeId};
#[cfg(not(any(loom, pipelinekit_loom)))]
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
#[cfg(any(loom, pipelinekit_loom))]
use loom::sync::atomic::{AtomicBool, Ordering};

use crate::kernel::{CorrelationId, RequestId};
use crate::observability::hub::{EventHub, PipelineEvent};

/// Wall-clock and monotonic timestamps captured once, at context creation.
#[derive(Clone, Copy, Debug)]
pub struct Timestamp {
    pub wall_clock: std::time::SystemTime,
    pub monotonic: std::time::Instant,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            wall_clock: std::time::SystemTime::now(),
            monotonic: std::time::Instant::now(),
        }
    }
}

/// Fields set exactly once, at context construction, and read-only for the
/// rest of the execution's lifetime.
#[derive(Clone, Debug)]
pub struct Metadata {
    request_id: RequestId,
    correlation_id: CorrelationId,
    user_id: Option<Arc<str>>,
    created_at: Timestamp,
    hints: Arc<BTreeMap<String, String>>,
}

impl Metadata {
    /// Builds metadata for a fresh execution: a new request id, and a new
    /// correlation id unless the caller supplies one to inherit.
    pub fn new(correlation_id: Option<CorrelationId>, user_id: Option<Arc<str>>) -> Self {
        Self {
            request_id: RequestId::generate(),
            correlation_id: correlation_id.unwrap_or_else(CorrelationId::generate),
            user_id,
            created_at: Timestamp::now(),
            hints: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_hints(mut self, hints: BTreeMap<String, String>) -> Self {
        self.hints = Arc::new(hints);
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn hint(&self, key: &str) -> Option<&str> {
        self.hints.get(key).map(String::as_str)
    }
}

/// `TypeId`-keyed storage guarded by a single short-held lock. Reads and
/// writes never cross an `.await`, so contention is always a fast spin, not
/// a scheduling hazard.
#[derive(Default)]
struct TypedStorage {
    slots: spin::Mutex<BTreeMap<TypeId, Box<dyn Any + Send>>>,
}

impl TypedStorage {
    fn new() -> Self {
        Self {
            slots: spin::Mutex::new(BTreeMap::new()),
        }
    }

    fn set<T: Send + 'static>(&self, value: T) {
        self.slots
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Clone + Send + 'static>(&self) -> Option<T> {
        self.slots
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    fn remove<T: Send + 'static>(&self) {
        self.slots.lock().remove(&TypeId::of::<T>());
    }

    fn contains<T: Send + 'static>(&self) -> bool {
        self.slots.lock().contains_key(&TypeId::of::<T>())
    }

    fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// A budget of remaining time a request may still spend before it must fail
/// with a timeout, propagated through [`Context`] typed storage by the
/// timeout middleware (see `governance::timeout`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadlineBudget(pub Duration);

/// Per-request context. Exclusively owned by one in-flight pipeline
/// execution — nothing outside that execution's call tree should hold a
/// reference once the execution completes.
pub struct Context {
    metadata: Metadata,
    storage: TypedStorage,
    hub: Option<Weak<EventHub>>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// Constructs a fresh context with new metadata, optionally wired to an
    /// event hub for `emit`.
    pub fn new(hub: Option<&Arc<EventHub>>) -> Self {
        Self::with_metadata(Metadata::new(None, None), hub)
    }

    pub fn with_metadata(metadata: Metadata, hub: Option<&Arc<EventHub>>) -> Self {
        Self {
            metadata,
            storage: TypedStorage::new(),
            hub: hub.map(Arc::downgrade),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn request_id(&self) -> &RequestId {
        self.metadata.request_id()
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        self.metadata.correlation_id()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.metadata.user_id()
    }

    /// Stores `value` under its own type as the key. Replaces any prior
    /// value of the same type.
    pub fn set<T: Send + 'static>(&self, value: T) {
        self.storage.set(value);
    }

    /// Reads the value stored for type `T`, if any. Never panics on a
    /// missing key.
    pub fn get<T: Clone + Send + 'static>(&self) -> Option<T> {
        self.storage.get::<T>()
    }

    /// Removes the value stored for type `T`. A no-op if absent.
    pub fn remove<T: Send + 'static>(&self) {
        self.storage.remove::<T>();
    }

    pub fn contains<T: Send + 'static>(&self) -> bool {
        self.storage.contains::<T>()
    }

    /// Clears all typed storage while preserving the context for reuse —
    /// the "reset on release" step when a context is pooled.
    pub fn reset(&self) {
        self.storage.clear();
        self.cancelled.store(false, Ordering::Relaxed);
    }

    /// Forwards `event` to the attached hub, if any, best-effort and
    /// non-blocking. A no-op if the hub has already been dropped or this
    /// context was never wired to one.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(hub) = self.hub.as_ref().and_then(Weak::upgrade) {
            hub.post(event);
        }
    }

    /// The cooperative cancellation flag: flipped by the caller's task
    /// cancellation, observed at every `acquire`, backoff wait and timeout
    /// race.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            flag: self.cancelled.clone(),
        }
    }
}

/// A cloneable handle onto a context's cancellation flag.
#[derive(Clone)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

std::thread_local! {
    static CURRENT: core::cell::RefCell<Option<Arc<Context>>> = const { core::cell::RefCell::new(None) };
}

/// Exposes "the context of the execution presently running on this thread"
/// without threading it through every signature, the same role the
/// teacher's `rt::sugar` module plays for ambient state.
pub struct CurrentContext;

impl CurrentContext {
    /// Sets `context` as current for the duration of the returned guard;
    /// restores the previous value (if any) when the guard drops.
    pub fn enter(context: Arc<Context>) -> CurrentContextGuard {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(context));
        CurrentContextGuard { previous }
    }

    /// Clones the handle to the currently-entered context, if any.
    pub fn get() -> Option<Arc<Context>> {
        CURRENT.with(|cell| cell.borrow().clone())
    }
}

/// RAII guard restoring the previously-current context on drop.
pub struct CurrentContextGuard {
    previous: Option<Arc<Context>>,
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct UserFlag(bool);

    #[test]
    fn set_then_get_then_remove() {
        let ctx = Context::new(None);
        assert!(ctx.get::<UserFlag>().is_none());
        ctx.set(UserFlag(true));
        assert_eq!(ctx.get::<UserFlag>(), Some(UserFlag(true)));
        ctx.remove::<UserFlag>();
        assert!(ctx.get::<UserFlag>().is_none());
    }

    #[test]
    fn remove_of_absent_key_is_noop() {
        let ctx = Context::new(None);
        ctx.remove::<UserFlag>();
        assert!(!ctx.contains::<UserFlag>());
    }

    #[test]
    fn current_context_round_trips_through_guard() {
        assert!(CurrentContext::get().is_none());
        let ctx = Arc::new(Context::new(None));
        {
            let _guard = CurrentContext::enter(ctx.clone());
            let current = CurrentContext::get().expect("context set");
            assert_eq!(current.request_id(), ctx.request_id());
        }
        assert!(CurrentContext::get().is_none());
    }
}
