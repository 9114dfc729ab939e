//! At-most-one-concurrent-build-per-key (§4.I, §8.1): the first caller to
//! `resolve` a given key runs the supplied future and becomes its leader;
//! every other caller racing the same key awaits the leader's result
//! instead of running a second computation.
//!
//! # How
//! A lock-protected map holds one [`Slot`] per in-flight key. The caller
//! that inserts the slot is the leader and drives `compute` directly (not
//! through the slot's own future); every other caller finds the existing
//! slot and polls [`SingleflightFuture`], which registers a waker and
//! parks until the leader resolves the slot. The slot is removed from the
//! map once resolved, so the next miss on that key starts a fresh build.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll, Waker};

use crate::error::PipelineError;

/// A [`PipelineError`] isn't `Clone` (its cause is a boxed trait object);
/// followers get a reconstructed error carrying the same code and message
/// but no cause chain.
#[derive(Clone)]
struct StoredError {
    code: &'static str,
    message: String,
}

impl From<&PipelineError> for StoredError {
    fn from(error: &PipelineError) -> Self {
        Self {
            code: error.code(),
            message: error.message().to_string(),
        }
    }
}

impl StoredError {
    fn into_error(self) -> PipelineError {
        PipelineError::new(self.code, self.message)
    }
}

enum SlotState<V> {
    Pending(Vec<Waker>),
    Ready(Result<V, StoredError>),
}

struct Slot<V> {
    state: spin::Mutex<SlotState<V>>,
}

impl<V> Slot<V> {
    fn pending() -> Self {
        Self {
            state: spin::Mutex::new(SlotState::Pending(Vec::new())),
        }
    }

    fn resolve(&self, result: &Result<V, StoredError>)
    where
        V: Clone,
    {
        let mut state = self.state.lock();
        let wakers = match core::mem::replace(&mut *state, SlotState::Ready(result.clone())) {
            SlotState::Pending(wakers) => wakers,
            SlotState::Ready(_) => Vec::new(),
        };
        drop(state);
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Keyed singleflight coordinator. `K` identifies the computation; `V` is
/// its (cloneable) result.
pub struct Singleflight<K: Ord + Clone, V: Clone> {
    inflight: spin::Mutex<BTreeMap<K, Arc<Slot<V>>>>,
}

impl<K: Ord + Clone, V: Clone> Default for Singleflight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> Singleflight<K, V> {
    pub fn new() -> Self {
        Self {
            inflight: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Runs `compute` for `key`, or awaits the in-flight leader's result if
    /// another caller is already building the same key.
    pub async fn resolve<Fut>(&self, key: K, compute: Fut) -> Result<V, PipelineError>
    where
        Fut: Future<Output = Result<V, PipelineError>>,
    {
        let mut inflight = self.inflight.lock();
        if let Some(slot) = inflight.get(&key) {
            let slot = slot.clone();
            drop(inflight);
            return SingleflightFuture { slot }.await;
        }
        let slot = Arc::new(Slot::pending());
        inflight.insert(key.clone(), slot.clone());
        drop(inflight);

        let outcome = compute.await;
        let stored = outcome.as_ref().map(|v| v.clone()).map_err(StoredError::from);
        slot.resolve(&stored);
        self.inflight.lock().remove(&key);
        outcome
    }
}

struct SingleflightFuture<V> {
    slot: Arc<Slot<V>>,
}

impl<V: Clone> Future for SingleflightFuture<V> {
    type Output = Result<V, PipelineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        match &mut *state {
            SlotState::Ready(result) => Poll::Ready(match result {
                Ok(value) => Ok(value.clone()),
                Err(stored) => Err(stored.clone().into_error()),
            }),
            SlotState::Pending(wakers) => {
                wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
