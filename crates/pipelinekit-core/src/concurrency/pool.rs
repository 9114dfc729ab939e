//! Bounded reusable resource pool (§4.H): a free list behind one lock, a
//! factory for new entries, a caller-supplied reset step run on release,
//! and an RAII scoped guard.
//!
//! # Why
//! Caching middleware, connection-like resources and anything else that is
//! expensive to construct but safe to reuse after a reset step share this
//! one pool shape instead of each hand-rolling a `Vec` + `Mutex`.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{codes, PipelineError};

/// `max_size`, validated at construction the same way every other config
/// type in this crate is (`try_new`, never a silently-clamped default).
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_size: usize,
}

impl PoolConfig {
    pub fn try_new(max_size: usize) -> Result<Self, PipelineError> {
        if max_size == 0 {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "pool max_size must be at least 1",
            ));
        }
        Ok(Self { max_size })
    }
}

/// A point-in-time snapshot of the pool's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub total_allocated: u64,
    pub currently_available: usize,
    pub currently_in_use: usize,
    pub hits: u64,
    pub misses: u64,
    pub high_water_mark: usize,
}

struct Inner<T> {
    free: spin::Mutex<Vec<T>>,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    reset: Arc<dyn Fn(&mut T) + Send + Sync>,
    max_size: usize,
    total_allocated: AtomicU64,
    in_use: core::sync::atomic::AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    high_water_mark: core::sync::atomic::AtomicUsize,
}

/// Bounded pool of reusable `T`s. Cheap to clone-share via the inner `Arc`,
/// thread-safe: every operation takes `&self`.
#[derive(Clone)]
pub struct ObjectPool<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> ObjectPool<T> {
    /// `factory` builds a fresh `T` when the free list is empty and the
    /// pool is below `max_size`; `reset` runs on every `release` before the
    /// value re-enters the free list.
    pub fn new(
        config: PoolConfig,
        factory: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                free: spin::Mutex::new(Vec::new()),
                factory: Arc::new(factory),
                reset: Arc::new(reset),
                max_size: config.max_size,
                total_allocated: AtomicU64::new(0),
                in_use: core::sync::atomic::AtomicUsize::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                high_water_mark: core::sync::atomic::AtomicUsize::new(0),
            }),
        }
    }

    /// Takes an entry from the free list, or constructs a new one via the
    /// factory if the list is empty and the pool has room. Fails with
    /// `PoolExhausted` once `total_allocated` has reached `max_size` and no
    /// entry is free to reuse.
    pub fn acquire(&self) -> Result<T, PipelineError> {
        if let Some(value) = self.inner.free.lock().pop() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            self.bump_in_use();
            return Ok(value);
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let allocated = self.inner.total_allocated.load(Ordering::Acquire);
        if allocated >= self.inner.max_size as u64 {
            return Err(PipelineError::new(
                codes::POOL_EXHAUSTED,
                "object pool has reached its maximum size",
            ));
        }
        self.inner.total_allocated.fetch_add(1, Ordering::AcqRel);
        self.bump_in_use();
        Ok((self.inner.factory)())
    }

    fn bump_in_use(&self) {
        let now = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner
            .high_water_mark
            .fetch_max(now, Ordering::AcqRel);
    }

    /// Returns `acquire`'s RAII counterpart: a guard that calls `release`
    /// automatically when it drops.
    pub fn acquire_scoped(&self) -> Result<PooledGuard<T>, PipelineError> {
        let value = self.acquire()?;
        Ok(PooledGuard {
            pool: self.clone(),
            value: Some(value),
        })
    }

    /// Runs `reset` on `value` and returns it to the free list, unless the
    /// pool is already at `max_size` free entries, in which case the value
    /// is dropped instead of retained past the cap.
    pub fn release(&self, mut value: T) {
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
        (self.inner.reset)(&mut value);
        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_size {
            free.push(value);
        } else {
            self.inner
                .total_allocated
                .fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Tops the free list up to `n` entries using the factory, so the next
    /// `n` acquires are hits rather than misses.
    pub fn pre_allocate(&self, n: usize) {
        let mut free = self.inner.free.lock();
        while free.len() < n && (self.inner.total_allocated.load(Ordering::Acquire) as usize) < self.inner.max_size {
            free.push((self.inner.factory)());
            self.inner.total_allocated.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drops free entries until at most `n` remain.
    pub fn shrink_to(&self, n: usize) {
        let mut free = self.inner.free.lock();
        while free.len() > n {
            free.pop();
            self.inner.total_allocated.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Drops every free entry. In-use entries are unaffected and still
    /// return through `release` as normal.
    pub fn clear(&self) {
        self.shrink_to(0);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_allocated: self.inner.total_allocated.load(Ordering::Relaxed),
            currently_available: self.inner.free.lock().len(),
            currently_in_use: self.inner.in_use.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            high_water_mark: self.inner.high_water_mark.load(Ordering::Relaxed),
        }
    }
}

/// RAII holder returned by [`ObjectPool::acquire_scoped`]: releases the
/// wrapped value back to the pool when dropped.
pub struct PooledGuard<T: Send + 'static> {
    pool: ObjectPool<T>,
    value: Option<T>,
}

impl<T: Send + 'static> core::ops::Deref for PooledGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("PooledGuard value taken before drop")
    }
}

impl<T: Send + 'static> core::ops::DerefMut for PooledGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("PooledGuard value taken before drop")
    }
}

impl<T: Send + 'static> Drop for PooledGuard<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}
