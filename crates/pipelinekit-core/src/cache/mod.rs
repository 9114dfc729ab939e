//! Cache abstraction (§4.I): the contract a caching middleware (itself out
//! of scope) consumes — `lookup`/`store`/`invalidate` keyed by a
//! content-addressed [`Fingerprint`], plus an in-memory implementation that
//! guarantees at most one concurrent build per fingerprint via
//! [`singleflight`].
//!
//! # Why
//! Concurrent misses on the same key must serialize onto one computation
//! rather than stampede the backing handler; `singleflight` is the same
//! "first caller leads, the rest await its result" shape the backpressure
//! semaphore uses for waiters, generalized from "woken by permit release"
//! to "woken by compute completion".

pub mod singleflight;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use async_trait::async_trait;
use core::time::Duration;
use sha2::{Digest, Sha256};

pub use singleflight::Singleflight;

/// A content-addressed key: SHA-256 of a canonical encoding of the command
/// that produced it. Rendered as lowercase hex so it can serve as a
/// `BTreeMap` key and a prefix-invalidation target in the same shape.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes `canonical_bytes` — the caller is responsible for producing a
    /// stable, canonical encoding (field order, no nondeterministic
    /// whitespace) before this is called.
    pub fn of(canonical_bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_bytes);
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            hex.push_str(&alloc::format!("{:02x}", byte));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry<V> {
    value: V,
    stored_at: std::time::Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: std::time::Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// The contract a caching middleware builds on.
#[async_trait]
pub trait Cache<V: Clone + Send + Sync + 'static>: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<V>;
    async fn store(&self, fingerprint: Fingerprint, value: V, ttl: Duration);
    /// Removes every entry whose fingerprint hex starts with `prefix`.
    async fn invalidate(&self, prefix: &str);
}

/// In-memory [`Cache`] backed by one lock-protected map plus a
/// [`Singleflight`] so concurrent misses on the same fingerprint serialize
/// onto a single computation.
pub struct InMemoryCache<V: Clone + Send + Sync + 'static> {
    entries: spin::Mutex<alloc::collections::BTreeMap<String, Entry<V>>>,
    inflight: Singleflight<String, V>,
}

impl<V: Clone + Send + Sync + 'static> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> InMemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: spin::Mutex::new(alloc::collections::BTreeMap::new()),
            inflight: Singleflight::new(),
        }
    }

    /// Returns the cached value for `fingerprint`, computing it via
    /// `compute` on a miss. Concurrent callers racing the same miss share
    /// one invocation of `compute` (§8.1: "cache singleflight").
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<V, crate::error::PipelineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: core::future::Future<Output = Result<V, crate::error::PipelineError>> + Send + 'static,
    {
        if let Some(value) = self.lookup(&fingerprint).await {
            return Ok(value);
        }
        let key = fingerprint.as_str().to_string();
        let value = self
            .inflight
            .resolve(key, async move { compute().await })
            .await?;
        self.store(fingerprint, value.clone(), ttl).await;
        Ok(value)
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Cache<V> for InMemoryCache<V> {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<V> {
        let now = std::time::Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(fingerprint.as_str()) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(fingerprint.as_str());
                None
            }
            None => None,
        }
    }

    async fn store(&self, fingerprint: Fingerprint, value: V, ttl: Duration) {
        self.entries.lock().insert(
            fingerprint.0,
            Entry {
                value,
                stored_at: std::time::Instant::now(),
                ttl,
            },
        );
    }

    async fn invalidate(&self, prefix: &str) {
        let mut entries = self.entries.lock();
        let to_remove: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in to_remove {
            entries.remove(&key);
        }
    }
}
