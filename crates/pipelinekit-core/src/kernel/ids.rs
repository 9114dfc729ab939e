//! Request/correlation identifiers, plus the id generator [`Metadata`](crate::context::Metadata)
//! uses to mint a `request_id` when the caller doesn't supply one.
//!
//! No dependency on a UUID crate: ids are a 128-bit value produced from a
//! monotonic counter mixed with the wall clock via the same SplitMix64-style
//! mixing function used for retry jitter, formatted in the familiar
//! `8-4-4-4-12` hex grouping. They are unique and well distributed, not
//! cryptographically unpredictable — fine for correlating log lines, not for
//! anything security-sensitive.

use super::types::NonEmptyStr;
use crate::error::Result;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Request identifier: uniquely names one pipeline execution.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(NonEmptyStr);

impl RequestId {
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self> {
        Ok(Self(NonEmptyStr::new(value)?))
    }

    pub fn generate() -> Self {
        Self(
            NonEmptyStr::new(generate_id())
                .expect("generated id is never blank"),
        )
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation identifier: ties together multiple requests belonging to the
/// same logical flow. Inherited from the caller when present, minted fresh
/// otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(NonEmptyStr);

impl CorrelationId {
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self> {
        Ok(Self(NonEmptyStr::new(value)?))
    }

    pub fn generate() -> Self {
        Self(
            NonEmptyStr::new(generate_id())
                .expect("generated id is never blank"),
        )
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Produces a fresh, well-distributed 128-bit identifier formatted as
/// lowercase hex in UUID-like groups.
pub fn generate_id() -> alloc::string::String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let salt = time_salt();
    let high = mix64(seq ^ salt);
    let low = mix64(high ^ seq.rotate_left(17));

    alloc::format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (high >> 32) as u32,
        (high >> 16) as u16 & 0xffff,
        high as u16,
        (low >> 48) as u16,
        low & 0xffff_ffff_ffff,
    )
}

#[cfg(feature = "std")]
fn time_salt() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(not(feature = "std"))]
fn time_salt() -> u64 {
    0x9E3779B97F4A7C15
}

#[inline]
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
