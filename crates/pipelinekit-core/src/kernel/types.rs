//! Type contracts reused across context, governance and observability.

use crate::error::{codes, PipelineError, Result};
use alloc::sync::Arc;
use core::fmt;

/// A string that is guaranteed non-empty and non-whitespace-only.
///
/// Built once at construction and cheap to clone afterward (an `Arc<str>`
/// refcount bump), so it can be threaded through middleware names, circuit
/// breaker names and bulkhead partition keys without repeated validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyStr(Arc<str>);

impl NonEmptyStr {
    pub fn new(value: impl Into<Arc<str>>) -> Result<Self> {
        let arc: Arc<str> = value.into();
        if arc.trim().is_empty() {
            return Err(PipelineError::new(
                codes::INVALID_CONFIG,
                "NonEmptyStr requires a non-blank value",
            ));
        }
        Ok(Self(arc))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
