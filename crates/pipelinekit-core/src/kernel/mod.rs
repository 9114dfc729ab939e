//! Shared primitives that the rest of the crate builds on: the
//! non-empty-string newtype and the id types that make up a [`crate::context::Metadata`].
//!
//! Kept as its own namespace (rather than folded into `context`) because
//! `types` and `ids` are reused by the governance middlewares too (circuit
//! breaker names, bulkhead partition keys), the same split the teacher uses
//! between `kernel::types` and `kernel::ids`.

pub mod ids;
pub mod types;

pub use ids::{generate_id, CorrelationId, RequestId};
pub use types::NonEmptyStr;
