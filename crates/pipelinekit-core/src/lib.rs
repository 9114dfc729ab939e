//! `pipelinekit-core`: the execution core of a typed command bus — a
//! [`Command`](pipeline::Command) dispatched through an ordered
//! [`Middleware`](pipeline::Middleware) chain to a
//! [`Handler`](pipeline::Handler), with bounded concurrency, structured
//! observability and the canonical resilience middlewares (rate limiting,
//! circuit breaking, bulkheads, timeout, retry) layered on top.
//!
//! # Layout
//! - [`kernel`]: request/correlation ids and the non-empty-string newtype
//!   shared across the rest of the crate.
//! - [`error`]: the crate-wide [`error::PipelineError`] and its stable
//!   string error codes.
//! - [`future`]: `BoxFuture`/`LocalBoxFuture` aliases and the `Stream`
//!   trait, so no async-runtime or `futures` dependency leaks into the
//!   public API.
//! - [`concurrency`]: the backpressure semaphore and the bounded object
//!   pool every higher layer is built on. `no_std + alloc` only.
//! - [`context`] *(requires `std`)*: per-execution metadata, typed
//!   storage, cancellation and task-local "current context" exposure.
//! - [`time`] *(requires `std`)*: the injectable [`time::Clock`] every
//!   timed component (retry, timeout, circuit breaker) depends on instead
//!   of calling the system clock directly.
//! - [`observability`] *(requires `std`)*: the event hub, the metrics
//!   substrate bridged from it, and a minimal logging facade.
//! - [`pipeline`] *(requires `std`)*: `Command`/`Handler`/`Middleware`,
//!   the chain builder, and the standard/dynamic pipeline offerings.
//! - [`governance`] *(requires `std`)*: the canonical resilience
//!   middlewares, in their canonical priority order.
//! - [`cache`] *(requires `std`)*: the fingerprinted cache contract a
//!   caching middleware would consume, plus an in-memory, singleflight
//!   implementation.
//! - [`config`] *(requires `std`)*: `try_new`-validated configuration for
//!   every governance/concurrency knob, with an optional TOML loader
//!   behind the `config-toml` feature.
//!
//! # Features
//! - `alloc` (default, implied by `std`): the `no_std + alloc` primitives —
//!   [`kernel`], [`error`], [`future`], [`concurrency`].
//! - `std` (default): everything that needs wall-clock time, OS threads or
//!   thread-locals — [`context`], [`time`], [`observability`],
//!   [`pipeline`], [`governance`], [`cache`], [`config`].
//! - `config-toml`: [`config::PipelineConfig::from_toml_str`], via
//!   `serde` + `toml`.
//! - `loom-model`: compiles the concurrency primitives' model-checked
//!   tests under `loom` instead of the real `core::sync::atomic` types.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![allow(private_bounds)]

extern crate alloc;

pub mod concurrency;
pub mod error;
pub mod future;
pub mod kernel;
pub(crate) mod sealed;

#[cfg(feature = "std")]
pub mod cache;
#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod context;
#[cfg(feature = "std")]
pub mod governance;
#[cfg(feature = "std")]
pub mod observability;
#[cfg(feature = "std")]
pub mod pipeline;
#[cfg(feature = "std")]
pub mod time;

pub use error::{PipelineError, Result};

#[cfg(feature = "std")]
pub use context::Context;
#[cfg(feature = "std")]
pub use pipeline::{Command, Handler, Middleware};
