//! The command-bus execution core (§4.F): a typed [`command::Command`]
//! dispatched through an ordered [`middleware::Middleware`] chain to a
//! [`command::Handler`], composed once by [`chain::ChainBuilder`] into a
//! [`chain::CompiledChain`] that every execution reuses.
//!
//! Two offerings share that machinery: [`standard::StandardPipeline`] is a
//! single fixed chain compiled once at construction; [`dynamic::DynamicPipeline`]
//! allows middlewares to be registered or removed at runtime, invalidating
//! and lazily rebuilding the compiled chain on the next `execute`.

pub mod chain;
pub mod command;
pub mod dynamic;
pub mod middleware;
pub mod standard;

pub use chain::{ChainBuilder, CompiledChain};
pub use command::{Command, Handler};
pub use dynamic::DynamicPipeline;
pub use middleware::{priority, Middleware, Next};
pub use standard::{StandardPipeline, StandardPipelineBuilder};
