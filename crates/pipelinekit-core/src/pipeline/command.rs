//! Command and handler contracts.

use crate::context::Context;
use crate::error::PipelineError;
use alloc::sync::Arc;
use async_trait::async_trait;

/// An immutable request value whose result type is statically known.
///
/// The engine is polymorphic across the set of command types it routes —
/// each [`crate::pipeline::standard::StandardPipeline`] or
/// [`crate::pipeline::dynamic::DynamicPipeline`] is parameterized over one
/// `Command` implementor, so a given value is always dispatched to exactly
/// one handler at compile time.
pub trait Command: Send + Sync + crate::sealed::Sealed + 'static {
    type Result: Send + 'static;

    /// Stable label used in events and metrics (`pipeline.will_execute`'s
    /// `command_type` property, for instance). Must never embed payload
    /// data.
    fn command_type(&self) -> &'static str;
}

/// Pure `Command -> Result` transformation that may fail. Any per-request
/// state the handler needs lives in [`Context`], not in the handler itself.
#[async_trait]
pub trait Handler<C: Command>: Send + Sync + crate::sealed::Sealed {
    async fn handle(&self, command: &Arc<C>, context: &Arc<Context>) -> Result<C::Result, PipelineError>;
}

#[async_trait]
impl<C, F> Handler<C> for F
where
    C: Command,
    F: Fn(&Arc<C>, &Arc<Context>) -> Result<C::Result, PipelineError> + Send + Sync,
{
    async fn handle(&self, command: &Arc<C>, context: &Arc<Context>) -> Result<C::Result, PipelineError> {
        (self)(command, context)
    }
}
