use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// An opaque, possibly model-backed, asynchronous agent.
pub trait Capability: Send + Sync + 'static {
    /// Capability name as referenced by plan steps (e.g. "CoderAgent").
    fn name(&self) -> &str;

    /// Invoke the capability.
    ///
    /// `Ok(CapabilityResult::Failure)` is a structured failure reported by the
    /// capability; `Err` is a raised error (spawn failure, timeout, bad output).
    fn invoke(&self, input: &CapabilityInput) -> BoxFuture<'_, Result<CapabilityResult>>;
}

/// Anything that can route an invocation to a capability by name.
pub trait CapabilityBackend: Send + Sync + 'static {
    fn invoke(
        &self,
        capability: &str,
        input: &CapabilityInput,
    ) -> BoxFuture<'_, Result<CapabilityResult>>;

    /// Names of the capabilities this backend can reach.
    fn capabilities(&self) -> Vec<String>;
}

/// Runs code snippets embedded in capability outputs.
pub trait CodeExecutor: Send + Sync + 'static {
    fn execute(&self, request: CodeRequest) -> BoxFuture<'_, Result<CodeExecution>>;
}
