//! Step descriptors and handler contract.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use runplane_core::{ExecutionId, SagaId, SessionId, TenantId};

/// Default per-step timeout when a capability does not declare one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a step handler gets to see.
///
/// Handlers are opaque realm code; the kernel passes correlation ids, the
/// original intent payload, and the context accumulated from prior step
/// outputs (keyed by step name).
#[derive(Debug, Clone)]
pub struct StepContext {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub execution_id: ExecutionId,
    pub saga_id: SagaId,
    /// The submitted intent's payload, untouched.
    pub intent_payload: JsonValue,
    /// Outputs of previously completed steps, keyed by step name.
    pub accumulated: JsonValue,
}

/// A single compensable unit of work.
///
/// Handlers must be deterministic with respect to their inputs as far as the
/// kernel is concerned; retries and duplicate invocations are possible, so
/// side effects should be idempotent. Errors are plain strings: the kernel
/// records them verbatim, it never interprets them.
pub trait StepHandler: Send + Sync {
    fn invoke(&self, ctx: &StepContext) -> Result<JsonValue, String>;
}

impl<F> StepHandler for F
where
    F: Fn(&StepContext) -> Result<JsonValue, String> + Send + Sync,
{
    fn invoke(&self, ctx: &StepContext) -> Result<JsonValue, String> {
        self(ctx)
    }
}

/// Descriptor for one saga step: name, handler, optional compensation.
#[derive(Clone)]
pub struct StepDescriptor {
    pub name: String,
    pub handler: Arc<dyn StepHandler>,
    /// Reverse action to undo this step after a later step fails.
    pub compensation: Option<Arc<dyn StepHandler>>,
    pub timeout: Duration,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            compensation: None,
            timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_compensation(mut self, compensation: Arc<dyn StepHandler>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl core::fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("compensation", &self.compensation.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
