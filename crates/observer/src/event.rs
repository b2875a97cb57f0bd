use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use runplane_core::{ExecutionId, SagaId, SessionId, TenantId};

/// Lifecycle event kinds emitted by the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    SessionCreated,
    IntentSubmitted,
    ExecutionStarted,
    StepCompleted,
    StepFailed,
    ExecutionCompleted,
    ExecutionFailed,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::SessionCreated => "session_created",
            LifecycleEventKind::IntentSubmitted => "intent_submitted",
            LifecycleEventKind::ExecutionStarted => "execution_started",
            LifecycleEventKind::StepCompleted => "step_completed",
            LifecycleEventKind::StepFailed => "step_failed",
            LifecycleEventKind::ExecutionCompleted => "execution_completed",
            LifecycleEventKind::ExecutionFailed => "execution_failed",
        }
    }
}

impl core::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle notification, as observers see it.
///
/// Carries enough correlation to be useful on its own; `detail` holds
/// event-specific structured data (step name, error text, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub tenant_id: TenantId,
    pub session_id: Option<SessionId>,
    pub execution_id: Option<ExecutionId>,
    pub saga_id: Option<SagaId>,
    pub detail: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, tenant_id: TenantId) -> Self {
        Self {
            kind,
            tenant_id,
            session_id: None,
            execution_id: None,
            saga_id: None,
            detail: JsonValue::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_saga(mut self, saga_id: SagaId) -> Self {
        self.saga_id = Some(saga_id);
        self
    }

    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = detail;
        self
    }
}
