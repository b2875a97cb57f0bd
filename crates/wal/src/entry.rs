use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use runplane_core::TenantId;

/// Kind of lifecycle fact recorded in the log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalEventType {
    SessionCreated,
    IntentReceived,
    SagaStarted,
    StepCompleted,
    StepFailed,
    SagaCompleted,
    SagaFailed,
    ExecutionCompleted,
    /// Cooperative cancellation marker; the coordinator checks for it
    /// between steps.
    CancelRequested,
}

impl WalEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalEventType::SessionCreated => "SESSION_CREATED",
            WalEventType::IntentReceived => "INTENT_RECEIVED",
            WalEventType::SagaStarted => "SAGA_STARTED",
            WalEventType::StepCompleted => "STEP_COMPLETED",
            WalEventType::StepFailed => "STEP_FAILED",
            WalEventType::SagaCompleted => "SAGA_COMPLETED",
            WalEventType::SagaFailed => "SAGA_FAILED",
            WalEventType::ExecutionCompleted => "EXECUTION_COMPLETED",
            WalEventType::CancelRequested => "CANCEL_REQUESTED",
        }
    }
}

impl core::fmt::Display for WalEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable fact in a tenant's log partition.
///
/// Notes:
/// - **Append-only**: entries are never mutated or deleted (retention may
///   drop the oldest, never rewrite).
/// - `sequence_number` is monotonically increasing per tenant partition.
/// - `payload` is event-specific structured data; kernel-written payloads
///   carry a `session_id` field so `replay_session` can correlate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub entry_id: Uuid,
    pub tenant_id: TenantId,

    /// Monotonically increasing position in the tenant partition.
    pub sequence_number: u64,

    pub event_type: WalEventType,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl WalEntry {
    /// Session id referenced by this entry's payload, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.payload.get("session_id").and_then(|v| v.as_str())
    }
}
