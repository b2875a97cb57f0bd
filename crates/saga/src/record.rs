//! Persisted saga and execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use runplane_core::{ExecutionId, Intent, SagaId, SessionId, TenantId};

/// Saga state machine.
///
/// `Pending` and the terminal states are never revisited once left.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Running,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }
}

/// Execution status lattice. Transitions are monotonic; a terminal record is
/// immutable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Why an execution failed: stable taxonomy tag + human-readable cause.
///
/// `secondary` records a compensation failure; it never masks the original
/// trigger kept in `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// One of the kernel's stable error tags (`SagaExecutionFailed`,
    /// `Timeout`, ...).
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl ExecutionFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }
}

/// The runtime record of one intent being carried out.
///
/// Created by the Intent Executor; mutated exclusively by the Saga
/// Coordinator; archived (written to the durable tier, not deleted) on
/// completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub intent: Intent,
    pub saga_id: Option<SagaId>,
    pub status: ExecutionStatus,
    pub result: Option<JsonValue>,
    pub error: Option<ExecutionFailure>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(intent: Intent) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id,
            submitted_at: intent.submitted_at,
            intent,
            saga_id: None,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self, saga_id: SagaId) {
        self.saga_id = Some(saga_id);
        self.status = ExecutionStatus::Running;
    }

    pub fn complete(&mut self, result: JsonValue) {
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, failure: ExecutionFailure) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(failure);
        self.finished_at = Some(Utc::now());
    }
}

/// Persisted saga state.
///
/// Invariant: `current_step_index` only advances forward during normal
/// execution and only moves backward during a compensation pass; a
/// `Completed` saga has `current_step_index == step_names.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_id: SagaId,
    pub execution_id: ExecutionId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub step_names: Vec<String>,
    pub current_step_index: usize,
    pub status: SagaStatus,
    /// Outputs of completed steps, keyed by step name.
    pub context: Map<String, JsonValue>,
    pub last_output: Option<JsonValue>,
    pub error: Option<ExecutionFailure>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(
        saga_id: SagaId,
        execution_id: ExecutionId,
        tenant_id: TenantId,
        session_id: SessionId,
        step_names: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            execution_id,
            tenant_id,
            session_id,
            step_names,
            current_step_index: 0,
            status: SagaStatus::Pending,
            context: Map::new(),
            last_output: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runplane_core::TenantId;
    use serde_json::json;

    fn intent() -> Intent {
        Intent::new(
            "noop.echo",
            SessionId::new(),
            TenantId::new("acme").unwrap(),
            json!({"k": "v"}),
        )
    }

    #[test]
    fn execution_lifecycle_is_monotonic() {
        let mut execution = ExecutionRecord::new(intent());
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(!execution.status.is_terminal());

        execution.mark_running(SagaId::new());
        assert_eq!(execution.status, ExecutionStatus::Running);

        execution.complete(json!({"ok": true}));
        assert!(execution.status.is_terminal());
        assert!(execution.finished_at.is_some());
    }

    #[test]
    fn failure_preserves_primary_and_secondary_causes() {
        let failure = ExecutionFailure::new("SagaExecutionFailed", "step 2 exploded")
            .with_secondary("compensation of step 1 also failed");

        assert_eq!(failure.code, "SagaExecutionFailed");
        assert_eq!(failure.message, "step 2 exploded");
        assert!(failure.secondary.is_some());
    }

    #[test]
    fn saga_record_serializes_round_trip() {
        let record = SagaRecord::new(
            SagaId::new(),
            ExecutionId::new(),
            TenantId::new("acme").unwrap(),
            SessionId::new(),
            vec!["reserve".to_string(), "commit".to_string()],
        );

        let value = serde_json::to_value(&record).unwrap();
        let back: SagaRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
