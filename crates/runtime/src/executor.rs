//! Intent acceptance pipeline.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use runplane_core::{ExecutionId, Intent, KernelError, KernelResult};
use runplane_observer::{LifecycleEvent, LifecycleEventKind, ObserverBus};
use runplane_saga::{ExecutionRecord, SagaCoordinator};
use runplane_session::{SessionError, SessionRegistry};
use runplane_state::{StateKey, StateSurface, StateTier};
use runplane_wal::{WalEventType, WriteAheadLog};

use crate::capability::CapabilityRegistry;
use crate::queue::{WorkItem, WorkQueue};

/// Accepts intents and hands the resulting sagas to the background worker.
///
/// Ordering contract of `execute`: caller errors are rejected before any
/// WAL write; an unresolvable capability is rejected *after* INTENT_RECEIVED
/// is logged (the attempt stays auditable) but before any saga exists.
pub struct IntentExecutor {
    wal: Arc<dyn WriteAheadLog>,
    surface: Arc<StateSurface>,
    sessions: Arc<SessionRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    coordinator: Arc<SagaCoordinator>,
    bus: Arc<ObserverBus>,
    queue: Arc<dyn WorkQueue>,
}

impl IntentExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wal: Arc<dyn WriteAheadLog>,
        surface: Arc<StateSurface>,
        sessions: Arc<SessionRegistry>,
        capabilities: Arc<CapabilityRegistry>,
        coordinator: Arc<SagaCoordinator>,
        bus: Arc<ObserverBus>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            wal,
            surface,
            sessions,
            capabilities,
            coordinator,
            bus,
            queue,
        }
    }

    /// Accept one intent and return its execution id immediately.
    ///
    /// Step execution happens asynchronously on the worker; the returned id
    /// is the handle for status polling.
    pub fn execute(&self, intent: Intent) -> KernelResult<ExecutionId> {
        self.sessions
            .get_session(&intent.session_id, &intent.tenant_id)
            .map_err(session_error)?;

        self.wal
            .append(
                &intent.tenant_id,
                WalEventType::IntentReceived,
                json!({
                    "intent_id": intent.intent_id.to_string(),
                    "session_id": intent.session_id.to_string(),
                    "intent_type": intent.intent_type,
                }),
            )
            .map_err(|e| KernelError::unknown(e.to_string()))?;

        let Some(capability) = self.capabilities.resolve(&intent.intent_type) else {
            return Err(KernelError::no_capability(intent.intent_type));
        };

        let execution = ExecutionRecord::new(intent.clone());
        let execution_id = execution.execution_id;
        let key = StateKey::execution(intent.tenant_id.clone(), &execution_id);
        let value = serde_json::to_value(&execution)
            .map_err(|e| KernelError::unknown(e.to_string()))?;
        self.surface
            .set_state(&key, value, None, StateTier::Durable)
            .map_err(|e| KernelError::unknown(e.to_string()))?;

        let saga_id = self
            .coordinator
            .start_saga(execution_id, &intent, capability.steps)
            .map_err(|e| KernelError::unknown(e.to_string()))?;

        info!(
            execution_id = %execution_id,
            saga_id = %saga_id,
            tenant_id = %intent.tenant_id,
            intent_type = %intent.intent_type,
            realm_owner = %capability.realm_owner,
            "intent accepted"
        );
        self.bus.notify(
            &LifecycleEvent::new(LifecycleEventKind::IntentSubmitted, intent.tenant_id.clone())
                .with_session(intent.session_id)
                .with_execution(execution_id)
                .with_saga(saga_id)
                .with_detail(json!({"intent_type": intent.intent_type})),
        );

        self.queue
            .enqueue(WorkItem::new(saga_id, intent.tenant_id.clone()));

        Ok(execution_id)
    }
}

fn session_error(err: SessionError) -> KernelError {
    match err {
        SessionError::NotFound(id) => {
            KernelError::invalid_session(format!("session {id} not found"))
        }
        SessionError::TenantMismatch(id) => {
            KernelError::tenant_mismatch(format!("session {id} belongs to another tenant"))
        }
        SessionError::Storage(e) => KernelError::unknown(e.to_string()),
        SessionError::Corrupt(e) => KernelError::unknown(e),
    }
}
