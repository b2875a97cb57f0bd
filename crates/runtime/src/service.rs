//! Runtime service façade: the single entry point callers and realms use.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value as JsonValue, json};
use tracing::info;

use runplane_core::{
    ExecutionId, Intent, KernelError, KernelResult, RetryPolicy, SessionId, TenantId, UserId,
};
use runplane_observer::{LifecycleEvent, LifecycleEventKind, Observer, ObserverBus, ObserverBusConfig};
use runplane_saga::{ExecutionRecord, SagaCoordinator};
use runplane_session::{Session, SessionRegistry};
use runplane_state::{StateKey, StateSurface};
use runplane_wal::{InMemoryWal, WalConfig, WalEntry, WalEventType, WriteAheadLog};

use crate::capability::{CapabilityError, CapabilityRegistration, CapabilityRegistry};
use crate::executor::IntentExecutor;
use crate::queue::{InMemoryWorkQueue, WorkQueue};
use crate::worker::{SagaWorker, WorkerConfig, WorkerHandle, WorkerStats};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub wal: WalConfig,
    pub observer: ObserverBusConfig,
    pub worker: WorkerConfig,
    /// Retry budget for reads against the state stores.
    pub retry: RetryPolicy,
}

/// The kernel façade.
///
/// Owns every collaborator (log, state surface, registries, bus, worker);
/// nothing lives in ambient globals. Dropping the service without calling
/// [`RuntimeService::shutdown`] detaches the worker threads.
pub struct RuntimeService {
    wal: Arc<dyn WriteAheadLog>,
    surface: Arc<StateSurface>,
    sessions: Arc<SessionRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    bus: Arc<ObserverBus>,
    executor: IntentExecutor,
    worker: Mutex<Option<WorkerHandle>>,
    retry: RetryPolicy,
}

impl RuntimeService {
    /// Build the kernel with in-memory backends and start the worker pool.
    pub fn start(config: RuntimeConfig) -> Self {
        let wal: Arc<dyn WriteAheadLog> = Arc::new(InMemoryWal::with_config(config.wal));
        let surface = Arc::new(StateSurface::in_memory());
        let sessions = Arc::new(SessionRegistry::new(surface.clone()));
        let capabilities = Arc::new(CapabilityRegistry::new());
        let bus = Arc::new(ObserverBus::new(config.observer));
        let coordinator = Arc::new(SagaCoordinator::new(
            wal.clone(),
            surface.clone(),
            sessions.clone(),
            bus.clone(),
        ));
        let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());

        let executor = IntentExecutor::new(
            wal.clone(),
            surface.clone(),
            sessions.clone(),
            capabilities.clone(),
            coordinator.clone(),
            bus.clone(),
            queue.clone(),
        );

        let worker = SagaWorker::new(queue, coordinator).spawn(config.worker);
        info!("runtime plane started");

        Self {
            wal,
            surface,
            sessions,
            capabilities,
            bus,
            executor,
            worker: Mutex::new(Some(worker)),
            retry: config.retry,
        }
    }

    /// Create a session bound to one tenant.
    pub fn create_session(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        context: Option<Map<String, JsonValue>>,
    ) -> KernelResult<Session> {
        let tenant_id = TenantId::new(tenant_id)?;
        let session = self
            .sessions
            .create_session(tenant_id.clone(), user_id.map(UserId::new), context)
            .map_err(|e| KernelError::unknown(e.to_string()))?;

        self.wal
            .append(
                &tenant_id,
                WalEventType::SessionCreated,
                json!({
                    "session_id": session.session_id.to_string(),
                    "user_id": session.user_id.as_ref().map(|u| u.to_string()),
                }),
            )
            .map_err(|e| KernelError::unknown(e.to_string()))?;

        self.bus.notify(
            &LifecycleEvent::new(LifecycleEventKind::SessionCreated, tenant_id)
                .with_session(session.session_id),
        );

        Ok(session)
    }

    /// Submit an intent for execution. Returns as soon as the intent is
    /// accepted; poll [`RuntimeService::get_execution_status`] for progress.
    pub fn submit_intent(
        &self,
        session_id: SessionId,
        tenant_id: &str,
        intent_type: &str,
        payload: JsonValue,
    ) -> KernelResult<ExecutionId> {
        let tenant_id = TenantId::new(tenant_id)?;
        let intent = Intent::new(intent_type, session_id, tenant_id, payload);
        self.executor.execute(intent)
    }

    /// Tenant-checked execution status read.
    ///
    /// The lookup is namespaced by the caller's tenant, so another tenant's
    /// execution id reads as unknown rather than as someone else's data.
    pub fn get_execution_status(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &str,
    ) -> KernelResult<ExecutionRecord> {
        let tenant_id = TenantId::new(tenant_id)?;
        let key = StateKey::execution(tenant_id, execution_id);

        let value = self
            .retry
            .run(|| self.surface.get_state(&key))
            .map_err(|e| KernelError::unknown(e.to_string()))?;
        match value {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::unknown(e.to_string())),
            None => Err(KernelError::unknown(format!(
                "execution {execution_id} not found"
            ))),
        }
    }

    /// Request cooperative cancellation of a running execution.
    ///
    /// Appends the CANCEL_REQUESTED marker; the coordinator honors it before
    /// the next step. Cancelling a terminal execution is a no-op.
    pub fn cancel_execution(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &str,
    ) -> KernelResult<()> {
        let execution = self.get_execution_status(execution_id, tenant_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        self.wal
            .append(
                &execution.tenant_id,
                WalEventType::CancelRequested,
                json!({
                    "execution_id": execution_id.to_string(),
                    "session_id": execution.session_id.to_string(),
                }),
            )
            .map_err(|e| KernelError::unknown(e.to_string()))?;
        info!(execution_id = %execution_id, "cancellation requested");
        Ok(())
    }

    /// Audit read: every log entry correlated to one session, in order.
    pub fn replay_session(
        &self,
        session_id: &SessionId,
        tenant_id: &str,
    ) -> KernelResult<Vec<WalEntry>> {
        let tenant_id = TenantId::new(tenant_id)?;
        self.retry
            .run(|| self.wal.replay_session(session_id, &tenant_id))
            .map_err(|e| KernelError::unknown(e.to_string()))
    }

    /// Audit read over a tenant's full partition, optionally filtered.
    pub fn read_log(
        &self,
        tenant_id: &str,
        event_type: Option<WalEventType>,
    ) -> KernelResult<Vec<WalEntry>> {
        let tenant_id = TenantId::new(tenant_id)?;
        self.retry
            .run(|| self.wal.read(&tenant_id, event_type))
            .map_err(|e| KernelError::unknown(e.to_string()))
    }

    /// Realm-facing: claim an intent type. Call at realm startup, before any
    /// intent of that type is submitted.
    pub fn register_capability(
        &self,
        registration: CapabilityRegistration,
    ) -> Result<(), CapabilityError> {
        self.capabilities.register(registration)
    }

    /// Realm-facing: replace an existing registration.
    pub fn register_capability_override(&self, registration: CapabilityRegistration) {
        self.capabilities.register_override(registration)
    }

    pub fn deregister_capability(&self, intent_type: &str) -> bool {
        self.capabilities.deregister(intent_type)
    }

    /// Governance-facing: subscribe to lifecycle events from this point on.
    pub fn register_observer(&self, observer_id: impl Into<String>, observer: Arc<dyn Observer>) {
        self.bus.register_observer(observer_id, observer)
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.worker
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|w| w.stats()))
    }

    /// Stop the worker pool gracefully. Idempotent.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(worker) = guard.take() {
                worker.shutdown();
                info!("runtime plane stopped");
            }
        }
    }
}

impl Drop for RuntimeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
