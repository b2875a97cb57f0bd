//! The saga coordinator: drives step sequences through the state machine.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use runplane_core::{ExecutionId, Intent, SagaId, TenantId};
use runplane_observer::{LifecycleEvent, LifecycleEventKind, ObserverBus};
use runplane_session::SessionRegistry;
use runplane_state::{StateError, StateKey, StateSurface, StateTier};
use runplane_wal::{WalError, WalEventType, WriteAheadLog};

use crate::record::{ExecutionFailure, ExecutionRecord, SagaRecord, SagaStatus};
use crate::step::{StepContext, StepDescriptor, StepHandler};

/// Saga coordination error.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga {0} not found")]
    NotFound(SagaId),

    /// The saga record exists but this process holds no step handlers for
    /// it (e.g. after a restart).
    #[error("saga {0} has no live step handlers")]
    HandlersUnavailable(SagaId),

    #[error("invalid saga transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("record serialization failed: {0}")]
    Serialization(String),
}

/// Outcome of driving one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A step completed and more remain.
    Advanced { step: String },
    /// The final step completed; saga and execution are COMPLETED.
    Completed,
    /// A step failed, timed out, or the execution was cancelled; the saga
    /// is FAILED (after any compensation pass).
    Failed { error: ExecutionFailure },
}

/// Outcome of a compensation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationResult {
    /// Names of steps whose compensation completed, in reverse completion
    /// order.
    pub compensated: Vec<String>,
    /// First compensation that failed (step name, reason), if any. The pass
    /// stops there: remaining undo state is uncertain.
    pub failed: Option<(String, String)>,
}

/// Step handlers held in memory for sagas this process is driving.
struct LiveSaga {
    tenant_id: TenantId,
    intent_payload: JsonValue,
    steps: Vec<StepDescriptor>,
}

/// Drives registered step sequences for executions.
///
/// The coordinator is the only writer of saga and execution records. Every
/// transition appends a WAL entry before observers hear about it; terminal
/// records are written to the durable tier.
pub struct SagaCoordinator {
    wal: Arc<dyn WriteAheadLog>,
    surface: Arc<StateSurface>,
    sessions: Arc<SessionRegistry>,
    bus: Arc<ObserverBus>,
    live: RwLock<HashMap<SagaId, LiveSaga>>,
}

impl SagaCoordinator {
    pub fn new(
        wal: Arc<dyn WriteAheadLog>,
        surface: Arc<StateSurface>,
        sessions: Arc<SessionRegistry>,
        bus: Arc<ObserverBus>,
    ) -> Self {
        Self {
            wal,
            surface,
            sessions,
            bus,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Create and start a saga for one execution.
    ///
    /// Writes the PENDING record, appends SAGA_STARTED, transitions to
    /// RUNNING, and marks the execution RUNNING. Steps are not executed
    /// here; a worker drives them via `execute_next_step`.
    pub fn start_saga(
        &self,
        execution_id: ExecutionId,
        intent: &Intent,
        steps: Vec<StepDescriptor>,
    ) -> Result<SagaId, SagaError> {
        if steps.is_empty() {
            return Err(SagaError::InvalidTransition(
                "saga requires at least one step".to_string(),
            ));
        }

        let saga_id = SagaId::new();
        let step_names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
        let mut record = SagaRecord::new(
            saga_id,
            execution_id,
            intent.tenant_id.clone(),
            intent.session_id,
            step_names.clone(),
        );
        self.save_saga(&record)?;

        self.wal.append(
            &record.tenant_id,
            WalEventType::SagaStarted,
            json!({
                "saga_id": saga_id.to_string(),
                "execution_id": execution_id.to_string(),
                "session_id": record.session_id.to_string(),
                "steps": step_names,
            }),
        )?;

        record.status = SagaStatus::Running;
        record.touch();
        self.save_saga(&record)?;

        self.update_execution(&record.tenant_id, &execution_id, |execution| {
            execution.mark_running(saga_id);
        })?;

        if let Err(e) =
            self.sessions
                .attach_saga(&record.session_id, &record.tenant_id, saga_id)
        {
            warn!(saga_id = %saga_id, error = %e, "failed to attach saga to session");
        }

        if let Ok(mut live) = self.live.write() {
            live.insert(
                saga_id,
                LiveSaga {
                    tenant_id: record.tenant_id.clone(),
                    intent_payload: intent.payload.clone(),
                    steps,
                },
            );
        }

        info!(
            saga_id = %saga_id,
            execution_id = %execution_id,
            tenant_id = %record.tenant_id,
            "saga started"
        );
        self.notify(
            LifecycleEvent::new(LifecycleEventKind::ExecutionStarted, record.tenant_id.clone())
                .with_session(record.session_id)
                .with_execution(execution_id)
                .with_saga(saga_id),
        );

        Ok(saga_id)
    }

    /// Execute the next step of a RUNNING saga.
    ///
    /// Checks the cooperative cancellation marker first; cancellation is
    /// honored between steps, never mid-step.
    pub fn execute_next_step(&self, saga_id: &SagaId) -> Result<StepOutcome, SagaError> {
        let tenant_id = self.live_tenant(saga_id)?;
        let mut record = self.load_saga(&tenant_id, saga_id)?;

        if record.status != SagaStatus::Running {
            return Err(SagaError::InvalidTransition(format!(
                "cannot execute step while saga is {:?}",
                record.status
            )));
        }

        if self.cancel_requested(&record)? {
            let failure = ExecutionFailure::new(
                "SagaExecutionFailed",
                "execution cancelled by caller",
            );
            let index = record.current_step_index;
            return self.fail_saga(record, failure, index).map(|(outcome, _)| outcome);
        }

        if record.current_step_index >= record.step_names.len() {
            // Normally unreachable: completion happens when the final step
            // advances the index.
            return self.complete_saga(record);
        }

        let index = record.current_step_index;
        let (step, ctx) = self.step_context(&record, index)?;

        debug!(
            saga_id = %record.saga_id,
            step = %step.name,
            index,
            "executing saga step"
        );

        match run_with_timeout(step.handler.clone(), ctx, step.timeout) {
            Ok(output) => {
                self.wal.append(
                    &record.tenant_id,
                    WalEventType::StepCompleted,
                    json!({
                        "saga_id": record.saga_id.to_string(),
                        "session_id": record.session_id.to_string(),
                        "step": step.name,
                        "index": index,
                        "compensation": false,
                    }),
                )?;

                record.context.insert(step.name.clone(), output.clone());
                record.last_output = Some(output);
                record.current_step_index += 1;
                record.touch();
                self.save_saga(&record)?;

                self.notify(
                    LifecycleEvent::new(
                        LifecycleEventKind::StepCompleted,
                        record.tenant_id.clone(),
                    )
                    .with_session(record.session_id)
                    .with_execution(record.execution_id)
                    .with_saga(record.saga_id)
                    .with_detail(json!({"step": step.name, "index": index})),
                );

                if record.current_step_index == record.step_names.len() {
                    self.complete_saga(record)
                } else {
                    Ok(StepOutcome::Advanced { step: step.name })
                }
            }
            Err(StepFailure::TimedOut) => {
                let message =
                    format!("step '{}' timed out after {:?}", step.name, step.timeout);
                self.record_step_failure(&record, &step.name, index, &message)?;
                self.fail_saga(record, ExecutionFailure::new("Timeout", message), index)
                    .map(|(outcome, _)| outcome)
            }
            Err(StepFailure::Failed(cause)) => {
                let message = format!("step '{}' failed: {cause}", step.name);
                self.record_step_failure(&record, &step.name, index, &message)?;
                self.fail_saga(
                    record,
                    ExecutionFailure::new("SagaExecutionFailed", message),
                    index,
                )
                .map(|(outcome, _)| outcome)
            }
        }
    }

    /// Run the saga to a terminal state, step by step.
    pub fn run_to_completion(&self, saga_id: &SagaId) -> Result<SagaStatus, SagaError> {
        loop {
            match self.execute_next_step(saga_id)? {
                StepOutcome::Advanced { .. } => continue,
                StepOutcome::Completed => return Ok(SagaStatus::Completed),
                StepOutcome::Failed { .. } => return Ok(SagaStatus::Failed),
            }
        }
    }

    /// Finalize a saga whose run was aborted by an infrastructure error.
    ///
    /// When a WAL append or state write fails mid-run, `run_to_completion`
    /// returns `Err` before any terminal transition, which would otherwise
    /// leave the execution record RUNNING with no error. This records the
    /// outcome with whatever infrastructure still answers: if the terminal
    /// saga write already landed the execution is finished forward, otherwise
    /// both records are failed with an `Unknown` cause. Individual write
    /// failures here are logged and skipped.
    pub fn abandon(&self, saga_id: &SagaId, cause: &str) {
        let Ok(tenant_id) = self.live_tenant(saga_id) else {
            // Already archived: the saga reached a terminal transition.
            return;
        };
        let Ok(mut record) = self.load_saga(&tenant_id, saga_id) else {
            return;
        };

        match record.status {
            SagaStatus::Completed => {
                let result = record.last_output.clone().unwrap_or(JsonValue::Null);
                if let Err(e) = self.update_execution(
                    &record.tenant_id,
                    &record.execution_id,
                    move |execution| execution.complete(result),
                ) {
                    warn!(execution_id = %record.execution_id, error = %e, "could not finish execution record");
                }
                self.archive(&record);
                self.notify(
                    LifecycleEvent::new(
                        LifecycleEventKind::ExecutionCompleted,
                        record.tenant_id.clone(),
                    )
                    .with_session(record.session_id)
                    .with_execution(record.execution_id)
                    .with_saga(record.saga_id),
                );
            }
            SagaStatus::Failed => {
                let failure = record
                    .error
                    .clone()
                    .unwrap_or_else(|| ExecutionFailure::new("Unknown", cause));
                if let Err(e) = self.update_execution(
                    &record.tenant_id,
                    &record.execution_id,
                    move |execution| execution.fail(failure),
                ) {
                    warn!(execution_id = %record.execution_id, error = %e, "could not record execution failure");
                }
                self.archive(&record);
            }
            _ => {
                let failure = ExecutionFailure::new("Unknown", cause);
                record.status = SagaStatus::Failed;
                record.error = Some(failure.clone());
                record.touch();
                if let Err(e) = self.save_saga(&record) {
                    warn!(saga_id = %record.saga_id, error = %e, "could not persist abandoned saga");
                }
                let _ = self.wal.append(
                    &record.tenant_id,
                    WalEventType::SagaFailed,
                    json!({
                        "saga_id": record.saga_id.to_string(),
                        "session_id": record.session_id.to_string(),
                        "execution_id": record.execution_id.to_string(),
                        "error": failure.message,
                    }),
                );
                let terminal_failure = failure.clone();
                if let Err(e) = self.update_execution(
                    &record.tenant_id,
                    &record.execution_id,
                    move |execution| execution.fail(terminal_failure),
                ) {
                    warn!(execution_id = %record.execution_id, error = %e, "could not record execution failure");
                }
                warn!(
                    saga_id = %record.saga_id,
                    execution_id = %record.execution_id,
                    error = %cause,
                    "saga abandoned after infrastructure failure"
                );
                self.archive(&record);
                self.notify(
                    LifecycleEvent::new(
                        LifecycleEventKind::ExecutionFailed,
                        record.tenant_id.clone(),
                    )
                    .with_session(record.session_id)
                    .with_execution(record.execution_id)
                    .with_saga(record.saga_id)
                    .with_detail(json!({"error": failure.message, "code": failure.code})),
                );
            }
        }
    }

    /// Caller-driven compensation of a RUNNING saga.
    ///
    /// Runs the compensation pass over completed steps and finalizes the
    /// saga as FAILED with a "compensation requested" cause.
    pub fn compensate(&self, saga_id: &SagaId) -> Result<CompensationResult, SagaError> {
        let tenant_id = self.live_tenant(saga_id)?;
        let record = self.load_saga(&tenant_id, saga_id)?;

        if record.status != SagaStatus::Running {
            return Err(SagaError::InvalidTransition(format!(
                "cannot compensate a saga that is {:?}",
                record.status
            )));
        }

        let failure = ExecutionFailure::new("SagaExecutionFailed", "compensation requested");
        let eligible_from = record.current_step_index;
        let (_, pass) = self.fail_saga(record, failure, eligible_from)?;
        Ok(pass)
    }

    /// Latest persisted saga record (status queries, tests).
    pub fn saga_record(
        &self,
        tenant_id: &TenantId,
        saga_id: &SagaId,
    ) -> Result<SagaRecord, SagaError> {
        self.load_saga(tenant_id, saga_id)
    }

    // ---- internals ----

    fn live_tenant(&self, saga_id: &SagaId) -> Result<TenantId, SagaError> {
        let live = self
            .live
            .read()
            .map_err(|_| StateError::Unavailable("live saga table poisoned".to_string()))?;
        live.get(saga_id)
            .map(|l| l.tenant_id.clone())
            .ok_or(SagaError::HandlersUnavailable(*saga_id))
    }

    fn step_context(
        &self,
        record: &SagaRecord,
        index: usize,
    ) -> Result<(StepDescriptor, StepContext), SagaError> {
        let live = self
            .live
            .read()
            .map_err(|_| StateError::Unavailable("live saga table poisoned".to_string()))?;
        let live_saga = live
            .get(&record.saga_id)
            .ok_or(SagaError::HandlersUnavailable(record.saga_id))?;
        let step = live_saga
            .steps
            .get(index)
            .cloned()
            .ok_or_else(|| {
                SagaError::InvalidTransition(format!("step index {index} out of range"))
            })?;

        let ctx = StepContext {
            tenant_id: record.tenant_id.clone(),
            session_id: record.session_id,
            execution_id: record.execution_id,
            saga_id: record.saga_id,
            intent_payload: live_saga.intent_payload.clone(),
            accumulated: JsonValue::Object(record.context.clone()),
        };
        Ok((step, ctx))
    }

    fn cancel_requested(&self, record: &SagaRecord) -> Result<bool, SagaError> {
        let markers = self
            .wal
            .read(&record.tenant_id, Some(WalEventType::CancelRequested))?;
        let execution_id = record.execution_id.to_string();
        Ok(markers.iter().any(|e| {
            e.payload.get("execution_id").and_then(|v| v.as_str()) == Some(execution_id.as_str())
        }))
    }

    fn record_step_failure(
        &self,
        record: &SagaRecord,
        step_name: &str,
        index: usize,
        message: &str,
    ) -> Result<(), SagaError> {
        self.wal.append(
            &record.tenant_id,
            WalEventType::StepFailed,
            json!({
                "saga_id": record.saga_id.to_string(),
                "session_id": record.session_id.to_string(),
                "step": step_name,
                "index": index,
                "error": message,
            }),
        )?;

        self.notify(
            LifecycleEvent::new(LifecycleEventKind::StepFailed, record.tenant_id.clone())
                .with_session(record.session_id)
                .with_execution(record.execution_id)
                .with_saga(record.saga_id)
                .with_detail(json!({"step": step_name, "index": index, "error": message})),
        );
        Ok(())
    }

    fn complete_saga(&self, mut record: SagaRecord) -> Result<StepOutcome, SagaError> {
        record.status = SagaStatus::Completed;
        record.touch();
        self.save_saga(&record)?;

        self.wal.append(
            &record.tenant_id,
            WalEventType::SagaCompleted,
            json!({
                "saga_id": record.saga_id.to_string(),
                "session_id": record.session_id.to_string(),
                "execution_id": record.execution_id.to_string(),
            }),
        )?;

        let result = record.last_output.clone().unwrap_or(JsonValue::Null);
        self.update_execution(&record.tenant_id, &record.execution_id, move |execution| {
            execution.complete(result);
        })?;

        self.wal.append(
            &record.tenant_id,
            WalEventType::ExecutionCompleted,
            json!({
                "execution_id": record.execution_id.to_string(),
                "session_id": record.session_id.to_string(),
                "status": "completed",
            }),
        )?;

        self.archive(&record);
        info!(
            saga_id = %record.saga_id,
            execution_id = %record.execution_id,
            "saga completed"
        );
        self.notify(
            LifecycleEvent::new(
                LifecycleEventKind::ExecutionCompleted,
                record.tenant_id.clone(),
            )
            .with_session(record.session_id)
            .with_execution(record.execution_id)
            .with_saga(record.saga_id),
        );

        Ok(StepOutcome::Completed)
    }

    /// Finalize a saga as FAILED, compensating completed steps first when
    /// any step up to `failed_index` declares a compensation handler.
    fn fail_saga(
        &self,
        mut record: SagaRecord,
        mut failure: ExecutionFailure,
        failed_index: usize,
    ) -> Result<(StepOutcome, CompensationResult), SagaError> {
        let eligible = self.compensation_eligible(&record.saga_id, failed_index)?;

        let mut pass = CompensationResult::default();
        if eligible && record.current_step_index > 0 {
            record.status = SagaStatus::Compensating;
            record.touch();
            self.save_saga(&record)?;

            pass = self.run_compensations(&mut record)?;
            if let Some((step, reason)) = &pass.failed {
                failure = failure
                    .with_secondary(format!("compensation of step '{step}' failed: {reason}"));
            }
        }

        record.status = SagaStatus::Failed;
        record.error = Some(failure.clone());
        record.touch();
        self.save_saga(&record)?;

        self.wal.append(
            &record.tenant_id,
            WalEventType::SagaFailed,
            json!({
                "saga_id": record.saga_id.to_string(),
                "session_id": record.session_id.to_string(),
                "execution_id": record.execution_id.to_string(),
                "error": failure.message,
            }),
        )?;

        let terminal_failure = failure.clone();
        self.update_execution(&record.tenant_id, &record.execution_id, move |execution| {
            execution.fail(terminal_failure);
        })?;

        self.archive(&record);
        warn!(
            saga_id = %record.saga_id,
            execution_id = %record.execution_id,
            error = %failure.message,
            "saga failed"
        );
        self.notify(
            LifecycleEvent::new(
                LifecycleEventKind::ExecutionFailed,
                record.tenant_id.clone(),
            )
            .with_session(record.session_id)
            .with_execution(record.execution_id)
            .with_saga(record.saga_id)
            .with_detail(json!({"error": failure.message, "code": failure.code})),
        );

        Ok((StepOutcome::Failed { error: failure }, pass))
    }

    fn compensation_eligible(
        &self,
        saga_id: &SagaId,
        failed_index: usize,
    ) -> Result<bool, SagaError> {
        let live = self
            .live
            .read()
            .map_err(|_| StateError::Unavailable("live saga table poisoned".to_string()))?;
        let live_saga = live
            .get(saga_id)
            .ok_or(SagaError::HandlersUnavailable(*saga_id))?;
        let upper = (failed_index + 1).min(live_saga.steps.len());
        Ok(live_saga.steps[..upper].iter().any(|s| s.compensation.is_some()))
    }

    /// Invoke compensations for completed steps, in reverse completion
    /// order. Stops at the first compensation failure.
    fn run_compensations(
        &self,
        record: &mut SagaRecord,
    ) -> Result<CompensationResult, SagaError> {
        let mut result = CompensationResult::default();

        for index in (0..record.current_step_index).rev() {
            let (step, ctx) = self.step_context(record, index)?;
            let Some(compensation) = step.compensation.clone() else {
                record.current_step_index = index;
                record.touch();
                self.save_saga(record)?;
                continue;
            };

            match run_with_timeout(compensation, ctx, step.timeout) {
                Ok(_) => {
                    self.wal.append(
                        &record.tenant_id,
                        WalEventType::StepCompleted,
                        json!({
                            "saga_id": record.saga_id.to_string(),
                            "session_id": record.session_id.to_string(),
                            "step": step.name,
                            "index": index,
                            "compensation": true,
                        }),
                    )?;
                    record.current_step_index = index;
                    record.touch();
                    self.save_saga(record)?;
                    result.compensated.push(step.name.clone());
                }
                Err(failure) => {
                    let reason = match failure {
                        StepFailure::TimedOut => {
                            format!("timed out after {:?}", step.timeout)
                        }
                        StepFailure::Failed(cause) => cause,
                    };
                    self.wal.append(
                        &record.tenant_id,
                        WalEventType::StepFailed,
                        json!({
                            "saga_id": record.saga_id.to_string(),
                            "session_id": record.session_id.to_string(),
                            "step": step.name,
                            "index": index,
                            "compensation": true,
                            "error": reason,
                        }),
                    )?;
                    result.failed = Some((step.name.clone(), reason));
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Terminal records go to the durable tier; live handlers and the
    /// session's active-saga entry are released.
    fn archive(&self, record: &SagaRecord) {
        if let Err(e) =
            self.sessions
                .detach_saga(&record.session_id, &record.tenant_id, &record.saga_id)
        {
            warn!(saga_id = %record.saga_id, error = %e, "failed to detach saga from session");
        }
        if let Ok(mut live) = self.live.write() {
            live.remove(&record.saga_id);
        }
    }

    fn load_saga(
        &self,
        tenant_id: &TenantId,
        saga_id: &SagaId,
    ) -> Result<SagaRecord, SagaError> {
        let key = StateKey::saga(tenant_id.clone(), saga_id);
        match self.surface.get_state(&key)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| SagaError::Serialization(e.to_string())),
            None => Err(SagaError::NotFound(*saga_id)),
        }
    }

    fn save_saga(&self, record: &SagaRecord) -> Result<(), SagaError> {
        let key = StateKey::saga(record.tenant_id.clone(), &record.saga_id);
        let value = serde_json::to_value(record)
            .map_err(|e| SagaError::Serialization(e.to_string()))?;
        let tier = if record.status.is_terminal() {
            StateTier::Durable
        } else {
            StateTier::Hot
        };
        self.surface.set_state(&key, value, None, tier)?;
        Ok(())
    }

    /// Mutate the execution record, unless it is already terminal
    /// (terminal records are immutable).
    fn update_execution<F>(
        &self,
        tenant_id: &TenantId,
        execution_id: &ExecutionId,
        f: F,
    ) -> Result<(), SagaError>
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let key = StateKey::execution(tenant_id.clone(), execution_id);
        self.surface
            .update(&key, None, StateTier::Durable, move |current| {
                // Missing, unreadable, or terminal records are left as-is.
                let mut execution = serde_json::from_value::<ExecutionRecord>(current?).ok()?;
                if execution.status.is_terminal() {
                    return None;
                }
                f(&mut execution);
                serde_json::to_value(&execution).ok()
            })?;
        Ok(())
    }

    fn notify(&self, event: LifecycleEvent) {
        let report = self.bus.notify(&event);
        if !report.is_complete() {
            debug!(
                kind = %event.kind,
                failed = report.failed.len(),
                "partial observer delivery"
            );
        }
    }
}

enum StepFailure {
    Failed(String),
    TimedOut,
}

/// Run a handler on a helper thread, bounded by `timeout`.
///
/// A handler that overruns keeps running on the detached thread; the saga
/// treats it as failed. A panicking handler surfaces as a failure instead
/// of unwinding into the coordinator.
fn run_with_timeout(
    handler: Arc<dyn StepHandler>,
    ctx: StepContext,
    timeout: Duration,
) -> Result<JsonValue, StepFailure> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = handler.invoke(&ctx);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(cause)) => Err(StepFailure::Failed(cause)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(StepFailure::TimedOut),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(StepFailure::Failed("step handler panicked".to_string()))
        }
    }
}
