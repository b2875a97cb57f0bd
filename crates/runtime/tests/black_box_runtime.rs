//! Black-box tests against the runtime façade: every interaction goes
//! through `RuntimeService`, and assertions poll for the background worker
//! the way a real caller would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value as JsonValue, json};

use runplane_core::ExecutionId;
use runplane_observer::{LifecycleEvent, LifecycleEventKind, ObserverBusConfig};
use runplane_runtime::{
    CapabilityRegistration, RuntimeConfig, RuntimeService, WorkerConfig,
};
use runplane_saga::{ExecutionRecord, ExecutionStatus, StepContext, StepDescriptor};
use runplane_wal::WalEventType;

const TENANT: &str = "acme";

fn service() -> RuntimeService {
    runplane_observability::init_for_tests();
    RuntimeService::start(RuntimeConfig {
        worker: WorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        ..RuntimeConfig::default()
    })
}

fn echo_capability() -> CapabilityRegistration {
    CapabilityRegistration::new(
        "noop.echo",
        "noop-realm",
        vec![StepDescriptor::new(
            "echo",
            Arc::new(|ctx: &StepContext| -> Result<JsonValue, String> {
                Ok(ctx.intent_payload.clone())
            }),
        )],
    )
}

/// Poll until the execution reaches a terminal state. The submit path
/// returns before any step runs, so callers always observe eventually.
fn await_terminal(
    service: &RuntimeService,
    execution_id: &ExecutionId,
    tenant: &str,
) -> ExecutionRecord {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(record) = service.get_execution_status(execution_id, tenant) {
            if record.status.is_terminal() {
                return record;
            }
        }
        assert!(
            Instant::now() < deadline,
            "execution did not reach a terminal state in time"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn echo_intent_completes_with_its_payload() {
    let service = service();
    service.register_capability(echo_capability()).unwrap();

    let session = service.create_session(TENANT, Some("u-1"), None).unwrap();
    let payload = json!({"message": "hello", "n": 42});
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "noop.echo", payload.clone())
        .unwrap();

    let record = await_terminal(&service, &execution_id, TENANT);
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.result, Some(payload));
    assert!(record.error.is_none());
}

#[test]
fn unregistered_intent_type_is_rejected_but_audited() {
    let service = service();
    let session = service.create_session(TENANT, None, None).unwrap();

    let err = service
        .submit_intent(session.session_id, TENANT, "ghost.nope", json!({}))
        .unwrap_err();
    assert_eq!(err.code(), "NoCapability");

    let received = service
        .read_log(TENANT, Some(WalEventType::IntentReceived))
        .unwrap();
    assert_eq!(received.len(), 1);
    assert!(
        service
            .read_log(TENANT, Some(WalEventType::SagaStarted))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn failed_second_step_compensates_the_first_in_the_log() {
    let service = service();

    let undone = Arc::new(AtomicBool::new(false));
    let undo_flag = undone.clone();
    let reserve = StepDescriptor::new(
        "reserve",
        Arc::new(|_: &StepContext| -> Result<JsonValue, String> {
            Ok(json!({"reserved": true}))
        }),
    )
    .with_compensation(Arc::new(move |_: &StepContext| -> Result<JsonValue, String> {
        undo_flag.store(true, Ordering::SeqCst);
        Ok(JsonValue::Null)
    }));
    let charge = StepDescriptor::new(
        "charge",
        Arc::new(|_: &StepContext| -> Result<JsonValue, String> {
            Err("card declined".to_string())
        }),
    );
    service
        .register_capability(CapabilityRegistration::new(
            "order.place",
            "orders-realm",
            vec![reserve, charge],
        ))
        .unwrap();

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "order.place", json!({"sku": "w-1"}))
        .unwrap();

    let record = await_terminal(&service, &execution_id, TENANT);
    assert_eq!(record.status, ExecutionStatus::Failed);
    let error = record.error.unwrap();
    assert_eq!(error.code, "SagaExecutionFailed");
    assert!(error.message.contains("card declined"));
    assert!(undone.load(Ordering::SeqCst));

    // The saga's portion of the log tells the whole story in order.
    let saga_events: Vec<WalEventType> = service
        .read_log(TENANT, None)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .skip_while(|t| *t != WalEventType::SagaStarted)
        .collect();
    assert_eq!(
        saga_events,
        vec![
            WalEventType::SagaStarted,
            WalEventType::StepCompleted,
            WalEventType::StepFailed,
            WalEventType::StepCompleted,
            WalEventType::SagaFailed,
        ]
    );
}

#[test]
fn same_user_id_in_two_tenants_stays_isolated() {
    let service = service();
    service.register_capability(echo_capability()).unwrap();

    let a = service.create_session("acme", Some("shared-user"), None).unwrap();
    let b = service.create_session("globex", Some("shared-user"), None).unwrap();
    assert_ne!(a.session_id, b.session_id);

    // Submitting against the wrong tenant is a mismatch, never a crossover.
    let err = service
        .submit_intent(b.session_id, "acme", "noop.echo", json!({}))
        .unwrap_err();
    assert_eq!(err.code(), "TenantMismatch");

    // Neither tenant's audit trail mentions the other's session.
    let acme_log = service.replay_session(&a.session_id, "acme").unwrap();
    assert!(!acme_log.is_empty());
    assert!(service.replay_session(&b.session_id, "acme").unwrap().is_empty());
}

#[test]
fn observers_hear_the_lifecycle_exactly_once_despite_a_slow_peer() {
    runplane_observability::init_for_tests();
    let service = RuntimeService::start(RuntimeConfig {
        worker: WorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        observer: ObserverBusConfig::default().with_timeout(Duration::from_millis(50)),
        ..RuntimeConfig::default()
    });
    service.register_capability(echo_capability()).unwrap();

    let logs: Vec<Arc<Mutex<Vec<LifecycleEventKind>>>> =
        (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    for (i, log) in logs.iter().enumerate() {
        let log = log.clone();
        service.register_observer(
            format!("observer-{i}"),
            Arc::new(move |event: &LifecycleEvent| {
                log.lock().unwrap().push(event.kind);
            }),
        );
    }
    // A governance observer that always overruns its delivery slot.
    service.register_observer(
        "sleeper",
        Arc::new(|_: &LifecycleEvent| {
            thread::sleep(Duration::from_millis(400));
        }),
    );

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "noop.echo", json!({"k": 1}))
        .unwrap();
    await_terminal(&service, &execution_id, TENANT);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let done = logs.iter().all(|log| {
            log.lock()
                .unwrap()
                .contains(&LifecycleEventKind::ExecutionCompleted)
        });
        if done {
            break;
        }
        assert!(Instant::now() < deadline, "observers never saw completion");
        thread::sleep(Duration::from_millis(10));
    }

    for log in &logs {
        let seen = log.lock().unwrap().clone();
        let submitted = seen
            .iter()
            .filter(|k| **k == LifecycleEventKind::IntentSubmitted)
            .count();
        let completed = seen
            .iter()
            .filter(|k| **k == LifecycleEventKind::ExecutionCompleted)
            .count();
        assert_eq!(submitted, 1);
        assert_eq!(completed, 1);
        // Emission order is preserved per observer.
        let submitted_at = seen
            .iter()
            .position(|k| *k == LifecycleEventKind::IntentSubmitted)
            .unwrap();
        let completed_at = seen
            .iter()
            .position(|k| *k == LifecycleEventKind::ExecutionCompleted)
            .unwrap();
        assert!(submitted_at < completed_at);
    }
}

#[test]
fn cancellation_between_steps_stops_the_saga() {
    let service = service();

    let cancel_issued = Arc::new(AtomicBool::new(false));
    let gate = cancel_issued.clone();
    let first = StepDescriptor::new(
        "wait-for-cancel",
        Arc::new(move |_: &StepContext| -> Result<JsonValue, String> {
            // Hold the saga in step 1 until the caller has cancelled, so the
            // marker is guaranteed to exist before step 2's pre-check.
            let deadline = Instant::now() + Duration::from_secs(5);
            while !gate.load(Ordering::SeqCst) {
                if Instant::now() > deadline {
                    return Err("cancel never arrived".to_string());
                }
                thread::sleep(Duration::from_millis(5));
            }
            Ok(JsonValue::Null)
        }),
    );
    let second_ran = Arc::new(AtomicBool::new(false));
    let second_flag = second_ran.clone();
    let second = StepDescriptor::new(
        "never-runs",
        Arc::new(move |_: &StepContext| -> Result<JsonValue, String> {
            second_flag.store(true, Ordering::SeqCst);
            Ok(JsonValue::Null)
        }),
    );
    service
        .register_capability(CapabilityRegistration::new(
            "slow.work",
            "batch-realm",
            vec![first, second],
        ))
        .unwrap();

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "slow.work", json!({}))
        .unwrap();

    service.cancel_execution(&execution_id, TENANT).unwrap();
    cancel_issued.store(true, Ordering::SeqCst);

    let record = await_terminal(&service, &execution_id, TENANT);
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().message.contains("cancelled"));
    assert!(!second_ran.load(Ordering::SeqCst));
}

#[test]
fn terminal_status_reads_are_byte_identical() {
    let service = service();
    service.register_capability(echo_capability()).unwrap();

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "noop.echo", json!({"v": true}))
        .unwrap();
    await_terminal(&service, &execution_id, TENANT);

    let first = serde_json::to_string(
        &service.get_execution_status(&execution_id, TENANT).unwrap(),
    )
    .unwrap();

    // Cancelling a finished execution is a no-op and must not disturb it.
    service.cancel_execution(&execution_id, TENANT).unwrap();

    let second = serde_json::to_string(
        &service.get_execution_status(&execution_id, TENANT).unwrap(),
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn replay_returns_the_sessions_full_story_in_order() {
    let service = service();
    service.register_capability(echo_capability()).unwrap();

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "noop.echo", json!({}))
        .unwrap();
    await_terminal(&service, &execution_id, TENANT);

    // The final log entry lands just after the status flips; poll for it.
    let deadline = Instant::now() + Duration::from_secs(5);
    let replay = loop {
        let replay = service.replay_session(&session.session_id, TENANT).unwrap();
        if replay
            .iter()
            .any(|e| e.event_type == WalEventType::ExecutionCompleted)
        {
            break replay;
        }
        assert!(Instant::now() < deadline, "completion entry never appeared");
        thread::sleep(Duration::from_millis(10));
    };
    let types: Vec<WalEventType> = replay.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            WalEventType::SessionCreated,
            WalEventType::IntentReceived,
            WalEventType::SagaStarted,
            WalEventType::StepCompleted,
            WalEventType::SagaCompleted,
            WalEventType::ExecutionCompleted,
        ]
    );
    let sequences: Vec<u64> = replay.iter().map(|e| e.sequence_number).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn worker_reports_stats_and_shuts_down_idempotently() {
    let service = service();
    service.register_capability(echo_capability()).unwrap();

    let session = service.create_session(TENANT, None, None).unwrap();
    let execution_id = service
        .submit_intent(session.session_id, TENANT, "noop.echo", json!({}))
        .unwrap();
    await_terminal(&service, &execution_id, TENANT);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = service.worker_stats().expect("worker running");
        if stats.sagas_processed >= 1 {
            assert_eq!(stats.sagas_succeeded, 1);
            break;
        }
        assert!(Instant::now() < deadline, "stats never caught up");
        thread::sleep(Duration::from_millis(10));
    }

    service.shutdown();
    assert!(service.worker_stats().is_none());
    // Second shutdown is a no-op.
    service.shutdown();
}
