//! Observer fan-out with per-observer isolation.
//!
//! Dispatch strategy: deliver to all, collect failures separately. Each
//! observer callback runs on a helper thread and the bus waits for at most
//! the configured per-observer timeout; a callback that overruns (or panics)
//! is reported in the `DeliveryReport` and cannot delay the remaining
//! observers past its own slot. Observers never get a return path into
//! execution.

use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::event::LifecycleEvent;

/// A registered, read-only consumer of lifecycle events.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> Observer for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Observer bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverBusConfig {
    /// Upper bound on how long one observer may hold up dispatch.
    pub per_observer_timeout: Duration,
}

impl Default for ObserverBusConfig {
    fn default() -> Self {
        Self {
            per_observer_timeout: Duration::from_millis(250),
        }
    }
}

impl ObserverBusConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_observer_timeout = timeout;
        self
    }
}

/// Outcome of delivering one event to all registered observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Observer ids that acknowledged within their timeout, in dispatch
    /// order.
    pub delivered: Vec<String>,
    /// Observer ids that failed, with the reason ("timed out", "panicked").
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fan-out notification channel for governance observers.
///
/// Observers are notified in registration order. Registration is
/// prospective only: a newly registered observer receives events from that
/// point forward (no historical replay).
pub struct ObserverBus {
    observers: RwLock<Vec<(String, Arc<dyn Observer>)>>,
    config: ObserverBusConfig,
}

impl ObserverBus {
    pub fn new(config: ObserverBusConfig) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn register_observer(&self, observer_id: impl Into<String>, observer: Arc<dyn Observer>) {
        let observer_id = observer_id.into();
        if let Ok(mut observers) = self.observers.write() {
            debug!(observer_id = %observer_id, "observer registered");
            observers.push((observer_id, observer));
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Deliver `event` to every registered observer.
    ///
    /// Never fails from the emitter's perspective; per-observer failures are
    /// logged and collected in the returned report.
    pub fn notify(&self, event: &LifecycleEvent) -> DeliveryReport {
        let snapshot: Vec<(String, Arc<dyn Observer>)> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => {
                warn!("observer list poisoned; dropping notification");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();

        for (observer_id, observer) in snapshot {
            match self.dispatch_one(&observer, event) {
                Ok(()) => {
                    debug!(observer_id = %observer_id, kind = %event.kind, "observer notified");
                    report.delivered.push(observer_id);
                }
                Err(reason) => {
                    warn!(
                        observer_id = %observer_id,
                        kind = %event.kind,
                        reason = %reason,
                        "observer delivery failed"
                    );
                    report.failed.push((observer_id, reason));
                }
            }
        }

        report
    }

    fn dispatch_one(
        &self,
        observer: &Arc<dyn Observer>,
        event: &LifecycleEvent,
    ) -> Result<(), String> {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let observer = observer.clone();
        let event = event.clone();

        // The helper thread outlives a timeout; it just can no longer delay
        // the bus. A panicking callback drops the sender, which surfaces as
        // a disconnect here instead of unwinding into the kernel.
        std::thread::spawn(move || {
            observer.on_event(&event);
            let _ = done_tx.send(());
        });

        match done_rx.recv_timeout(self.config.per_observer_timeout) {
            Ok(()) => Ok(()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err("timed out".to_string()),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err("panicked".to_string()),
        }
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new(ObserverBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LifecycleEventKind;
    use runplane_core::TenantId;
    use std::sync::Mutex;

    fn event() -> LifecycleEvent {
        LifecycleEvent::new(
            LifecycleEventKind::IntentSubmitted,
            TenantId::new("acme").unwrap(),
        )
    }

    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Observer for Recorder {
        fn on_event(&self, _event: &LifecycleEvent) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    #[test]
    fn delivers_to_all_observers_in_registration_order() {
        let bus = ObserverBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in ["security", "telemetry", "policy"] {
            bus.register_observer(
                id,
                Arc::new(Recorder {
                    id,
                    log: log.clone(),
                }),
            );
        }

        let report = bus.notify(&event());

        assert!(report.is_complete());
        assert_eq!(report.delivered, vec!["security", "telemetry", "policy"]);
        assert_eq!(*log.lock().unwrap(), vec!["security", "telemetry", "policy"]);
    }

    #[test]
    fn slow_observer_times_out_without_blocking_others() {
        let bus = ObserverBus::new(
            ObserverBusConfig::default().with_timeout(Duration::from_millis(30)),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register_observer(
            "fast-1",
            Arc::new(Recorder {
                id: "fast-1",
                log: log.clone(),
            }),
        );
        bus.register_observer(
            "sleeper",
            Arc::new(|_: &LifecycleEvent| {
                std::thread::sleep(Duration::from_millis(200));
            }),
        );
        bus.register_observer(
            "fast-2",
            Arc::new(Recorder {
                id: "fast-2",
                log: log.clone(),
            }),
        );

        let report = bus.notify(&event());

        assert_eq!(report.delivered, vec!["fast-1", "fast-2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "sleeper");
        assert_eq!(*log.lock().unwrap(), vec!["fast-1", "fast-2"]);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let bus = ObserverBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register_observer(
            "chaos",
            Arc::new(|_: &LifecycleEvent| panic!("observer bug")),
        );
        bus.register_observer(
            "steady",
            Arc::new(Recorder {
                id: "steady",
                log: log.clone(),
            }),
        );

        let report = bus.notify(&event());

        assert_eq!(report.delivered, vec!["steady"]);
        assert_eq!(report.failed[0].0, "chaos");
        assert_eq!(report.failed[0].1, "panicked");
    }

    #[test]
    fn each_event_is_delivered_exactly_once_per_observer() {
        let bus = ObserverBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register_observer(
            "counter",
            Arc::new(Recorder {
                id: "counter",
                log: log.clone(),
            }),
        );

        bus.notify(&event());
        bus.notify(&event());

        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
