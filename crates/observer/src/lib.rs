//! `runplane-observer` — governance fan-out channel.
//!
//! Governance services (security, telemetry, policy) register as observers
//! and receive every lifecycle event. Observers are read-only consumers:
//! they cannot return a value that alters execution, cannot block the
//! emitting call beyond a bounded per-observer timeout, and one misbehaving
//! observer never prevents delivery to the others.

pub mod bus;
pub mod event;

pub use bus::{DeliveryReport, Observer, ObserverBus, ObserverBusConfig};
pub use event::{LifecycleEvent, LifecycleEventKind};
