//! `runplane-runtime` — the kernel's outer surface.
//!
//! Ties the collaborating pieces together: the capability resolver maps
//! intent types to registered step sequences, the intent executor runs the
//! acceptance pipeline, the background worker drives accepted sagas to a
//! terminal state, and [`RuntimeService`] is the single façade callers and
//! realms talk to.

pub mod capability;
pub mod executor;
pub mod queue;
pub mod service;
pub mod worker;

pub use capability::{CapabilityError, CapabilityRegistration, CapabilityRegistry};
pub use executor::IntentExecutor;
pub use queue::{InMemoryWorkQueue, WorkItem, WorkQueue};
pub use service::{RuntimeConfig, RuntimeService};
pub use worker::{SagaWorker, WorkerConfig, WorkerHandle, WorkerStats};
