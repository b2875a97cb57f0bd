//! `runplane-saga` — compensable step sequences and their coordinator.
//!
//! A saga is an ordered list of steps executing on behalf of one execution.
//! The coordinator drives the saga state machine
//! (PENDING → RUNNING → {COMPLETED | FAILED}, with
//! RUNNING → COMPENSATING → FAILED on step failure), appending a WAL entry
//! at every transition and keeping the State Surface current.

pub mod coordinator;
pub mod record;
pub mod step;

pub use coordinator::{CompensationResult, SagaCoordinator, SagaError, StepOutcome};
pub use record::{
    ExecutionFailure, ExecutionRecord, ExecutionStatus, SagaRecord, SagaStatus,
};
pub use step::{StepContext, StepDescriptor, StepHandler};
