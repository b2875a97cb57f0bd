//! `runplane-core` — kernel foundation building blocks.
//!
//! This crate contains **pure kernel** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the externally visible error taxonomy, the
//! `Intent` record, and a small bounded-retry helper.

pub mod error;
pub mod id;
pub mod intent;
pub mod retry;

pub use error::{KernelError, KernelResult};
pub use id::{ExecutionId, IntentId, SagaId, SessionId, TenantId, UserId};
pub use intent::Intent;
pub use retry::RetryPolicy;
