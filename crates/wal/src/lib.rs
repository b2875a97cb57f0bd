//! `runplane-wal` — append-only, per-tenant ordered event log.
//!
//! The WAL is the system of record for "what happened". Every
//! state-transition-causing operation in the kernel appends here first;
//! projections and audits read it back.

pub mod entry;
pub mod in_memory;
pub mod log;

pub use entry::{WalEntry, WalEventType};
pub use in_memory::InMemoryWal;
pub use log::{WalConfig, WalError, WriteAheadLog};
