use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use runplane_core::{SessionId, TenantId};

use crate::entry::{WalEntry, WalEventType};

/// WAL operation error.
///
/// Append failure is **fatal to the calling operation**: the operation that
/// tried to log must abort and surface the failure. Logging is not
/// best-effort.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("append rejected: {0}")]
    Append(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// Retention configuration for a log implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalConfig {
    /// Keep at most this many entries per tenant partition. `None` (the
    /// default) disables pruning. Pruning drops the oldest entries only;
    /// sequence numbers keep counting.
    pub retention: Option<usize>,
}

impl WalConfig {
    pub fn with_retention(mut self, last_n: usize) -> Self {
        self.retention = Some(last_n);
        self
    }
}

/// Append-only, per-tenant ordered event log.
///
/// Guarantees required of implementations:
/// - Appends for a single tenant are strictly ordered: no two entries for
///   the same tenant ever receive the same or out-of-order sequence numbers,
///   even under concurrent callers. This requires an atomic
///   increment-and-append (a per-partition lock or equivalent CAS loop).
/// - Cross-tenant entries have no ordering guarantee relative to each other.
/// - Entries are never mutated, deleted or reordered (retention may prune
///   the oldest).
pub trait WriteAheadLog: Send + Sync {
    /// Append one fact, atomically assigning the tenant's next sequence
    /// number.
    fn append(
        &self,
        tenant_id: &TenantId,
        event_type: WalEventType,
        payload: JsonValue,
    ) -> Result<WalEntry, WalError>;

    /// Read a tenant's partition in sequence order, optionally filtered by
    /// event type. Replayable from the start on each call.
    fn read(
        &self,
        tenant_id: &TenantId,
        event_type: Option<WalEventType>,
    ) -> Result<Vec<WalEntry>, WalError>;

    /// Read entries with `sequence_number > after_sequence`, for cursor-style
    /// incremental consumers.
    fn read_since(&self, tenant_id: &TenantId, after_sequence: u64)
    -> Result<Vec<WalEntry>, WalError>;

    /// Read the entries causally related to one session, in chronological
    /// order.
    ///
    /// Correlation is by the `session_id` field kernel-written payloads
    /// carry.
    fn replay_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<Vec<WalEntry>, WalError> {
        let sid = session_id.to_string();
        let entries = self.read(tenant_id, None)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.session_id() == Some(sid.as_str()))
            .collect())
    }
}

impl<W> WriteAheadLog for Arc<W>
where
    W: WriteAheadLog + ?Sized,
{
    fn append(
        &self,
        tenant_id: &TenantId,
        event_type: WalEventType,
        payload: JsonValue,
    ) -> Result<WalEntry, WalError> {
        (**self).append(tenant_id, event_type, payload)
    }

    fn read(
        &self,
        tenant_id: &TenantId,
        event_type: Option<WalEventType>,
    ) -> Result<Vec<WalEntry>, WalError> {
        (**self).read(tenant_id, event_type)
    }

    fn read_since(
        &self,
        tenant_id: &TenantId,
        after_sequence: u64,
    ) -> Result<Vec<WalEntry>, WalError> {
        (**self).read_since(tenant_id, after_sequence)
    }

    fn replay_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<Vec<WalEntry>, WalError> {
        (**self).replay_session(session_id, tenant_id)
    }
}
