use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use runplane_core::{SagaId, SessionId, TenantId, UserId};

/// One tenant-scoped interaction context.
///
/// Invariant: every session has exactly one tenant; no cross-tenant session
/// ever exists. Sessions are mutated only by merging context and
/// adding/removing active saga ids; they are never deleted during normal
/// operation (expiry/archival is an external concern).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub context: Map<String, JsonValue>,
    pub active_saga_ids: BTreeSet<SagaId>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        tenant_id: TenantId,
        user_id: Option<UserId>,
        context: Option<Map<String, JsonValue>>,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            tenant_id,
            user_id,
            context: context.unwrap_or_default(),
            active_saga_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Merge entries into the session context (last write wins per key).
    pub fn merge_context(&mut self, entries: Map<String, JsonValue>) {
        for (k, v) in entries {
            self.context.insert(k, v);
        }
    }

    pub fn attach_saga(&mut self, saga_id: SagaId) {
        self.active_saga_ids.insert(saga_id);
    }

    pub fn detach_saga(&mut self, saga_id: &SagaId) {
        self.active_saga_ids.remove(saga_id);
    }
}
