//! The intent record: a caller's declaration of desired work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{IntentId, SessionId, TenantId};

/// A caller's declarative request for work, identified by a capability type.
///
/// Intents are:
/// - **immutable** once submitted
/// - **opaque** to the kernel (`payload` is interpreted only by the resolved
///   capability)
/// - bound to exactly one session and tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: IntentId,
    /// Capability type identifier (e.g. `"reports.generate"`).
    pub intent_type: String,
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub payload: JsonValue,
    pub submitted_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(
        intent_type: impl Into<String>,
        session_id: SessionId,
        tenant_id: TenantId,
        payload: JsonValue,
    ) -> Self {
        Self {
            intent_id: IntentId::new(),
            intent_type: intent_type.into(),
            session_id,
            tenant_id,
            payload,
            submitted_at: Utc::now(),
        }
    }
}
