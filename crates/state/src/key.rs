//! Tenant-namespaced state keys.

use runplane_core::{ExecutionId, SagaId, SessionId, TenantId};

/// A state key, always namespaced by tenant.
///
/// Rendered as `tenant:entity_type:entity_id`. The tenant prefix is the
/// structural isolation boundary: two tenants using the same entity id can
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    tenant_id: TenantId,
    entity_type: String,
    entity_id: String,
}

impl StateKey {
    pub fn new(
        tenant_id: TenantId,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn session(tenant_id: TenantId, session_id: &SessionId) -> Self {
        Self::new(tenant_id, "session", session_id.to_string())
    }

    pub fn execution(tenant_id: TenantId, execution_id: &ExecutionId) -> Self {
        Self::new(tenant_id, "execution", execution_id.to_string())
    }

    pub fn saga(tenant_id: TenantId, saga_id: &SagaId) -> Self {
        Self::new(tenant_id, "saga", saga_id.to_string())
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Key prefix covering every entity of one type for one tenant.
    pub fn prefix(tenant_id: &TenantId, entity_type: &str) -> String {
        format!("{}:{}:", tenant_id, entity_type)
    }

    pub fn render(&self) -> String {
        format!("{}:{}:{}", self.tenant_id, self.entity_type, self.entity_id)
    }
}

impl core::fmt::Display for StateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.entity_type, self.entity_id)
    }
}
