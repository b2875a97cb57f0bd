use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::info;

use runplane_core::{SagaId, SessionId, TenantId, UserId};
use runplane_state::{StateError, StateKey, StateSurface, StateTier};

/// Session registry operation error.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session id is unknown for any tenant.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session exists but belongs to a different tenant than the caller
    /// supplied. Deliberately carries no information about the owner.
    #[error("session {0} does not belong to the supplied tenant")]
    TenantMismatch(SessionId),

    #[error("session storage failed: {0}")]
    Storage(#[from] StateError),

    #[error("session record corrupt: {0}")]
    Corrupt(String),
}

/// Creates and looks up tenant-scoped sessions.
///
/// Pure state, no logic: the authoritative record lives in the State
/// Surface under `tenant:session:id`. A process-local session→tenant index
/// lets lookups distinguish "unknown session" from "session of another
/// tenant" without ever reading across the tenant namespace; it is
/// rebuildable from SESSION_CREATED log entries.
pub struct SessionRegistry {
    surface: Arc<StateSurface>,
    owners: RwLock<HashMap<SessionId, TenantId>>,
}

impl SessionRegistry {
    pub fn new(surface: Arc<StateSurface>) -> Self {
        Self {
            surface,
            owners: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_session(
        &self,
        tenant_id: TenantId,
        user_id: Option<UserId>,
        context: Option<Map<String, JsonValue>>,
    ) -> Result<super::Session, SessionError> {
        let session = super::Session::new(tenant_id.clone(), user_id, context);

        let key = StateKey::session(tenant_id.clone(), &session.session_id);
        let value = serde_json::to_value(&session)
            .map_err(|e| SessionError::Corrupt(e.to_string()))?;
        self.surface
            .set_state(&key, value, None, StateTier::Durable)?;

        if let Ok(mut owners) = self.owners.write() {
            owners.insert(session.session_id, tenant_id);
        }

        info!(
            session_id = %session.session_id,
            tenant_id = %session.tenant_id,
            "session created"
        );
        Ok(session)
    }

    pub fn get_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<super::Session, SessionError> {
        let key = StateKey::session(tenant_id.clone(), session_id);
        match self.surface.get_state(&key)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| SessionError::Corrupt(e.to_string())),
            None => {
                // Miss within the caller's namespace. Classify: mismatch if
                // some other tenant owns the session, otherwise not found.
                let owners = self
                    .owners
                    .read()
                    .map_err(|_| StateError::Unavailable("owner index poisoned".to_string()))?;
                match owners.get(session_id) {
                    Some(owner) if owner != tenant_id => {
                        Err(SessionError::TenantMismatch(*session_id))
                    }
                    _ => Err(SessionError::NotFound(*session_id)),
                }
            }
        }
    }

    /// Merge entries into a session's context (atomic read-modify-write).
    pub fn merge_context(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        entries: Map<String, JsonValue>,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, tenant_id, move |session| {
            session.merge_context(entries);
        })
    }

    /// Record a saga as active on the session.
    pub fn attach_saga(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        saga_id: SagaId,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, tenant_id, move |session| {
            session.attach_saga(saga_id);
        })
    }

    /// Remove a saga from the session's active set (terminal state reached).
    pub fn detach_saga(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        saga_id: &SagaId,
    ) -> Result<(), SessionError> {
        let saga_id = *saga_id;
        self.mutate(session_id, tenant_id, move |session| {
            session.detach_saga(&saga_id);
        })
    }

    fn mutate<F>(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        f: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(&mut super::Session),
    {
        // Existence + tenancy check first, so mutation never upserts.
        self.get_session(session_id, tenant_id)?;

        let key = StateKey::session(tenant_id.clone(), session_id);
        self.surface
            .update(&key, None, StateTier::Durable, move |current| {
                // Existence was checked above and sessions are never
                // deleted; a record that vanished or turned unreadable
                // anyway is left untouched rather than overwritten.
                let mut session = serde_json::from_value::<super::Session>(current?).ok()?;
                f(&mut session);
                serde_json::to_value(&session).ok()
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(StateSurface::in_memory()))
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn create_and_get_round_trip() {
        let registry = registry();
        let t = tenant("acme");

        let session = registry
            .create_session(t.clone(), Some(UserId::new("u-1")), None)
            .unwrap();
        let loaded = registry.get_session(&session.session_id, &t).unwrap();

        assert_eq!(loaded, session);
    }

    #[test]
    fn cross_tenant_lookup_is_a_mismatch_never_data() {
        let registry = registry();
        let t1 = tenant("acme");
        let t2 = tenant("globex");

        let session = registry.create_session(t1, None, None).unwrap();
        let err = registry.get_session(&session.session_id, &t2).unwrap_err();

        assert!(matches!(err, SessionError::TenantMismatch(_)));
        // The error message must not leak the owning tenant.
        assert!(!err.to_string().contains("acme"));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let registry = registry();
        let err = registry
            .get_session(&SessionId::new(), &tenant("acme"))
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[test]
    fn same_user_in_two_tenants_stays_isolated() {
        let registry = registry();
        let t1 = tenant("acme");
        let t2 = tenant("globex");
        let user = UserId::new("shared-user");

        let s1 = registry
            .create_session(t1.clone(), Some(user.clone()), None)
            .unwrap();
        let s2 = registry
            .create_session(t2.clone(), Some(user), None)
            .unwrap();

        assert_ne!(s1.session_id, s2.session_id);
        assert!(registry.get_session(&s1.session_id, &t1).is_ok());
        assert!(registry.get_session(&s2.session_id, &t2).is_ok());
        assert!(matches!(
            registry.get_session(&s2.session_id, &t1),
            Err(SessionError::TenantMismatch(_))
        ));
    }

    #[test]
    fn merge_context_and_saga_tracking_persist() {
        let registry = registry();
        let t = tenant("acme");
        let session = registry.create_session(t.clone(), None, None).unwrap();
        let saga = SagaId::new();

        let mut entries = Map::new();
        entries.insert("stage".to_string(), json!("ingest"));
        registry
            .merge_context(&session.session_id, &t, entries)
            .unwrap();
        registry
            .attach_saga(&session.session_id, &t, saga)
            .unwrap();

        let loaded = registry.get_session(&session.session_id, &t).unwrap();
        assert_eq!(loaded.context.get("stage"), Some(&json!("ingest")));
        assert!(loaded.active_saga_ids.contains(&saga));

        registry
            .detach_saga(&session.session_id, &t, &saga)
            .unwrap();
        let loaded = registry.get_session(&session.session_id, &t).unwrap();
        assert!(loaded.active_saga_ids.is_empty());
    }
}
