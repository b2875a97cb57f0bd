//! Two-tier state surface: hot store + durable store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use runplane_core::TenantId;

use crate::backend::{StateBackend, StateError};
use crate::key::StateKey;

/// Storage tier for a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateTier {
    /// Fast ephemeral store only (default; TTL expiry applies).
    Hot,
    /// Hot store plus the persistent tier (terminal saga/execution records).
    Durable,
}

/// Mutable, queryable projection of current execution/session state.
///
/// Two-tier policy: everything is written hot; durable-flagged writes are
/// additionally persisted. A read that misses the hot tier falls through to
/// the durable tier before returning `None`.
///
/// Per-key read-modify-write is atomic: `update` serializes writers on a
/// per-key lock, so no two concurrent writers interleave updates to the same
/// key.
pub struct StateSurface {
    hot: Arc<dyn StateBackend>,
    durable: Arc<dyn StateBackend>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateSurface {
    pub fn new(hot: Arc<dyn StateBackend>, durable: Arc<dyn StateBackend>) -> Self {
        Self {
            hot,
            durable,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Surface backed by in-memory stores for both tiers (tests/dev).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(crate::in_memory::InMemoryStateBackend::new()),
            Arc::new(crate::in_memory::InMemoryStateBackend::new()),
        )
    }

    pub fn get_state(&self, key: &StateKey) -> Result<Option<JsonValue>, StateError> {
        let rendered = key.render();
        if let Some(value) = self.hot.get(&rendered)? {
            return Ok(Some(value));
        }

        // Hot miss: durable-tagged state must still be reachable.
        let fallback = self.durable.get(&rendered)?;
        if fallback.is_some() {
            debug!(key = %rendered, "hot miss served from durable tier");
        }
        Ok(fallback)
    }

    pub fn set_state(
        &self,
        key: &StateKey,
        value: JsonValue,
        ttl: Option<Duration>,
        tier: StateTier,
    ) -> Result<(), StateError> {
        let rendered = key.render();
        self.hot.set(&rendered, value.clone(), ttl)?;
        if tier == StateTier::Durable {
            self.durable.set(&rendered, value, None)?;
        }
        Ok(())
    }

    pub fn delete_state(&self, key: &StateKey) -> Result<(), StateError> {
        let rendered = key.render();
        self.hot.delete(&rendered)?;
        self.durable.delete(&rendered)
    }

    /// List keys matching `pattern` (a prefix, optionally ending in `*`),
    /// across both tiers, sorted and deduplicated.
    pub fn list_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>, StateError> {
        let prefix = pattern.trim_end_matches('*');
        let mut keys = self.hot.list_keys(prefix, limit)?;
        keys.extend(self.durable.list_keys(prefix, limit)?);
        keys.sort();
        keys.dedup();
        keys.truncate(limit);
        Ok(keys)
    }

    /// Convenience listing for one tenant + entity type.
    pub fn list_entities(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        limit: usize,
    ) -> Result<Vec<String>, StateError> {
        self.list_keys(&StateKey::prefix(tenant_id, entity_type), limit)
    }

    /// Atomic per-key read-modify-write.
    ///
    /// `f` receives the current value (post fall-through) and returns the
    /// value to store, or `None` to leave the key untouched (no upsert).
    /// Concurrent `update`s on the same key are serialized; updates on
    /// different keys proceed independently.
    pub fn update<F>(
        &self,
        key: &StateKey,
        ttl: Option<Duration>,
        tier: StateTier,
        f: F,
    ) -> Result<Option<JsonValue>, StateError>
    where
        F: FnOnce(Option<JsonValue>) -> Option<JsonValue>,
    {
        let guard = self.key_lock(&key.render())?;
        let _held = guard
            .lock()
            .map_err(|_| StateError::Unavailable("key lock poisoned".to_string()))?;

        let current = self.get_state(key)?;
        let next = f(current);
        if let Some(value) = &next {
            self.set_state(key, value.clone(), ttl, tier)?;
        }
        Ok(next)
    }

    fn key_lock(&self, rendered: &str) -> Result<Arc<Mutex<()>>, StateError> {
        let mut locks = self
            .key_locks
            .lock()
            .map_err(|_| StateError::Unavailable("key lock table poisoned".to_string()))?;
        Ok(locks
            .entry(rendered.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn durable_writes_survive_hot_eviction() {
        let surface = StateSurface::in_memory();
        let key = StateKey::new(tenant("acme"), "execution", "e-1");

        surface
            .set_state(
                &key,
                json!({"status": "completed"}),
                Some(Duration::from_millis(10)),
                StateTier::Durable,
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(25));

        // Hot TTL has expired; durable tier still serves the read.
        assert_eq!(
            surface.get_state(&key).unwrap(),
            Some(json!({"status": "completed"}))
        );
    }

    #[test]
    fn hot_only_writes_expire() {
        let surface = StateSurface::in_memory();
        let key = StateKey::new(tenant("acme"), "scratch", "x");

        surface
            .set_state(&key, json!(1), Some(Duration::from_millis(10)), StateTier::Hot)
            .unwrap();
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(surface.get_state(&key).unwrap(), None);
    }

    #[test]
    fn list_keys_never_crosses_tenants() {
        let surface = StateSurface::in_memory();
        let a = tenant("acme");
        let b = tenant("globex");

        surface
            .set_state(
                &StateKey::new(a.clone(), "session", "s-1"),
                json!(1),
                None,
                StateTier::Hot,
            )
            .unwrap();
        surface
            .set_state(
                &StateKey::new(b.clone(), "session", "s-1"),
                json!(2),
                None,
                StateTier::Durable,
            )
            .unwrap();

        let a_keys = surface.list_entities(&a, "session", 10).unwrap();
        assert_eq!(a_keys, vec!["acme:session:s-1"]);
        assert!(a_keys.iter().all(|k| !k.starts_with("globex:")));
    }

    #[test]
    fn update_is_atomic_per_key() {
        let surface = Arc::new(StateSurface::in_memory());
        let key = StateKey::new(tenant("acme"), "counter", "c-1");

        surface
            .set_state(&key, json!(0), None, StateTier::Hot)
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let surface = surface.clone();
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    surface
                        .update(&key, None, StateTier::Hot, |current| {
                            let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
                            Some(json!(n + 1))
                        })
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(surface.get_state(&key).unwrap(), Some(json!(200)));
    }

    #[test]
    fn update_declined_by_the_closure_writes_nothing() {
        let surface = StateSurface::in_memory();
        let key = StateKey::new(tenant("acme"), "execution", "e-1");

        let stored = surface
            .update(&key, None, StateTier::Durable, |current| {
                assert!(current.is_none());
                None
            })
            .unwrap();

        // A closure that declines must not upsert a placeholder.
        assert_eq!(stored, None);
        assert_eq!(surface.get_state(&key).unwrap(), None);
        assert!(surface.list_entities(&tenant("acme"), "execution", 10).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_both_tiers() {
        let surface = StateSurface::in_memory();
        let key = StateKey::new(tenant("acme"), "execution", "e-1");

        surface
            .set_state(&key, json!(1), None, StateTier::Durable)
            .unwrap();
        surface.delete_state(&key).unwrap();

        assert_eq!(surface.get_state(&key).unwrap(), None);
    }
}
