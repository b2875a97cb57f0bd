use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use crate::backend::{StateBackend, StateError};

#[derive(Debug, Clone)]
struct StoredValue {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory key/value backend with TTL expiry.
///
/// Intended for tests/dev and as the default hot tier. Expired entries are
/// skipped on read and swept on write.
#[derive(Debug, Default)]
pub struct InMemoryStateBackend {
    inner: RwLock<HashMap<String, StoredValue>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for InMemoryStateBackend {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StateError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StateError::Unavailable("lock poisoned".to_string()))?;

        let now = Instant::now();
        Ok(map
            .get(key)
            .filter(|v| !v.is_expired(now))
            .map(|v| v.value.clone()))
    }

    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<(), StateError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StateError::Unavailable("lock poisoned".to_string()))?;

        let now = Instant::now();
        map.retain(|_, v| !v.is_expired(now));

        map.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StateError::Unavailable("lock poisoned".to_string()))?;
        map.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StateError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StateError::Unavailable("lock poisoned".to_string()))?;

        let now = Instant::now();
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !v.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }
}
