use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// State store operation error.
///
/// These are infrastructure failures; callers apply bounded retry and then
/// surface them. The in-memory backend only ever fails on lock poisoning.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store role behind the State Surface.
///
/// One implementation serves as the fast hot tier (TTL expiry expected),
/// another as the durable tier. The surface composes the two; backends make
/// no tenant assumptions — tenancy lives in the key format.
pub trait StateBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StateError>;

    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<(), StateError>;

    fn delete(&self, key: &str) -> Result<(), StateError>;

    /// List keys starting with `prefix`, sorted, at most `limit`.
    fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StateError>;
}

impl<B> StateBackend for Arc<B>
where
    B: StateBackend + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<JsonValue>, StateError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> Result<(), StateError> {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        (**self).delete(key)
    }

    fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StateError> {
        (**self).list_keys(prefix, limit)
    }
}
