use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use runplane_core::TenantId;

use crate::entry::{WalEntry, WalEventType};
use crate::log::{WalConfig, WalError, WriteAheadLog};

#[derive(Debug, Default)]
struct TenantPartition {
    /// Next sequence number to hand out. Survives pruning, so sequence
    /// numbers keep counting after old entries are dropped.
    next_sequence: u64,
    entries: Vec<WalEntry>,
}

/// In-memory append-only log.
///
/// Intended for tests/dev and as the reference implementation of the
/// ordering contract. The partition write lock makes increment-and-append
/// atomic per tenant.
#[derive(Debug, Default)]
pub struct InMemoryWal {
    partitions: RwLock<HashMap<TenantId, TenantPartition>>,
    config: WalConfig,
}

impl InMemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WalConfig) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            config,
        }
    }
}

impl WriteAheadLog for InMemoryWal {
    fn append(
        &self,
        tenant_id: &TenantId,
        event_type: WalEventType,
        payload: JsonValue,
    ) -> Result<WalEntry, WalError> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| WalError::Append("lock poisoned".to_string()))?;

        let partition = partitions.entry(tenant_id.clone()).or_default();
        partition.next_sequence += 1;

        let entry = WalEntry {
            entry_id: Uuid::now_v7(),
            tenant_id: tenant_id.clone(),
            sequence_number: partition.next_sequence,
            event_type,
            payload,
            timestamp: Utc::now(),
        };
        partition.entries.push(entry.clone());

        if let Some(last_n) = self.config.retention {
            if partition.entries.len() > last_n {
                let drop_count = partition.entries.len() - last_n;
                partition.entries.drain(..drop_count);
                debug!(tenant_id = %tenant_id, dropped = drop_count, "pruned oldest log entries");
            }
        }

        Ok(entry)
    }

    fn read(
        &self,
        tenant_id: &TenantId,
        event_type: Option<WalEventType>,
    ) -> Result<Vec<WalEntry>, WalError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| WalError::Read("lock poisoned".to_string()))?;

        let entries = match partitions.get(tenant_id) {
            Some(p) => &p.entries,
            None => return Ok(vec![]),
        };

        Ok(entries
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .cloned()
            .collect())
    }

    fn read_since(
        &self,
        tenant_id: &TenantId,
        after_sequence: u64,
    ) -> Result<Vec<WalEntry>, WalError> {
        let entries = self.read(tenant_id, None)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.sequence_number > after_sequence)
            .collect())
    }
}
