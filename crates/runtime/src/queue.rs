//! Work queue feeding the background saga worker.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use runplane_core::{SagaId, TenantId};

/// One unit of background work: a saga ready to be driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub saga_id: SagaId,
    pub tenant_id: TenantId,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(saga_id: SagaId, tenant_id: TenantId) -> Self {
        Self {
            saga_id,
            tenant_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO queue with exclusive claim semantics: an item handed out by `claim`
/// is gone from the queue, so no two workers ever drive the same saga run.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, item: WorkItem);
    fn claim(&self) -> Option<WorkItem>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for InMemoryWorkQueue {
    fn enqueue(&self, item: WorkItem) {
        if let Ok(mut items) = self.items.lock() {
            items.push_back(item);
        }
    }

    fn claim(&self) -> Option<WorkItem> {
        self.items.lock().ok()?.pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn item() -> WorkItem {
        WorkItem::new(SagaId::new(), TenantId::new("acme").unwrap())
    }

    #[test]
    fn claims_in_fifo_order() {
        let queue = InMemoryWorkQueue::new();
        let first = item();
        let second = item();

        queue.enqueue(first.clone());
        queue.enqueue(second.clone());

        assert_eq!(queue.claim(), Some(first));
        assert_eq!(queue.claim(), Some(second));
        assert_eq!(queue.claim(), None);
    }

    #[test]
    fn concurrent_claims_never_hand_out_an_item_twice() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        for _ in 0..100 {
            queue.enqueue(item());
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(item) = queue.claim() {
                    claimed.push(item.saga_id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for saga_id in handle.join().unwrap() {
                assert!(seen.insert(saga_id), "saga claimed twice");
                total += 1;
            }
        }
        assert_eq!(total, 100);
        assert!(queue.is_empty());
    }
}
