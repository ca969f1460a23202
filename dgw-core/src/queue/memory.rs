//! In-process backends for tests and single-node deployments.

use super::ledger::decide;
use super::{QueueBackend, QueueError, RecordOutcome, StatusLedger};
use async_trait::async_trait;
use dgw_sdk::objects::StatusSource;
use dgw_sdk::objects::{FinalStatus, OrderId, QueueMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone, Default)]
pub struct InMemoryQueueBackend {
    queues: Arc<RwLock<HashMap<String, Vec<QueueMessage>>>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything currently in `queue`, oldest first.
    pub async fn messages(&self, queue: &str) -> Vec<QueueMessage> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn push(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError> {
        self.queues
            .write()
            .await
            .entry(queue.to_owned())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn peek(
        &self,
        queue: &str,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .and_then(|q| q.iter().find(|m| &m.order_id == order_id).cloned()))
    }

    async fn take(
        &self,
        queue: &str,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let mut queues = self.queues.write().await;
        let Some(messages) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let first = messages.iter().position(|m| &m.order_id == order_id);
        let taken = first.map(|i| messages[i].clone());
        messages.retain(|m| &m.order_id != order_id);
        Ok(taken)
    }

    async fn older_than(
        &self,
        queue: &str,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let queues = self.queues.read().await;
        let mut aged: Vec<QueueMessage> = queues
            .get(queue)
            .map(|q| q.iter().filter(|m| m.date < cutoff).cloned().collect())
            .unwrap_or_default();
        aged.sort_by_key(|m| m.date);
        aged.truncate(limit);
        Ok(aged)
    }
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    status: FinalStatus,
    announced: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryStatusLedger {
    entries: Arc<Mutex<HashMap<OrderId, LedgerEntry>>>,
}

impl InMemoryStatusLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusLedger for InMemoryStatusLedger {
    async fn current(&self, order_id: &OrderId) -> Result<Option<FinalStatus>, QueueError> {
        Ok(self.entries.lock().await.get(order_id).map(|e| e.status))
    }

    async fn record(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
        source: StatusSource,
    ) -> Result<RecordOutcome, QueueError> {
        let mut entries = self.entries.lock().await;
        let outcome = decide(entries.get(order_id).map(|e| e.status), status, source);
        if outcome.is_recorded() {
            entries.insert(
                order_id.clone(),
                LedgerEntry {
                    status,
                    announced: false,
                },
            );
        }
        Ok(outcome)
    }

    async fn is_announced(&self, order_id: &OrderId) -> Result<bool, QueueError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(order_id)
            .is_some_and(|e| e.announced))
    }

    async fn mark_announced(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
    ) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(order_id).filter(|e| e.status == status) {
            entry.announced = true;
        }
        Ok(())
    }
}
