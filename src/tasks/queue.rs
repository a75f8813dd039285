//! Shared work queue for dispatching analysis tasks to workers.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{SharedStore, StoreError, StoreResult};

use super::TaskEnvelope;

/// JSON-envelope work queue over a shared store list.
///
/// Producers push from API-facing processes; workers pop with a bounded wait.
/// The broker wire protocol beneath the list operations is the store's
/// concern, not ours.
pub struct WorkQueue {
    store: Arc<dyn SharedStore>,
    key: String,
}

impl WorkQueue {
    pub fn new(store: Arc<dyn SharedStore>, queue_name: &str) -> Self {
        Self {
            store,
            key: format!("queue:{}", queue_name),
        }
    }

    /// Enqueue a task envelope.
    pub async fn enqueue(&self, envelope: &TaskEnvelope) -> StoreResult<()> {
        let payload =
            serde_json::to_string(envelope).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.store.list_push(&self.key, &payload).await
    }

    /// Wait up to `timeout` for the next envelope.
    ///
    /// Undecodable payloads are dropped and surfaced as a decode error so a
    /// poisoned message cannot wedge the queue.
    pub async fn dequeue(&self, timeout: Duration) -> StoreResult<Option<TaskEnvelope>> {
        match self.store.list_pop(&self.key, timeout).await? {
            Some(payload) => {
                let envelope = serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Decode(format!("bad work envelope: {}", e)))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}
