//! Push-mode topic hub.
//!
//! Topics are task ids and chat session ids. Local subscribers join a
//! broadcast channel per topic; publications are also relayed through the
//! shared store's pub/sub so a worker process with no connected clients
//! still reaches subscribers living in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::{RedisStore, SharedStore, StoreResult};
use crate::tasks::TaskState;

const TOPIC_CAPACITY: usize = 256;
const CHANNEL_PREFIX: &str = "events:";

/// Events pushed to topic subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    TaskUpdate {
        task_id: String,
        state: TaskState,
        progress: u8,
        status_message: String,
    },
    AnalysisProgress {
        task_id: String,
        progress: u8,
        current_step: String,
    },
    ChatMessage {
        session_id: String,
        message: String,
        role: String,
    },
}

/// Topic fan-out over broadcast channels.
pub struct EventHub {
    topics: Mutex<HashMap<String, broadcast::Sender<PushEvent>>>,
    store: Arc<dyn SharedStore>,
}

impl EventHub {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Join a topic. Every joined receiver gets every subsequent publish.
    pub fn join(&self, topic: &str) -> broadcast::Receiver<PushEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Drop a topic's channel once its last receiver is gone. Receivers
    /// themselves leave by being dropped.
    pub fn leave(&self, topic: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(sender) = topics.get(topic) {
            if sender.receiver_count() == 0 {
                topics.remove(topic);
            }
        }
    }

    /// Deliver to local subscribers only. Used by the relay so forwarded
    /// publications are not re-published.
    fn dispatch_local(&self, topic: &str, event: PushEvent) {
        let topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(sender) = topics.get(topic) {
            // Err means no receivers right now; nothing to do.
            let _ = sender.send(event);
        } else {
            debug!("No local subscribers for topic {}", topic);
        }
    }

    /// Publish to local subscribers and relay to other processes through
    /// the store. The relay is best-effort: local delivery stands even when
    /// the store is down.
    pub async fn publish(&self, topic: &str, event: PushEvent) {
        self.dispatch_local(topic, event.clone());

        match serde_json::to_string(&event) {
            Ok(payload) => {
                let channel = format!("{}{}", CHANNEL_PREFIX, topic);
                if let Err(e) = self.store.publish(&channel, &payload).await {
                    warn!("Event relay publish failed for {}: {}", topic, e);
                }
            }
            Err(e) => warn!("Unserializable push event: {}", e),
        }
    }

    /// Run the cross-process relay: forward publications from other
    /// processes into the local broadcast channels. Blocks until the store
    /// connection drops.
    pub async fn run_relay(self: Arc<Self>, store: RedisStore) -> StoreResult<()> {
        let hub = self.clone();
        store
            .psubscribe(&format!("{}*", CHANNEL_PREFIX), move |channel, payload| {
                let topic = channel.trim_start_matches(CHANNEL_PREFIX);
                match serde_json::from_str::<PushEvent>(&payload) {
                    Ok(event) => hub.dispatch_local(topic, event),
                    Err(e) => warn!("Bad relayed event on {}: {}", channel, e),
                }
            })
            .await
    }
}
