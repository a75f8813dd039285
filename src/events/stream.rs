//! Pull-mode session streams.
//!
//! Producers publish events to a session; each subscriber owns an unbounded
//! queue and drains it into SSE frames. An idle consumer emits a keepalive
//! frame per empty wait and a timeout frame once the inactivity window
//! elapses; final events close the stream.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::debug;

use super::Event;

/// Wait and timeout knobs, overridable in tests.
#[derive(Debug, Clone, Copy)]
pub struct StreamTiming {
    /// Maximum block per wait before a keepalive is emitted.
    pub keepalive_wait: Duration,
    /// Idle time after which the stream times out and closes.
    pub inactivity_timeout: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            keepalive_wait: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-session registry of subscriber queues.
#[derive(Default)]
pub struct StreamRegistry {
    sessions: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Event>>>>,
    timing: StreamTiming,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(timing: StreamTiming) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timing,
        }
    }

    /// Open a new subscriber queue for a session.
    pub async fn subscribe(&self, session_id: &str) -> EventConsumer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(tx);
        EventConsumer {
            rx,
            timing: self.timing,
            last_activity: Instant::now(),
            closed: false,
        }
    }

    /// Deliver an event to every subscriber of a session. Dropped consumers
    /// are pruned; a final event removes the session entry.
    pub async fn publish(&self, session_id: &str, event: Event) {
        let mut sessions = self.sessions.lock().await;
        let Some(subscribers) = sessions.get_mut(session_id) else {
            debug!("No subscribers for session {}", session_id);
            return;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if event.is_final() || subscribers.is_empty() {
            sessions.remove(session_id);
        }
    }

    /// Number of live subscribers for a session.
    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

/// One subscriber's view of a session stream.
pub struct EventConsumer {
    rx: mpsc::UnboundedReceiver<Event>,
    timing: StreamTiming,
    last_activity: Instant,
    closed: bool,
}

impl EventConsumer {
    /// Next SSE frame, or None once the stream has closed.
    ///
    /// Blocks at most `keepalive_wait` per call: an empty wait yields a
    /// keepalive frame, and once `inactivity_timeout` passes without an
    /// event the stream yields a timeout frame and closes.
    pub async fn next_frame(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }

        match tokio::time::timeout(self.timing.keepalive_wait, self.rx.recv()).await {
            Ok(Some(event)) => {
                self.last_activity = Instant::now();
                if event.is_final() {
                    self.closed = true;
                }
                Some(event.to_frame())
            }
            // Producer side dropped without a final event.
            Ok(None) => {
                self.closed = true;
                Some(Event::End.to_frame())
            }
            Err(_) => {
                if self.last_activity.elapsed() >= self.timing.inactivity_timeout {
                    self.closed = true;
                    Some(Event::Timeout.to_frame())
                } else {
                    Some(Event::Keepalive.to_frame())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_timing() -> StreamTiming {
        StreamTiming {
            keepalive_wait: Duration::from_millis(10),
            inactivity_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order_and_end_closes() {
        let registry = Arc::new(StreamRegistry::with_timing(fast_timing()));
        let mut consumer = registry.subscribe("s1").await;

        registry.publish("s1", Event::Start).await;
        registry
            .publish(
                "s1",
                Event::Token {
                    text: "a".to_string(),
                },
            )
            .await;
        registry.publish("s1", Event::End).await;

        assert!(consumer.next_frame().await.unwrap().contains("start"));
        assert!(consumer.next_frame().await.unwrap().contains("token"));
        assert!(consumer.next_frame().await.unwrap().contains("end"));
        assert!(consumer.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_consumer_gets_keepalives_then_timeout() {
        let registry = Arc::new(StreamRegistry::with_timing(fast_timing()));
        let mut consumer = registry.subscribe("s1").await;

        let first = consumer.next_frame().await.unwrap();
        assert!(first.contains("keepalive"));

        // Drain until the inactivity window trips.
        let mut saw_timeout = false;
        for _ in 0..20 {
            let frame = consumer.next_frame().await.unwrap();
            if frame.contains("timeout") {
                saw_timeout = true;
                break;
            }
            assert!(frame.contains("keepalive"));
        }
        assert!(saw_timeout);
        assert!(consumer.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_every_event() {
        let registry = Arc::new(StreamRegistry::with_timing(fast_timing()));
        let mut a = registry.subscribe("s1").await;
        let mut b = registry.subscribe("s1").await;
        assert_eq!(registry.subscriber_count("s1").await, 2);

        registry
            .publish(
                "s1",
                Event::Progress {
                    progress: 40,
                    message: "working".to_string(),
                },
            )
            .await;

        assert!(a.next_frame().await.unwrap().contains("progress"));
        assert!(b.next_frame().await.unwrap().contains("progress"));
    }

    #[tokio::test]
    async fn test_final_event_removes_session() {
        let registry = Arc::new(StreamRegistry::with_timing(fast_timing()));
        let _consumer = registry.subscribe("s1").await;
        registry.publish("s1", Event::End).await;
        assert_eq!(registry.subscriber_count("s1").await, 0);
    }
}
