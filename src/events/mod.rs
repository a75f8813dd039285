//! Streaming event fan-out.
//!
//! Two delivery modes share the event types: a pull-mode session stream
//! (server-sent-events framing with keepalives and an inactivity timeout)
//! and a push-mode topic hub (broadcast channels with a cross-process relay
//! through the shared store's pub/sub).

mod hub;
mod stream;

use serde::{Deserialize, Serialize};

pub use hub::{EventHub, PushEvent};
pub use stream::{EventConsumer, StreamRegistry, StreamTiming};

/// One event on a session stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Stream opened.
    Start,
    /// One generated token (incremental LLM output).
    Token { text: String },
    /// Progress update.
    Progress { progress: u8, message: String },
    /// Stream finished normally. Closes the stream.
    End,
    /// Stream finished with an error.
    Error { message: String },
    /// No activity for the inactivity window. Closes the stream.
    Timeout,
    /// Liveness signal while the stream is idle.
    Keepalive,
}

impl Event {
    /// Whether receiving this event ends the stream.
    pub fn is_final(&self) -> bool {
        matches!(self, Event::End | Event::Error { .. } | Event::Timeout)
    }

    /// Wire frame: one JSON payload per `data:` line, blank-line terminated.
    pub fn to_frame(&self) -> String {
        // Event serialization cannot fail: all fields are plain strings and
        // integers.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n\n", json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_format() {
        let frame = Event::Token {
            text: "hello".to_string(),
        }
        .to_frame();
        assert_eq!(frame, "data: {\"type\":\"token\",\"text\":\"hello\"}\n\n");
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_final_events() {
        assert!(Event::End.is_final());
        assert!(Event::Timeout.is_final());
        assert!(Event::Error {
            message: "x".to_string()
        }
        .is_final());
        assert!(!Event::Keepalive.is_final());
        assert!(!Event::Progress {
            progress: 50,
            message: "half".to_string()
        }
        .is_final());
    }
}
