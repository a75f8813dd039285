//! Task lifecycle types and tracking.
//!
//! A task is one submitted unit of asynchronous analysis work. Snapshots live
//! in the shared store so any process holding the id can read them; the
//! worker executing the task is the only writer.

mod queue;
mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use queue::WorkQueue;
pub use tracker::{CancelOutcome, StateUpdate, TaskTracker};

/// Task lifecycle states.
///
/// PENDING -> PROCESSING -> {SUCCESS, FAILURE}; CANCELLED is reachable from
/// the non-terminal states via explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Processing,
    Success,
    Failure,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Processing => "PROCESSING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Requested analysis kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Similarity,
    AiDetect,
    ImageSimilarity,
}

impl std::str::FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(AnalysisKind::Similarity),
            "ai_detect" => Ok(AnalysisKind::AiDetect),
            "image_similarity" => Ok(AnalysisKind::ImageSimilarity),
            other => Err(format!("unknown analysis kind: {}", other)),
        }
    }
}

/// A submitted analysis request. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Reference to the document to analyze (path, URL, or storage key).
    pub document_ref: String,
    /// Analysis kinds to run in addition to the always-on stages.
    pub kinds: Vec<AnalysisKind>,
    /// Optional image references for image similarity analysis.
    #[serde(default)]
    pub image_refs: Vec<String>,
    /// Identity of the submitter, used for quota accounting.
    #[serde(default)]
    pub submitted_by: Option<String>,
}

impl AnalysisRequest {
    /// Reject obviously bad input before it enters the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.document_ref.trim().is_empty() {
            return Err("document reference must not be empty".to_string());
        }
        if self.kinds.contains(&AnalysisKind::ImageSimilarity) && self.image_refs.is_empty() {
            return Err("image_similarity requested without image references".to_string());
        }
        Ok(())
    }
}

/// Work envelope placed on the shared queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub request: AnalysisRequest,
    pub enqueued_at: DateTime<Utc>,
}

/// Point-in-time view of a task's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub state: TaskState,
    /// Completion percentage, 0..=100. Non-decreasing while PROCESSING.
    pub progress: u8,
    pub status_message: String,
    #[serde(default)]
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn pending(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::Pending,
            progress: 0,
            status_message: "Task is waiting to be processed".to_string(),
            current_step: String::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization_matches_wire_format() {
        assert_eq!(
            serde_json::to_string(&TaskState::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&AnalysisKind::AiDetect).unwrap(),
            "\"ai_detect\""
        );
        assert_eq!("similarity".parse::<AnalysisKind>().unwrap(), AnalysisKind::Similarity);
        assert!("bogus".parse::<AnalysisKind>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_request_validation() {
        let ok = AnalysisRequest {
            document_ref: "doc.pdf".to_string(),
            kinds: vec![AnalysisKind::Similarity],
            image_refs: vec![],
            submitted_by: None,
        };
        assert!(ok.validate().is_ok());

        let empty_ref = AnalysisRequest {
            document_ref: "  ".to_string(),
            kinds: vec![],
            image_refs: vec![],
            submitted_by: None,
        };
        assert!(empty_ref.validate().is_err());

        let missing_images = AnalysisRequest {
            document_ref: "doc.pdf".to_string(),
            kinds: vec![AnalysisKind::ImageSimilarity],
            image_refs: vec![],
            submitted_by: None,
        };
        assert!(missing_images.validate().is_err());
    }
}
