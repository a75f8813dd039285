//! Analyzer agents and the pipeline coordinator.
//!
//! Each agent wraps one analysis capability and exposes it through a uniform
//! interface so the coordinator can orchestrate them identically. A stage
//! failure is recovered into its own `AgentResult`; sibling stages proceed.

mod ai_detection;
mod context;
mod coordinator;
mod extraction;
mod image;
mod insight;
mod similarity;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tasks::AnalysisKind;

pub use ai_detection::AiDetectionAgent;
pub use context::ContextAgent;
pub use coordinator::AgentCoordinator;
pub use extraction::ExtractionAgent;
pub use image::ImageSimilarityAgent;
pub use insight::InsightAgent;
pub use similarity::SimilarityAgent;

/// Stage outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Error,
}

/// Result produced once per pipeline stage per task. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub status: AgentStatus,
    pub payload: serde_json::Value,
    /// Stage execution time in seconds.
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// Input handed to a stage, tagged by what the stage consumes.
#[derive(Debug, Clone)]
pub enum StageInput {
    /// A document reference to extract (extraction stage only).
    Document { document_ref: String },
    /// Extracted text plus the originating document reference.
    Text {
        text: String,
        document_ref: String,
    },
    /// Image references (image similarity stage only).
    Images { image_refs: Vec<String> },
    /// All prior stage results (insight stage only).
    Aggregate {
        stages: BTreeMap<String, AgentResult>,
    },
}

/// One analyzer in the pipeline.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stage name used as the aggregate key.
    fn name(&self) -> &'static str;

    /// Run the analysis. Errors are recovered by the coordinator into an
    /// error-status `AgentResult`; implementations should not panic.
    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value>;
}

/// Final pipeline aggregate: one `AgentResult` per executed stage plus
/// pipeline-level metadata. Stored as the task result and consumed by the
/// insight stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisAggregate {
    pub analysis_kinds: Vec<AnalysisKind>,
    pub timestamp: DateTime<Utc>,
    pub stages: BTreeMap<String, AgentResult>,
}

impl AnalysisAggregate {
    pub fn new(analysis_kinds: Vec<AnalysisKind>) -> Self {
        Self {
            analysis_kinds,
            timestamp: Utc::now(),
            stages: BTreeMap::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&AgentResult> {
        self.stages.get(name)
    }
}
