//! Retrieval context stage: pulls the most relevant indexed chunks for the
//! document so the aggregate carries grounding material for later questions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::retrieval::RetrievalEngine;

use super::{Agent, StageInput};

const CONTEXT_QUERY: &str = "Summarize key findings and important sections";
const CONTEXT_TOP_K: usize = 10;

pub struct ContextAgent {
    engine: Arc<RetrievalEngine>,
}

impl ContextAgent {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Agent for ContextAgent {
    fn name(&self) -> &'static str {
        "rag_context"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let document_ref = match input {
            StageInput::Text { document_ref, .. } => document_ref,
            _ => anyhow::bail!("context stage expects extracted text"),
        };

        let hits = self
            .engine
            .retrieve_context(CONTEXT_QUERY, CONTEXT_TOP_K, Some(&document_ref))
            .await;
        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(json!({
            "context_chunks": hits,
            "context": context,
        }))
    }
}
