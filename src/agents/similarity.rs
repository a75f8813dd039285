//! Text similarity detection stage: searches every retrieval backend for
//! documents resembling the extracted text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::retrieval::RetrievalEngine;
use crate::utils::truncate_chars;

use super::{Agent, StageInput};

/// Characters of extracted text used as the similarity probe.
const PROBE_CHARS: usize = 2000;
const MATCH_LIMIT: usize = 10;

pub struct SimilarityAgent {
    engine: Arc<RetrievalEngine>,
}

impl SimilarityAgent {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Agent for SimilarityAgent {
    fn name(&self) -> &'static str {
        "similarity"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let text = match input {
            StageInput::Text { text, .. } => text,
            _ => anyhow::bail!("similarity stage expects extracted text"),
        };

        let probe = truncate_chars(&text, PROBE_CHARS);
        let matches = self.engine.search_all(probe, MATCH_LIMIT, None).await;
        let total_matches = matches.len();
        info!("Similarity stage found {} matches", total_matches);

        Ok(json!({
            "matches": matches,
            "total_matches": total_matches,
        }))
    }
}
