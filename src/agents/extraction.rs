//! Document structure extraction stage. Always runs first; its extracted
//! text feeds every downstream stage.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::capability::{DocumentExtractor, DocumentStructure};

use super::{Agent, StageInput};

pub struct ExtractionAgent {
    extractor: std::sync::Arc<dyn DocumentExtractor>,
}

impl ExtractionAgent {
    pub fn new(extractor: std::sync::Arc<dyn DocumentExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Agent for ExtractionAgent {
    fn name(&self) -> &'static str {
        "document_analysis"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let document_ref = match input {
            StageInput::Document { document_ref } => document_ref,
            _ => anyhow::bail!("extraction stage expects a document reference"),
        };

        info!("Extracting document structure for {}", document_ref);
        let structure = self.extractor.extract(&document_ref).await?;
        let page_count = structure.page_count();
        let word_count = structure.word_count();

        Ok(json!({
            "structure": structure,
            "page_count": page_count,
            "word_count": word_count,
        }))
    }
}

/// Pull the full extracted text out of an extraction stage payload.
pub fn text_from_payload(payload: &serde_json::Value) -> String {
    serde_json::from_value::<DocumentStructure>(payload["structure"].clone())
        .map(|structure| structure.full_text())
        .unwrap_or_default()
}
