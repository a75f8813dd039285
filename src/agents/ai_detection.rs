//! AI-generated-content detection stage: classifies each paragraph of the
//! extracted text and aggregates the verdicts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::capability::TextClassifier;
use crate::utils::split_into_paragraphs;

use super::{Agent, StageInput};

/// Paragraphs shorter than this are noise (page numbers, headers) and are
/// skipped.
const MIN_PARAGRAPH_CHARS: usize = 40;

pub struct AiDetectionAgent {
    classifier: Arc<dyn TextClassifier>,
}

impl AiDetectionAgent {
    pub fn new(classifier: Arc<dyn TextClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Agent for AiDetectionAgent {
    fn name(&self) -> &'static str {
        "ai_detection"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let text = match input {
            StageInput::Text { text, .. } => text,
            _ => anyhow::bail!("ai detection stage expects extracted text"),
        };

        let paragraphs: Vec<String> = split_into_paragraphs(&text)
            .into_iter()
            .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
            .collect();

        if paragraphs.is_empty() {
            return Ok(json!({
                "paragraph_count": 0,
                "ai_generated_count": 0,
                "human_written_count": 0,
                "average_confidence": 0.0,
                "overall_classification": "unknown",
                "detailed_results": [],
            }));
        }

        let verdicts = self.classifier.classify_batch(&paragraphs).await?;
        info!("Classified {} paragraphs", verdicts.len());

        let ai_count = verdicts.iter().filter(|v| !v.is_human).count();
        let human_count = verdicts.len() - ai_count;
        let average_confidence =
            verdicts.iter().map(|v| v.confidence).sum::<f64>() / verdicts.len() as f64;
        let overall = if ai_count > human_count {
            "ai_generated"
        } else {
            "human_written"
        };

        let detailed: Vec<serde_json::Value> = paragraphs
            .iter()
            .zip(&verdicts)
            .map(|(paragraph, verdict)| {
                json!({
                    "text_preview": crate::utils::truncate_chars(paragraph, 120),
                    "is_human": verdict.is_human,
                    "confidence": verdict.confidence,
                })
            })
            .collect();

        Ok(json!({
            "paragraph_count": paragraphs.len(),
            "ai_generated_count": ai_count,
            "human_written_count": human_count,
            "average_confidence": average_confidence,
            "overall_classification": overall,
            "detailed_results": detailed,
        }))
    }
}
