//! Image similarity analysis stage: analyzes each supplied image reference
//! independently.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::warn;

use crate::capability::ImageAnalyzer;

use super::{Agent, StageInput};

pub struct ImageSimilarityAgent {
    analyzer: Arc<dyn ImageAnalyzer>,
}

impl ImageSimilarityAgent {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Agent for ImageSimilarityAgent {
    fn name(&self) -> &'static str {
        "image_analysis"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let image_refs = match input {
            StageInput::Images { image_refs } => image_refs,
            _ => anyhow::bail!("image stage expects image references"),
        };

        // One failed image does not sink the others.
        let analyses = image_refs.iter().map(|image_ref| async move {
            match self.analyzer.analyze_image(image_ref).await {
                Ok(result) => json!({ "image_ref": image_ref, "analysis": result }),
                Err(e) => {
                    warn!("Image analysis of {} failed: {}", image_ref, e);
                    json!({ "image_ref": image_ref, "error": e.to_string() })
                }
            }
        });
        let results: Vec<serde_json::Value> = join_all(analyses).await;

        Ok(json!({
            "image_count": image_refs.len(),
            "results": results,
        }))
    }
}
