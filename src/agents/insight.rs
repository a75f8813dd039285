//! Insight synthesis stage: runs last, over the results of every prior
//! stage, and produces a narrative summary plus deterministic observations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::capability::Generator;

use super::{Agent, AgentResult, StageInput};

pub struct InsightAgent {
    generator: Option<Arc<dyn Generator>>,
}

impl InsightAgent {
    pub fn new(generator: Option<Arc<dyn Generator>>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Agent for InsightAgent {
    fn name(&self) -> &'static str {
        "insights"
    }

    async fn analyze(&self, input: StageInput) -> anyhow::Result<serde_json::Value> {
        let stages = match input {
            StageInput::Aggregate { stages } => stages,
            _ => anyhow::bail!("insight stage expects the stage aggregate"),
        };

        let observations = generate_observations(&stages);

        let insights = match &self.generator {
            Some(generator) => {
                let prompt = build_insight_prompt(&observations);
                match generator.generate(&prompt, 512).await {
                    Ok(text) => text,
                    Err(e) => {
                        // Observations still stand on their own.
                        warn!("Insight generation failed, falling back: {}", e);
                        observations.join(" ")
                    }
                }
            }
            None => observations.join(" "),
        };

        Ok(json!({
            "insights": insights,
            "observations": observations,
        }))
    }
}

fn build_insight_prompt(observations: &[String]) -> String {
    format!(
        "You are reviewing the results of an automated document analysis.\n\
         Findings:\n{}\n\n\
         Write a short plain-language summary of what these findings mean \
         for a reviewer, noting anything that warrants closer attention.",
        observations
            .iter()
            .map(|o| format!("- {}", o))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Deterministic observations pulled from each completed stage payload.
fn generate_observations(stages: &BTreeMap<String, AgentResult>) -> Vec<String> {
    let mut observations = Vec::new();

    if let Some(extraction) = stages.get("document_analysis").filter(|r| r.is_success()) {
        let pages = extraction.payload["page_count"].as_u64().unwrap_or(0);
        let words = extraction.payload["word_count"].as_u64().unwrap_or(0);
        observations.push(format!(
            "The document spans {} pages and {} words.",
            pages, words
        ));
    }

    if let Some(similarity) = stages.get("similarity").filter(|r| r.is_success()) {
        let total = similarity.payload["total_matches"].as_u64().unwrap_or(0);
        if total > 0 {
            observations.push(format!(
                "{} similar passages were found in previously indexed documents.",
                total
            ));
        } else {
            observations.push("No similar passages were found in the index.".to_string());
        }
    }

    if let Some(detection) = stages.get("ai_detection").filter(|r| r.is_success()) {
        let verdict = detection.payload["overall_classification"]
            .as_str()
            .unwrap_or("unknown");
        let confidence = detection.payload["average_confidence"].as_f64().unwrap_or(0.0);
        observations.push(format!(
            "The text reads as {} overall (average confidence {:.0}%).",
            verdict.replace('_', " "),
            confidence * 100.0
        ));
    }

    if let Some(images) = stages.get("image_analysis").filter(|r| r.is_success()) {
        let count = images.payload["image_count"].as_u64().unwrap_or(0);
        observations.push(format!("{} images were analyzed for similarity.", count));
    }

    let failed: Vec<&str> = stages
        .iter()
        .filter(|(_, r)| !r.is_success())
        .map(|(name, _)| name.as_str())
        .collect();
    if !failed.is_empty() {
        observations.push(format!(
            "Some analyses did not complete: {}.",
            failed.join(", ")
        ));
    }

    observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStatus;

    fn result(name: &str, status: AgentStatus, payload: serde_json::Value) -> AgentResult {
        AgentResult {
            agent_name: name.to_string(),
            status,
            payload,
            execution_time: 0.1,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_observations_cover_completed_stages() {
        let mut stages = BTreeMap::new();
        stages.insert(
            "document_analysis".to_string(),
            result(
                "document_analysis",
                AgentStatus::Success,
                json!({"page_count": 3, "word_count": 1200}),
            ),
        );
        stages.insert(
            "similarity".to_string(),
            result("similarity", AgentStatus::Success, json!({"total_matches": 2})),
        );
        stages.insert(
            "ai_detection".to_string(),
            result(
                "ai_detection",
                AgentStatus::Error,
                json!({"error": "service down"}),
            ),
        );

        let observations = generate_observations(&stages);
        assert!(observations.iter().any(|o| o.contains("3 pages")));
        assert!(observations.iter().any(|o| o.contains("2 similar passages")));
        assert!(observations.iter().any(|o| o.contains("ai_detection")));
    }

    #[tokio::test]
    async fn test_no_generator_falls_back_to_observations() {
        let agent = InsightAgent::new(None);
        let mut stages = BTreeMap::new();
        stages.insert(
            "similarity".to_string(),
            result("similarity", AgentStatus::Success, json!({"total_matches": 0})),
        );

        let payload = agent
            .analyze(StageInput::Aggregate { stages })
            .await
            .unwrap();
        assert!(payload["insights"]
            .as_str()
            .unwrap()
            .contains("No similar passages"));
        assert_eq!(payload["observations"].as_array().unwrap().len(), 1);
    }
}
