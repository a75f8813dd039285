//! AI-generated-text classification service client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CapabilityError;

/// Verdict for one classified text span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextClassification {
    pub is_human: bool,
    /// Classifier confidence in its verdict, 0..=1.
    pub confidence: f64,
}

/// Classifies text spans as human-written or AI-generated.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<TextClassification>, CapabilityError>;
}

/// HTTP client for the text classification service.
pub struct TextClassifierClient {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    results: Vec<TextClassification>,
}

impl TextClassifierClient {
    pub fn new(endpoint: &str, timeout: std::time::Duration) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextClassifier for TextClassifierClient {
    async fn classify_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<TextClassification>, CapabilityError> {
        debug!("Classifying {} text spans", texts.len());
        let url = format!("{}/classify", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&ClassifyRequest { texts })
            .send()
            .await
            .map_err(|e| CapabilityError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CapabilityError::Service(format!("HTTP {}", resp.status())));
        }

        let parsed: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(e.to_string()))?;
        Ok(parsed.results)
    }
}
