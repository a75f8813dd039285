//! Document structure extraction service client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CapabilityError;

/// One extracted block of text (typically a page or section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub page: u32,
    pub text: String,
}

/// Structured extraction result for a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStructure {
    #[serde(default)]
    pub blocks: Vec<TextBlock>,
}

impl DocumentStructure {
    /// Full document text, blocks joined by blank lines.
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn page_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| crate::utils::count_words(&b.text))
            .sum()
    }
}

/// Extracts structured text from a document reference.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document_ref: &str) -> Result<DocumentStructure, CapabilityError>;

    /// Whether the extraction service is reachable.
    async fn is_available(&self) -> bool;
}

/// HTTP client for the extraction service.
pub struct ExtractorClient {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    document_ref: &'a str,
}

impl ExtractorClient {
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
impl DocumentExtractor for ExtractorClient {
    async fn extract(&self, document_ref: &str) -> Result<DocumentStructure, CapabilityError> {
        debug!("Extracting document structure for {}", document_ref);
        let url = format!("{}/extract", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&ExtractRequest { document_ref })
            .send()
            .await
            .map_err(|e| CapabilityError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CapabilityError::Service(format!("HTTP {}", resp.status())));
        }

        resp.json()
            .await
            .map_err(|e| CapabilityError::Parse(e.to_string()))
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
