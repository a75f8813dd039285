//! Image similarity analysis service client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::CapabilityError;

/// Analyzes a single image reference, returning the service's verdict as-is.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze_image(&self, image_ref: &str) -> Result<serde_json::Value, CapabilityError>;
}

/// HTTP client for the image analysis service.
pub struct ImageAnalyzerClient {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image_ref: &'a str,
}

impl ImageAnalyzerClient {
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
impl ImageAnalyzer for ImageAnalyzerClient {
    async fn analyze_image(&self, image_ref: &str) -> Result<serde_json::Value, CapabilityError> {
        debug!("Analyzing image {}", image_ref);
        let url = format!("{}/analyze", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&ImageRequest { image_ref })
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
}
