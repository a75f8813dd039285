//! Dense-vector search service client.
//!
//! Talks to an embedding-index service (embeddings are computed service-side)
//! over a small JSON API: POST /index and POST /search.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendError, RetrievalHit, SearchBackend};

/// HTTP client for the dense-vector index service.
pub struct VectorBackend {
    id: String,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct IndexRequest<'a> {
    document_id: &'a str,
    chunks: &'a [String],
    metadata: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<VectorHit>,
}

#[derive(Deserialize)]
struct VectorHit {
    text: String,
    document_id: String,
    score: f64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl VectorBackend {
    pub fn new(
        id: &str,
        endpoint: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SearchBackend for VectorBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index(
        &self,
        document_id: &str,
        chunks: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<(), BackendError> {
        debug!("Indexing {} chunks for {} into {}", chunks.len(), document_id, self.id);
        let url = format!("{}/index", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&IndexRequest {
                document_id,
                chunks,
                metadata,
            })
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, BackendError> {
        let url = format!("{}/search", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&SearchRequest {
                query,
                top_k,
                document_id: document_filter,
            })
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!("HTTP {}", resp.status())));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|hit| RetrievalHit {
                text: hit.text,
                document_id: hit.document_id,
                score: hit.score,
                backend: self.id.clone(),
                metadata: hit.metadata,
            })
            .collect())
    }
}
