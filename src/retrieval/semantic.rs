//! Keyword/semantic search service client (txtai-style REST API).

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendError, RetrievalHit, SearchBackend};

/// HTTP client for a txtai-style semantic search service.
///
/// Documents are added with POST /add then committed with GET /index;
/// queries go through GET /search.
pub struct SemanticBackend {
    id: String,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct AddDocument<'a> {
    id: String,
    text: &'a str,
    document_id: &'a str,
    #[serde(flatten)]
    metadata: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct SemanticHit {
    #[serde(default)]
    text: String,
    #[serde(default)]
    document_id: String,
    #[serde(default)]
    score: f64,
}

impl SemanticBackend {
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
impl SearchBackend for SemanticBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index(
        &self,
        document_id: &str,
        chunks: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<(), BackendError> {
        debug!("Adding {} chunks for {} to {}", chunks.len(), document_id, self.id);

        let documents: Vec<AddDocument> = chunks
            .iter()
            .enumerate()
            .map(|(i, text)| AddDocument {
                id: format!("{}_{}", document_id, i),
                text,
                document_id,
                metadata,
            })
            .collect();

        let add_url = format!("{}/add", self.endpoint);
        let resp = self
            .client
            .post(&add_url)
            .json(&documents)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!("HTTP {}", resp.status())));
        }

        // Commit the pending additions to the index.
        let index_url = format!("{}/index", self.endpoint);
        let resp = self
            .client
            .get(&index_url)
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
        let mut request = self
            .client
            .get(&url)
            .query(&[("query", query), ("limit", &top_k.to_string())]);
        if let Some(document_id) = document_filter {
            request = request.query(&[("document_id", document_id)]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!("HTTP {}", resp.status())));
        }

        let hits: Vec<SemanticHit> = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(hits
            .into_iter()
            .map(|hit| RetrievalHit {
                text: hit.text,
                document_id: hit.document_id,
                score: hit.score,
                backend: self.id.clone(),
                metadata: HashMap::new(),
            })
            .collect())
    }
}
