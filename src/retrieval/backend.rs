//! Search backend trait shared by all retrieval sources.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a retrieval backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Response parse error: {0}")]
    Parse(String),
}

/// One retrieval result. Ephemeral, produced per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub text: String,
    pub document_id: String,
    pub score: f64,
    /// Id of the backend that produced this hit.
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A retrieval source (dense-vector or keyword/semantic index).
///
/// Implementations wrap a specific index and expose it through a uniform
/// interface so the engine can fan queries out identically.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable identifier recorded on hits and in logs.
    fn id(&self) -> &str;

    /// Write document chunks into the index.
    async fn index(
        &self,
        document_id: &str,
        chunks: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<(), BackendError>;

    /// Query the index, optionally filtered to one document.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, BackendError>;
}
