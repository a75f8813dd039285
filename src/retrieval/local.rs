//! Local in-process retrieval backend.
//!
//! Token-overlap (Jaccard) scoring over chunks held in memory. Useful for
//! single-process deployments without external search services, and as the
//! backend of record in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{BackendError, RetrievalHit, SearchBackend};

#[derive(Clone)]
struct IndexedChunk {
    document_id: String,
    text: String,
    metadata: HashMap<String, String>,
}

/// In-memory token-overlap search backend.
#[derive(Clone, Default)]
pub struct LocalBackend {
    id: String,
    chunks: Arc<RwLock<Vec<IndexedChunk>>>,
}

impl LocalBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            chunks: Arc::default(),
        }
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        intersection as f64 / union as f64
    }
}

#[async_trait]
impl SearchBackend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index(
        &self,
        document_id: &str,
        chunks: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<(), BackendError> {
        let mut store = self.chunks.write().await;
        for text in chunks {
            store.push(IndexedChunk {
                document_id: document_id.to_string(),
                text: text.clone(),
                metadata: metadata.clone(),
            });
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, BackendError> {
        let query_tokens = Self::tokens(query);
        let store = self.chunks.read().await;

        let mut hits: Vec<RetrievalHit> = store
            .iter()
            .filter(|c| document_filter.map_or(true, |id| c.document_id == id))
            .map(|c| RetrievalHit {
                score: Self::jaccard(&query_tokens, &Self::tokens(&c.text)),
                text: c.text.clone(),
                document_id: c.document_id.clone(),
                backend: self.id.clone(),
                metadata: c.metadata.clone(),
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
