//! Retrieval engine: multi-backend indexing, merged ranked retrieval, and
//! grounded answer generation.
//!
//! Queries fan out to every configured backend concurrently and synchronize
//! only at the merge step. Merged results are deduplicated on a fixed-length
//! text prefix, keeping the higher-scoring duplicate regardless of which
//! backend produced it.

mod backend;
mod local;
mod semantic;
mod vector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::capability::{CapabilityError, Generator};
use crate::guard::CacheGuard;
use crate::utils::{chunk_text, clean_text, truncate_chars};

pub use backend::{BackendError, RetrievalHit, SearchBackend};
pub use local::LocalBackend;
pub use semantic::SemanticBackend;
pub use vector::VectorBackend;

/// Length of the text prefix used as the dedup key.
const DEDUP_PREFIX_CHARS: usize = 100;

/// Errors from the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No generation service configured")]
    NoGenerator,

    #[error(transparent)]
    Generation(#[from] CapabilityError),
}

/// Retrieval engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of hits returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// TTL for memoized retrieval results in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Words per indexing chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlapping words between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_top_k() -> usize {
    5
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            cache_ttl_secs: default_cache_ttl_secs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Outcome of a full question-answering round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub question: String,
    pub answer: String,
    pub sources: Vec<RetrievalHit>,
    pub context_used: usize,
}

/// Merge hits from multiple backends: score-descending order, one hit per
/// dedup key (fixed-length text prefix), truncated to `top_k`.
pub fn merge_hits(mut hits: Vec<RetrievalHit>, top_k: usize) -> Vec<RetrievalHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for hit in hits {
        let key = truncate_chars(&hit.text, DEDUP_PREFIX_CHARS).to_string();
        if seen.insert(key) {
            merged.push(hit);
        }
        if merged.len() >= top_k {
            break;
        }
    }
    merged
}

/// Multi-backend retrieval engine with memoized queries.
pub struct RetrievalEngine {
    backends: Vec<Arc<dyn SearchBackend>>,
    generator: Option<Arc<dyn Generator>>,
    cache: CacheGuard,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        generator: Option<Arc<dyn Generator>>,
        cache: CacheGuard,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backends,
            generator,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Normalize and chunk text for indexing.
    pub fn prepare_document_for_indexing(&self, text: &str) -> Vec<String> {
        let cleaned = clean_text(text);
        chunk_text(&cleaned, self.config.chunk_size, self.config.chunk_overlap)
    }

    /// Write chunks into every configured backend.
    ///
    /// A backend failure is logged and skipped; returns how many backends
    /// accepted the document.
    pub async fn index_document(
        &self,
        document_id: &str,
        chunks: &[String],
        metadata: &HashMap<String, String>,
    ) -> usize {
        let writes = self
            .backends
            .iter()
            .map(|backend| async move {
                match backend.index(document_id, chunks, metadata).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Indexing {} into {} failed: {}", document_id, backend.id(), e);
                        false
                    }
                }
            })
            .collect::<Vec<_>>();

        let indexed = join_all(writes).await.into_iter().filter(|ok| *ok).count();
        info!(
            "Indexed {} chunks of {} into {}/{} backends",
            chunks.len(),
            document_id,
            indexed,
            self.backends.len()
        );
        indexed
    }

    /// Query all backends concurrently, without memoization.
    ///
    /// Backend failures degrade to empty result sets so one unavailable
    /// source never sinks the query.
    pub async fn search_all(
        &self,
        query: &str,
        top_k: usize,
        document_filter: Option<&str>,
    ) -> Vec<RetrievalHit> {
        let searches = self
            .backends
            .iter()
            .map(|backend| async move {
                match backend.search(query, top_k, document_filter).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!("Search on {} failed: {}", backend.id(), e);
                        Vec::new()
                    }
                }
            })
            .collect::<Vec<_>>();

        let all: Vec<RetrievalHit> = join_all(searches).await.into_iter().flatten().collect();
        merge_hits(all, top_k)
    }

    /// Retrieve relevant context for a query, memoized through the cache
    /// guard keyed by (query, top_k, filter).
    ///
    /// Cached entries are not invalidated by later indexing; staleness is
    /// bounded by the configured TTL.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        document_filter: Option<&str>,
    ) -> Vec<RetrievalHit> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let args = (query, top_k, document_filter);

        let result: Result<Vec<RetrievalHit>, std::convert::Infallible> = self
            .cache
            .get_or_compute("rag_retrieve", &args, ttl, || async {
                Ok(self.search_all(query, top_k, document_filter).await)
            })
            .await;

        match result {
            Ok(hits) => hits,
            Err(never) => match never {},
        }
    }

    /// Generate an answer grounded in the supplied context.
    ///
    /// The prompt instructs the model to answer only from the context and to
    /// decline explicitly when the context is insufficient.
    pub async fn generate_answer(
        &self,
        query: &str,
        context_texts: &[String],
        max_tokens: u32,
    ) -> Result<String, RetrievalError> {
        let generator = self.generator.as_ref().ok_or(RetrievalError::NoGenerator)?;
        let prompt = build_grounded_prompt(query, context_texts);
        Ok(generator.generate(&prompt, max_tokens).await?)
    }

    /// Full RAG round: retrieve context, then generate a grounded answer.
    pub async fn answer_question(
        &self,
        question: &str,
        document_filter: Option<&str>,
        top_k: usize,
    ) -> Result<AnswerOutcome, RetrievalError> {
        let sources = self.retrieve_context(question, top_k, document_filter).await;
        let context_texts: Vec<String> = sources.iter().map(|h| h.text.clone()).collect();
        let answer = self.generate_answer(question, &context_texts, 512).await?;

        Ok(AnswerOutcome {
            question: question.to_string(),
            answer,
            context_used: sources.len(),
            sources,
        })
    }
}

fn build_grounded_prompt(query: &str, context_texts: &[String]) -> String {
    format!(
        r#"Context information is below:
---------------------
{context}
---------------------

Given the context information and not prior knowledge, answer the question.
If the answer is not in the context, say "I cannot answer based on the provided context."

Question: {query}
Answer:"#,
        context = context_texts.join("\n\n"),
        query = query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn hit(text: &str, score: f64, backend: &str) -> RetrievalHit {
        RetrievalHit {
            text: text.to_string(),
            document_id: "doc-1".to_string(),
            score,
            backend: backend.to_string(),
            metadata: HashMap::new(),
        }
    }

    fn engine_with(backends: Vec<Arc<dyn SearchBackend>>) -> RetrievalEngine {
        let store = Arc::new(MemoryStore::new());
        RetrievalEngine::new(
            backends,
            None,
            CacheGuard::new(store, "veridoc:cache"),
            RetrievalConfig::default(),
        )
    }

    #[test]
    fn test_merge_keeps_higher_scoring_duplicate_across_backends() {
        let shared = "x".repeat(120); // identical 100-char prefix
        let hits = vec![
            hit(&shared, 0.4, "vector"),
            hit(&shared, 0.9, "semantic"),
            hit("different text entirely", 0.5, "vector"),
        ];

        let merged = merge_hits(hits, 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].score, 0.9);
        assert_eq!(merged[0].backend, "semantic");
    }

    #[test]
    fn test_merge_sorts_descending_and_truncates() {
        let hits = vec![
            hit("alpha", 0.1, "a"),
            hit("bravo", 0.9, "a"),
            hit("charlie", 0.5, "b"),
        ];
        let merged = merge_hits(hits, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "bravo");
        assert_eq!(merged[1].text, "charlie");
    }

    #[test]
    fn test_texts_differing_only_past_the_prefix_collapse() {
        let a = format!("{}{}", "y".repeat(100), " tail one");
        let b = format!("{}{}", "y".repeat(100), " tail two");
        let merged = merge_hits(vec![hit(&a, 0.5, "a"), hit(&b, 0.4, "b")], 10);
        // Same 100-char prefix collapses them even though the tails differ.
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_grounded_prompt_contains_context_and_refusal_clause() {
        let prompt = build_grounded_prompt("what?", &["ctx chunk".to_string()]);
        assert!(prompt.contains("ctx chunk"));
        assert!(prompt.contains("I cannot answer based on the provided context."));
        assert!(prompt.contains("Question: what?"));
    }

    #[tokio::test]
    async fn test_retrieve_context_is_memoized() {
        let backend = Arc::new(LocalBackend::new("local"));
        backend
            .index(
                "doc-1",
                &["solar panel efficiency report".to_string()],
                &HashMap::new(),
            )
            .await
            .unwrap();

        let engine = engine_with(vec![backend.clone()]);
        let first = engine.retrieve_context("solar panel", 5, None).await;
        assert_eq!(first.len(), 1);

        // Re-indexing does not invalidate the memoized result (staleness is
        // TTL-bounded).
        backend
            .index(
                "doc-2",
                &["solar panel installation guide".to_string()],
                &HashMap::new(),
            )
            .await
            .unwrap();
        let second = engine.retrieve_context("solar panel", 5, None).await;
        assert_eq!(second.len(), 1);

        // An uncached query sees the new document.
        let fresh = engine.search_all("solar panel", 5, None).await;
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_document_cleans_and_chunks() {
        let engine = engine_with(vec![]);
        let text = "word ".repeat(600);
        let chunks = engine.prepare_document_for_indexing(&text);
        assert!(chunks.len() > 1);
        assert!(chunks[0].split_whitespace().count() <= 512);
    }

    #[tokio::test]
    async fn test_generate_answer_without_generator_errors() {
        let engine = engine_with(vec![]);
        let result = engine.generate_answer("q", &[], 128).await;
        assert!(matches!(result, Err(RetrievalError::NoGenerator)));
    }
}
