//! Analysis memory records.
//!
//! A memory ties a completed analysis to its follow-up conversation so chat
//! answers can be grounded in the document's findings. Records live in the
//! shared store under `memory:{id}` with a set index, so any process can
//! serve them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::store::{SharedStore, StoreError, StoreResult};

const INDEX_KEY: &str = "memory:index";
const ID_HEX_LEN: usize = 12;

/// One question/answer round appended to a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInteraction {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub context: String,
}

/// A stored analysis memory. `chat_history` is append-only and
/// timestamp-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub document_id: String,
    pub analysis: serde_json::Value,
    #[serde(default)]
    pub chat_history: Vec<ChatInteraction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CRUD and chat-history operations over memory records.
#[derive(Clone)]
pub struct MemoryService {
    store: Arc<dyn SharedStore>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    fn record_key(id: &str) -> String {
        format!("memory:{}", id)
    }

    fn new_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("mem_{}", &hex[..ID_HEX_LEN])
    }

    /// Create a memory for a completed analysis.
    pub async fn create(
        &self,
        document_id: &str,
        analysis: serde_json::Value,
    ) -> StoreResult<MemoryRecord> {
        let now = Utc::now();
        let record = MemoryRecord {
            id: Self::new_id(),
            document_id: document_id.to_string(),
            analysis,
            chat_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.write(&record).await?;
        self.store.set_add(INDEX_KEY, &record.id).await?;
        info!("Created memory {} for document {}", record.id, document_id);
        Ok(record)
    }

    /// Fetch a memory, or None when the id is unknown.
    pub async fn get(&self, id: &str) -> StoreResult<Option<MemoryRecord>> {
        match self.store.get(&Self::record_key(id)).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Decode(format!("bad memory record: {}", e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Append one chat round. Returns the updated record, or None when the
    /// memory does not exist.
    pub async fn append_chat_interaction(
        &self,
        id: &str,
        question: &str,
        answer: &str,
        context: &str,
    ) -> StoreResult<Option<MemoryRecord>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };

        record.chat_history.push(ChatInteraction {
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            context: context.to_string(),
        });
        record.updated_at = Utc::now();
        self.write(&record).await?;
        Ok(Some(record))
    }

    /// The most recent `limit` chat rounds, oldest first.
    pub async fn chat_history(
        &self,
        id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatInteraction>> {
        let Some(record) = self.get(id).await? else {
            return Ok(Vec::new());
        };
        let skip = record.chat_history.len().saturating_sub(limit);
        Ok(record.chat_history.into_iter().skip(skip).collect())
    }

    /// Formatted analysis summary used to ground chat answers.
    pub async fn chat_context(&self, id: &str) -> StoreResult<Option<String>> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };

        let mut lines = vec![format!("Document: {}", record.document_id)];
        if let Some(stages) = record.analysis["stages"].as_object() {
            if let Some(insights) = stages
                .get("insights")
                .and_then(|s| s["payload"]["insights"].as_str())
            {
                lines.push(format!("Insights: {}", insights));
            }
            if let Some(verdict) = stages
                .get("ai_detection")
                .and_then(|s| s["payload"]["overall_classification"].as_str())
            {
                lines.push(format!("AI detection verdict: {}", verdict));
            }
            if let Some(matches) = stages
                .get("similarity")
                .and_then(|s| s["payload"]["total_matches"].as_u64())
            {
                lines.push(format!("Similar passages found: {}", matches));
            }
        }
        Ok(Some(lines.join("\n")))
    }

    /// All stored memories, in index order.
    pub async fn list(&self) -> StoreResult<Vec<MemoryRecord>> {
        let ids = self.store.set_members(INDEX_KEY).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete a memory and its index entry. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.set_remove(INDEX_KEY, id).await?;
        self.store.delete(&Self::record_key(id)).await
    }

    async fn write(&self, record: &MemoryRecord) -> StoreResult<()> {
        let raw = serde_json::to_string(record).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.store.set(&Self::record_key(&record.id), &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> MemoryService {
        MemoryService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_ids_have_mem_prefix_and_12_hex() {
        let record = service().create("doc-1", json!({})).await.unwrap();
        let suffix = record.id.strip_prefix("mem_").unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let service = service();
        let created = service
            .create("doc-1", json!({"stages": {}}))
            .await
            .unwrap();
        let fetched = service.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.document_id, "doc-1");
        assert!(fetched.chat_history.is_empty());
        assert!(service.get("mem_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chat_history_is_append_only_and_limited() {
        let service = service();
        let record = service.create("doc-1", json!({})).await.unwrap();

        for i in 0..5 {
            service
                .append_chat_interaction(&record.id, &format!("q{}", i), "a", "")
                .await
                .unwrap()
                .unwrap();
        }

        let full = service.chat_history(&record.id, 100).await.unwrap();
        assert_eq!(full.len(), 5);
        assert_eq!(full[0].question, "q0");
        assert!(full.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let recent = service.chat_history(&record.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q3");
        assert_eq!(recent[1].question, "q4");
    }

    #[tokio::test]
    async fn test_append_to_missing_memory_is_none() {
        let appended = service()
            .append_chat_interaction("mem_missing", "q", "a", "")
            .await
            .unwrap();
        assert!(appended.is_none());
    }

    #[tokio::test]
    async fn test_chat_context_summarizes_analysis() {
        let service = service();
        let analysis = json!({
            "stages": {
                "insights": {"payload": {"insights": "Mostly routine correspondence."}},
                "ai_detection": {"payload": {"overall_classification": "human_written"}},
                "similarity": {"payload": {"total_matches": 3}},
            }
        });
        let record = service.create("doc-1", analysis).await.unwrap();

        let context = service.chat_context(&record.id).await.unwrap().unwrap();
        assert!(context.contains("Document: doc-1"));
        assert!(context.contains("Mostly routine correspondence."));
        assert!(context.contains("human_written"));
        assert!(context.contains("Similar passages found: 3"));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let service = service();
        let a = service.create("doc-a", json!({})).await.unwrap();
        let b = service.create("doc-b", json!({})).await.unwrap();

        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 2);

        assert!(service.delete(&a.id).await.unwrap());
        assert!(!service.delete(&a.id).await.unwrap());

        let remaining = service.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);
    }
}
