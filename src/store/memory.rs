//! In-memory shared store used by tests and single-process runs.
//!
//! Mirrors the Redis semantics closely enough for the coordination code to be
//! exercised without a live server: expiring keys, atomic counters, blocking
//! list pops via a notify handle, and recorded publishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::{SharedStore, StoreResult};

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Utc::now())
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, Vec<String>>,
    published: Vec<(String, String)>,
}

/// In-memory store with Redis-like expiry semantics.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    list_notify: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, oldest first. Test observability hook.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().await.published.clone()
    }

    /// Force-expire a key, simulating store-level TTL eviction.
    pub async fn expire_now(&self, key: &str) {
        self.inner.lock().await.entries.remove(key);
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get(key) {
            if entry.expired() {
                inner.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default()),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner.entries.remove(key).is_some();
        let had_list = inner.lists.remove(key).is_some();
        let had_set = inner.sets.remove(key).is_some();
        Ok(existed || had_list || had_set)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;

        let fresh = match inner.entries.get(key) {
            Some(entry) if !entry.expired() => false,
            _ => true,
        };

        let count = if fresh {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: "1".to_string(),
                    expires_at: Some(
                        Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
                    ),
                },
            );
            1
        } else {
            let entry = inner.entries.get_mut(key).unwrap();
            let next = entry.value.parse::<u64>().unwrap_or(0) + 1;
            entry.value = next.to_string();
            next
        };

        Ok(count)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(key).and_then(|e| {
            e.expires_at
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .filter(|d| !d.is_zero())
        }))
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        drop(inner);
        self.list_notify.notify_waiters();
        Ok(())
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(list) = inner.lists.get_mut(key) {
                    if let Some(value) = list.pop() {
                        return Ok(Some(value));
                    }
                }
            }
            let notified = self.list_notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let set = inner.sets.entry(key.to_string()).or_default();
        if !set.iter().any(|m| m == member) {
            set.push(member.to_string());
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(set) = inner.sets.get_mut(key) {
            set.retain(|m| m != member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.sets.get(key).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .published
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}
