//! Cache-aside memoization of expensive calls.
//!
//! Keys are `{prefix}:{function}:{args_hash}` where the hash covers the
//! serialized arguments. A missing or unreachable cache only costs recompute
//! time; the wrapped computation's result is always returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::store::SharedStore;

/// Default TTL for cached values.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Cache-aside wrapper over the shared store.
pub struct CacheGuard {
    store: Arc<dyn SharedStore>,
    prefix: String,
}

impl CacheGuard {
    pub fn new(store: Arc<dyn SharedStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    /// Deterministic cache key from function identity plus serialized args.
    pub fn cache_key<A: Serialize>(&self, function: &str, args: &A) -> String {
        let serialized = serde_json::to_string(args).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        let args_hash = hex::encode(hasher.finalize());
        format!("{}:{}:{}", self.prefix, function, args_hash)
    }

    /// Return the cached value for (function, args) or compute and store it.
    ///
    /// A store write failure still returns the freshly computed value.
    pub async fn get_or_compute<A, T, E, F, Fut>(
        &self,
        function: &str,
        args: &A,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.cache_key(function, args);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!("Cache hit for {}", function);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                }
            },
            Ok(None) => {
                debug!("Cache miss for {}", function);
            }
            Err(e) => {
                warn!("Cache read failed for {}, bypassing: {}", key, e);
            }
        }

        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(serialized) => {
                if let Err(e) = self.store.set_ex(&key, &serialized, ttl).await {
                    warn!("Cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => {
                warn!("Cache serialization failed for {}: {}", function, e);
            }
        }

        Ok(value)
    }

    /// Drop a cached entry.
    pub async fn invalidate<A: Serialize>(&self, function: &str, args: &A) {
        let key = self.cache_key(function, args);
        if let Err(e) = self.store.delete(&key).await {
            warn!("Cache invalidation failed for {}: {}", key, e);
        }
    }
}
