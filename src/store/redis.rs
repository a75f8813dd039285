//! Redis-backed shared store for distributed multi-process coordination.
//!
//! Uses Redis for atomic operations and automatic expiration of counters and
//! cache entries.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{SharedStore, StoreError, StoreResult};

fn cmd_err(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

/// Redis-backed shared store.
pub struct RedisStore {
    conn: ConnectionManager,
    client: redis::Client,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Connection(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            StoreError::Connection(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn, client })
    }

    /// Subscribe to channels matching a pattern, forwarding each message to
    /// `handler`. Runs until the connection drops.
    ///
    /// Used by the event hub relay so pushes from worker processes reach
    /// subscribers connected to other processes.
    pub async fn psubscribe<F>(&self, pattern: &str, mut handler: F) -> StoreResult<()>
    where
        F: FnMut(String, String) + Send,
    {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub.psubscribe(pattern).await.map_err(cmd_err)?;

        use futures::StreamExt;
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = msg.get_payload().map_err(cmd_err)?;
            handler(channel, payload);
        }

        Ok(())
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(cmd_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(cmd_err)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(cmd_err)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(cmd_err)?;
        Ok(removed > 0)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let mut conn = self.conn.clone();

        // Atomic increment-with-expiry. The expiry is only set when the key
        // is created, so the window does not slide on subsequent requests.
        let script = Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return count
        "#,
        );

        let count: i64 = script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(cmd_err)?;

        Ok(count.max(0) as u64)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(cmd_err)?;
        if ttl > 0 {
            Ok(Some(Duration::from_secs(ttl as u64)))
        } else {
            Ok(None)
        }
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await.map_err(cmd_err)
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .brpop(key, timeout.as_secs_f64())
            .await
            .map_err(cmd_err)?;
        Ok(result.map(|(_, value)| value))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd(key, member).await.map_err(cmd_err)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.srem(key, member).await.map_err(cmd_err)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(cmd_err)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish(channel, payload).await.map_err(cmd_err)
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            client: self.client.clone(),
        }
    }
}
