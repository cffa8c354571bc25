//! Redis-backed `KVStore`, pooled the way `riptide-persistence`'s cache
//! manager pools connections: a small round-robin vec of multiplexed
//! connections rather than one connection per operation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::kvstore::KVStore;

pub struct RedisKVStore {
    connections: RwLock<Vec<MultiplexedConnection>>,
    next: AtomicUsize,
}

impl RedisKVStore {
    pub async fn connect(redis_url: &str, pool_size: usize) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut connections = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            connections.push(client.get_multiplexed_async_connection().await?);
        }
        Ok(Self {
            connections: RwLock::new(connections),
            next: AtomicUsize::new(0),
        })
    }

    async fn connection(&self) -> MultiplexedConnection {
        let connections = self.connections.read().await;
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % connections.len();
        connections[idx].clone()
    }
}

#[async_trait]
impl KVStore for RedisKVStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%key, error = %err, "kvstore get failed, treating as absent");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut conn = self.connection().await;
        let result = match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };
        if let Err(err) = result {
            tracing::warn!(%key, error = %err, "kvstore set failed");
        }
    }

    async fn del(&self, key: &str) {
        let mut conn = self.connection().await;
        if let Err(err) = conn.del::<_, ()>(key).await {
            tracing::warn!(%key, error = %err, "kvstore del failed");
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let mut conn = self.connection().await;
        let set: redis::RedisResult<bool> = conn.set_nx(key, value).await;
        match set {
            Ok(true) => {
                if let Some(ttl) = ttl {
                    if let Err(err) = conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64).await {
                        tracing::warn!(%key, error = %err, "kvstore setNX expire failed");
                    }
                }
                true
            }
            Ok(false) => false,
            Err(err) => {
                tracing::warn!(%key, error = %err, "kvstore setNX failed");
                false
            }
        }
    }

    async fn publish(&self, channel: &str, message: &str) {
        let mut conn = self.connection().await;
        if let Err(err) = conn.publish::<_, _, ()>(channel, message).await {
            tracing::warn!(%channel, error = %err, "kvstore publish failed");
        }
    }
}

/// In-memory stand-in used by tests and by any deployment without a Redis
/// dependency; implements the same non-fatal-failure contract trivially
/// (it cannot fail).
pub struct InMemoryKVStore {
    data: RwLock<std::collections::HashMap<String, String>>,
}

impl Default for InMemoryKVStore {
    fn default() -> Self {
        Self {
            data: RwLock::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl KVStore for InMemoryKVStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.data.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) {
        self.data.write().await.insert(key.to_string(), value.to_string());
    }

    async fn del(&self, key: &str) {
        self.data.write().await.remove(key);
    }

    async fn set_nx(&self, key: &str, value: &str, _ttl: Option<Duration>) -> bool {
        let mut guard = self.data.write().await;
        if guard.contains_key(key) {
            false
        } else {
            guard.insert(key.to_string(), value.to_string());
            true
        }
    }
}

pub fn shared_in_memory() -> Arc<dyn KVStore> {
    Arc::new(InMemoryKVStore::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trips() {
        let store = InMemoryKVStore::default();
        store.set("k", "v", None).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
        store.del("k").await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn in_memory_set_nx_only_sets_once() {
        let store = InMemoryKVStore::default();
        assert!(store.set_nx("lock", "a", None).await);
        assert!(!store.set_nx("lock", "b", None).await);
        assert_eq!(store.get("lock").await, Some("a".to_string()));
    }
}
