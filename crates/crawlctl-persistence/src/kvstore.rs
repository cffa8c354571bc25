//! External key-value collaborator (§4.2).
//!
//! Every operation is best-effort: failures are logged by the implementation
//! and swallowed rather than propagated, so callers never need to handle a
//! persistence error on the hot path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);
    async fn del(&self, key: &str);
    /// Sets `key` only if absent. Returns `true` if this call set it.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;
    /// Best-effort pub/sub publish. Most stores don't need this; default is
    /// a no-op so implementations without pub/sub support don't have to
    /// stub it out.
    async fn publish(&self, _channel: &str, _message: &str) {}
}

pub type SharedKVStore = Arc<dyn KVStore>;
