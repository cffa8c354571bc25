//! Background flusher of endpoint aggregates into the `KVStore` (§4.8).

use std::sync::Arc;
use std::time::Duration;

use crawlctl_persistence::KVStore;
use tokio::sync::mpsc;

use crate::monitor::Monitor;

const ENDPOINT_STATS_KEY: &str = "monitor:endpoint_stats";
const ENDPOINT_STATS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct PersistenceWorker {
    monitor: Arc<Monitor>,
    kvstore: Arc<dyn KVStore>,
    hints: mpsc::Receiver<()>,
}

impl PersistenceWorker {
    pub async fn new(monitor: Arc<Monitor>, kvstore: Arc<dyn KVStore>) -> Self {
        let hints = monitor
            .take_hint_receiver()
            .await
            .expect("PersistenceWorker::new called more than once");
        Self { monitor, kvstore, hints }
    }

    /// Consumes hints until the channel closes, flushing once per hint plus
    /// one final flush on exit.
    pub async fn run(mut self) {
        while self.hints.recv().await.is_some() {
            flush_once(&self.monitor, &self.kvstore).await;
        }
        flush_once(&self.monitor, &self.kvstore).await;
    }
}

/// Serializes and persists the current endpoint aggregates. Shared by the
/// worker's own hint loop and by the shutdown path's final flush, since the
/// `Monitor`'s hint channel lives for the whole process and never closes on
/// its own.
pub async fn flush_once(monitor: &Monitor, kvstore: &Arc<dyn KVStore>) {
    let aggregates = monitor.get_endpoint_aggregates().await;
    match serde_json::to_string(&aggregates) {
        Ok(payload) => {
            kvstore.set(ENDPOINT_STATS_KEY, &payload, Some(ENDPOINT_STATS_TTL)).await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize endpoint aggregates, skipping flush");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlctl_persistence::InMemoryKVStore;
    use crawlctl_pool::{BrowserPool, EngineHandle, EngineLauncher, MemoryProbe, PoolConfig};
    use async_trait::async_trait;

    struct NoopHandle;
    #[async_trait]
    impl EngineHandle for NoopHandle {
        async fn close(&self) {}
    }
    struct NoopLauncher;
    #[async_trait]
    impl EngineLauncher for NoopLauncher {
        async fn launch(&self, _spec: &crawlctl_types::BrowserSpec) -> crawlctl_types::CoreResult<Box<dyn EngineHandle>> {
            Ok(Box::new(NoopHandle))
        }
    }

    #[tokio::test]
    async fn hint_triggers_flush_to_kvstore() {
        let pool = Arc::new(
            BrowserPool::new(PoolConfig::default(), Arc::new(NoopLauncher), Arc::new(MemoryProbe::new()))
                .await
                .unwrap(),
        );
        let monitor = Arc::new(Monitor::new(pool, Arc::new(MemoryProbe::new())));
        let kvstore: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::default());
        let worker = PersistenceWorker::new(monitor.clone(), kvstore.clone()).await;
        tokio::spawn(worker.run());

        monitor
            .track_start("r1".to_string(), "/crawl".to_string(), "https://x".to_string(), 1.0)
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(kvstore.get(ENDPOINT_STATS_KEY).await.is_some());
    }
}
