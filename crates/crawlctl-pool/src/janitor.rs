//! Background sweep loop (§4.4).

use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::JanitorConfig;
use crate::memory::MemoryProbe;
use crate::pool::BrowserPool;

/// Drives `BrowserPool::sweep` on a memory-band-selected cadence until
/// cancelled.
pub struct Janitor {
    pool: Arc<BrowserPool>,
    memory_probe: Arc<MemoryProbe>,
    config: JanitorConfig,
    cancel: Arc<Notify>,
}

impl Janitor {
    pub fn new(pool: Arc<BrowserPool>, memory_probe: Arc<MemoryProbe>, config: JanitorConfig) -> Self {
        Self {
            pool,
            memory_probe,
            config,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// A handle whose `notify_one` aborts the current sleep and ends the
    /// loop without running the interrupted tick's sweep.
    pub fn cancel_handle(&self) -> Arc<Notify> {
        self.cancel.clone()
    }

    pub async fn run(self) {
        loop {
            let mem = self.memory_probe.usage_percent();
            let band = self.config.band_for(mem);

            tokio::select! {
                _ = tokio::time::sleep(band.interval) => {}
                _ = self.cancel.notified() => {
                    tracing::info!("janitor cancelled, exiting");
                    break;
                }
            }

            self.pool.sweep(band).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::models::EngineHandle;
    use crate::models::EngineLauncher;
    use async_trait::async_trait;
    use crawlctl_types::{BrowserSpec, CoreResult};

    struct NoopHandle;

    #[async_trait]
    impl EngineHandle for NoopHandle {
        async fn close(&self) {}
    }

    struct NoopLauncher;

    #[async_trait]
    impl EngineLauncher for NoopLauncher {
        async fn launch(&self, _spec: &BrowserSpec) -> CoreResult<Box<dyn EngineHandle>> {
            Ok(Box::new(NoopHandle))
        }
    }

    #[tokio::test]
    async fn cancel_before_first_tick_stops_promptly() {
        let pool = Arc::new(
            BrowserPool::new(PoolConfig::default(), Arc::new(NoopLauncher), Arc::new(MemoryProbe::new()))
                .await
                .unwrap(),
        );
        let mut config = JanitorConfig::default();
        config.low_band.interval = std::time::Duration::from_secs(60);
        let janitor = Janitor::new(pool, Arc::new(MemoryProbe::new()), config);
        let cancel = janitor.cancel_handle();
        let handle = tokio::spawn(janitor.run());
        cancel.notify_one();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("janitor should exit promptly after cancellation")
            .unwrap();
    }
}
