//! Orchestrates the synchronous crawl path end to end (§4.12).

use std::sync::Arc;

use crawlctl_monitoring::Monitor;
use crawlctl_pool::{BrowserPool, MemoryProbe};
use crawlctl_types::{BrowserSpec, CoreError};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::engine::{CrawlVariant, CrawlerEngine};
use crate::errors::{ApiError, ApiResult};
use crate::rate_limiter::RateLimiter;

pub struct RequestGateway {
    pool: Arc<BrowserPool>,
    monitor: Arc<Monitor>,
    memory_probe: Arc<MemoryProbe>,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<RateLimiter>,
    engine: Arc<dyn CrawlerEngine>,
}

impl RequestGateway {
    pub fn new(
        pool: Arc<BrowserPool>,
        monitor: Arc<Monitor>,
        memory_probe: Arc<MemoryProbe>,
        dispatcher: Arc<Dispatcher>,
        rate_limiter: Arc<RateLimiter>,
        engine: Arc<dyn CrawlerEngine>,
    ) -> Self {
        Self {
            pool,
            monitor,
            memory_probe,
            dispatcher,
            rate_limiter,
            engine,
        }
    }

    /// Runs one crawl attempt for `url` against `browser_spec`. Covers
    /// steps 1-5: generate a request id, track it, admit under the
    /// dispatcher/rate-limiter, acquire a browser, run the engine, track
    /// completion, release the instance without closing it.
    pub async fn crawl_one(
        &self,
        endpoint: &str,
        url: &str,
        browser_spec: &BrowserSpec,
        variant: CrawlVariant,
    ) -> ApiResult<serde_json::Value> {
        let request_id = Uuid::new_v4().to_string();
        let mem_start = self.memory_probe.usage_percent();
        self.monitor
            .track_start(request_id.clone(), endpoint.to_string(), url.to_string(), mem_start)
            .await;

        let permit = match self.dispatcher.admit(url, &self.rate_limiter).await {
            Ok(permit) => permit,
            Err(err) => {
                self.fail(&request_id, &err, mem_start, None, None).await;
                return Err(err.into());
            }
        };

        let (instance, tier_hit) = match self.pool.acquire(browser_spec).await {
            Ok(acquired) => acquired,
            Err(err) => {
                self.fail(&request_id, &err, mem_start, None, None).await;
                drop(permit);
                return Err(err.into());
            }
        };

        let fingerprint = instance.fingerprint.clone();
        let outcome = self.engine.run(&instance, url, variant).await;
        let mem_end = self.memory_probe.usage_percent();
        drop(permit);

        match outcome {
            Ok(result) => {
                self.monitor
                    .track_end(&request_id, true, None, mem_end, Some(tier_hit), Some(fingerprint))
                    .await;
                self.pool.release(&instance);
                Ok(result)
            }
            Err(err) => {
                self.monitor
                    .track_end(
                        &request_id,
                        false,
                        Some(err.to_string()),
                        mem_end,
                        Some(tier_hit),
                        Some(fingerprint),
                    )
                    .await;
                self.pool.release(&instance);
                Err(err.into())
            }
        }
    }

    async fn fail(
        &self,
        request_id: &str,
        err: &CoreError,
        mem_now: f64,
        tier_hit: Option<crawlctl_types::TierHit>,
        fingerprint: Option<String>,
    ) {
        self.monitor
            .track_end(request_id, false, Some(err.to_string()), mem_now, tier_hit, fingerprint)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatcherConfig, RateLimiterConfig};
    use crawlctl_pool::{EngineHandle, EngineLauncher, PoolConfig};
    use crawlctl_types::CoreResult;

    struct StubHandle;

    #[async_trait::async_trait]
    impl EngineHandle for StubHandle {
        async fn close(&self) {}
    }

    struct StubLauncher;

    #[async_trait::async_trait]
    impl EngineLauncher for StubLauncher {
        async fn launch(&self, _spec: &BrowserSpec) -> CoreResult<Box<dyn EngineHandle>> {
            Ok(Box::new(StubHandle))
        }
    }

    struct UnreachableEngine;

    #[async_trait::async_trait]
    impl CrawlerEngine for UnreachableEngine {
        async fn run(&self, _instance: &crawlctl_pool::BrowserInstance, _url: &str, _variant: CrawlVariant) -> CoreResult<serde_json::Value> {
            panic!("engine must not run when admission is refused for memory pressure");
        }
    }

    fn no_delay_rate_limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            base_delay_lo: std::time::Duration::ZERO,
            base_delay_hi: std::time::Duration::ZERO,
            ..RateLimiterConfig::default()
        })
    }

    /// S3: a memory probe stubbed above the pool's hard limit rejects a
    /// distinct (non-default) fingerprint with `MemoryPressure` and the
    /// engine is never invoked; the pool is left with only its PERMANENT
    /// instance.
    #[tokio::test]
    async fn memory_pressure_refuses_new_instance_and_leaves_pool_unchanged() {
        let memory_probe = Arc::new(MemoryProbe::stub_at(96.0));
        let pool = Arc::new(
            BrowserPool::new(PoolConfig::default(), Arc::new(StubLauncher), memory_probe.clone())
                .await
                .unwrap(),
        );
        let monitor = Arc::new(Monitor::new(pool.clone(), memory_probe.clone()));
        let dispatcher_config = DispatcherConfig {
            strategy: crate::config::DispatcherStrategy::FixedConcurrency,
            ..DispatcherConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(dispatcher_config, memory_probe.clone()));
        let rate_limiter = Arc::new(no_delay_rate_limiter());
        let engine: Arc<dyn CrawlerEngine> = Arc::new(UnreachableEngine);

        let gateway = RequestGateway::new(pool.clone(), monitor, memory_probe, dispatcher, rate_limiter, engine);

        let mut spec = BrowserSpec::default();
        spec.user_agent = Some("s3-distinct".to_string());

        let err = gateway
            .crawl_one("crawl", "https://example.test", &spec, CrawlVariant::Crawl)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MemoryPressure));

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].tier, crawlctl_types::Tier::Permanent);
    }
}
