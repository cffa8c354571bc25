//! The browser pool (§4.3): three tiers, one writer lock, fingerprint keyed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crawlctl_types::{BrowserSpec, CoreError, CoreResult, JanitorEvent, PoolSnapshot, Tier, TierHit};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::{JanitorBand, PoolConfig};
use crate::memory::MemoryProbe;
use crate::models::{BrowserInstance, EngineLauncher};

/// Fired for every notable pool lifecycle event (promotion, eviction, skip).
pub type PoolEventSink = Arc<dyn Fn(JanitorEvent) + Send + Sync>;

fn no_op_sink() -> PoolEventSink {
    Arc::new(|_event| {})
}

#[derive(Default)]
struct PoolInner {
    hot: HashMap<String, Arc<BrowserInstance>>,
    cold: HashMap<String, Arc<BrowserInstance>>,
}

pub struct BrowserPool {
    launcher: Arc<dyn EngineLauncher>,
    memory_probe: Arc<MemoryProbe>,
    config: PoolConfig,
    permanent: Arc<BrowserInstance>,
    permanent_fingerprint: String,
    inner: Mutex<PoolInner>,
    on_event: PoolEventSink,
}

impl BrowserPool {
    /// Launches the PERMANENT instance and returns the ready pool.
    pub async fn new(
        config: PoolConfig,
        launcher: Arc<dyn EngineLauncher>,
        memory_probe: Arc<MemoryProbe>,
    ) -> CoreResult<Self> {
        Self::with_event_sink(config, launcher, memory_probe, no_op_sink()).await
    }

    pub async fn with_event_sink(
        config: PoolConfig,
        launcher: Arc<dyn EngineLauncher>,
        memory_probe: Arc<MemoryProbe>,
        on_event: PoolEventSink,
    ) -> CoreResult<Self> {
        let default_spec = BrowserSpec::default();
        let fingerprint = default_spec.fingerprint();
        let handle = launcher.launch(&default_spec).await?;
        let permanent = Arc::new(BrowserInstance::new(fingerprint.clone(), handle));
        Ok(Self {
            launcher,
            memory_probe,
            config,
            permanent,
            permanent_fingerprint: fingerprint,
            inner: Mutex::new(PoolInner::default()),
            on_event,
        })
    }

    pub async fn acquire(&self, spec: &BrowserSpec) -> CoreResult<(Arc<BrowserInstance>, TierHit)> {
        let fp = spec.fingerprint();
        if fp == self.permanent_fingerprint {
            self.permanent.mark_acquired();
            return Ok((self.permanent.clone(), TierHit::Permanent));
        }

        let mut inner = self.inner.lock().await;

        if let Some(instance) = inner.hot.get(&fp) {
            instance.mark_acquired();
            return Ok((instance.clone(), TierHit::Hot));
        }

        if let Some(instance) = inner.cold.get(&fp).cloned() {
            instance.mark_acquired();
            if instance.use_count() >= self.config.promotion_threshold {
                inner.cold.remove(&fp);
                inner.hot.insert(fp.clone(), instance.clone());
                (self.on_event)(JanitorEvent {
                    kind: "promote".to_string(),
                    timestamp: Utc::now(),
                    details: format!("fingerprint={fp} useCount={}", instance.use_count()),
                });
                return Ok((instance, TierHit::ColdPromoted));
            }
            return Ok((instance, TierHit::Cold));
        }

        let mem = self.memory_probe.usage_percent();
        if mem >= self.config.memory_hard_limit {
            return Err(CoreError::MemoryPressure);
        }

        let handle = self
            .launcher
            .launch(spec)
            .await
            .map_err(|e| CoreError::EngineLaunchError(e.to_string()))?;
        let instance = Arc::new(BrowserInstance::new(fp.clone(), handle));
        instance.mark_acquired();
        inner.cold.insert(fp, instance.clone());
        Ok((instance, TierHit::New))
    }

    pub fn release(&self, instance: &Arc<BrowserInstance>) {
        instance.mark_released();
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().await;
        let mut entries = vec![self.permanent.entry(Tier::Permanent)];
        entries.extend(inner.hot.values().map(|i| i.entry(Tier::Hot)));
        entries.extend(inner.cold.values().map(|i| i.entry(Tier::Cold)));
        PoolSnapshot { entries }
    }

    /// One janitor tick: close idle COLD then HOT instances under `band`.
    /// PERMANENT is never considered.
    pub async fn sweep(&self, band: JanitorBand) {
        let mut inner = self.inner.lock().await;
        Self::sweep_tier(&mut inner.cold, band.cold_ttl, "close_cold", &self.on_event).await;
        Self::sweep_tier(&mut inner.hot, band.hot_ttl, "close_hot", &self.on_event).await;
    }

    async fn sweep_tier(
        tier: &mut HashMap<String, Arc<BrowserInstance>>,
        ttl: Duration,
        close_event_kind: &str,
        on_event: &PoolEventSink,
    ) {
        let now = Utc::now();
        let mut to_close = Vec::new();
        tier.retain(|fp, instance| {
            let idle = now.signed_duration_since(instance.last_used_at());
            let idle = idle.to_std().unwrap_or(Duration::ZERO);
            if idle <= ttl {
                return true;
            }
            if instance.active_requests() > 0 {
                on_event(JanitorEvent {
                    kind: "skip_active".to_string(),
                    timestamp: now,
                    details: format!("fingerprint={fp} activeRequests={}", instance.active_requests()),
                });
                return true;
            }
            to_close.push((fp.clone(), instance.clone(), idle));
            false
        });
        for (fp, instance, idle) in to_close {
            instance.close().await;
            on_event(JanitorEvent {
                kind: close_event_kind.to_string(),
                timestamp: now,
                details: format!("fingerprint={fp} idleSecs={}", idle.as_secs()),
            });
        }
    }

    /// Closes every instance, waiting up to `drain_timeout` for in-flight
    /// requests to finish before force-closing the rest.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let mut inner = self.inner.lock().await;
        let mut all: Vec<Arc<BrowserInstance>> = vec![self.permanent.clone()];
        all.extend(inner.hot.drain().map(|(_, v)| v));
        all.extend(inner.cold.drain().map(|(_, v)| v));
        drop(inner);

        let deadline = tokio::time::Instant::now() + drain_timeout;
        for instance in &all {
            while instance.active_requests() > 0 && tokio::time::Instant::now() < deadline {
                sleep(Duration::from_millis(50)).await;
            }
            if instance.active_requests() > 0 {
                tracing::warn!(
                    fingerprint = %instance.fingerprint,
                    active_requests = instance.active_requests(),
                    "forcing close of browser instance past drain deadline"
                );
            }
            instance.close().await;
        }
    }

    pub fn memory_probe(&self) -> &Arc<MemoryProbe> {
        &self.memory_probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingHandle;

    #[async_trait]
    impl EngineHandle for CountingHandle {
        async fn close(&self) {}
    }

    struct CountingLauncher {
        launches: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl CountingLauncher {
        fn new() -> Self {
            Self {
                launches: AtomicUsize::new(0),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EngineLauncher for CountingLauncher {
        async fn launch(&self, _spec: &BrowserSpec) -> CoreResult<Box<dyn EngineHandle>> {
            if self.fail_next.swap(false, AtomicOrdering::Relaxed) {
                return Err(CoreError::EngineLaunchError("boom".to_string()));
            }
            self.launches.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(Box::new(CountingHandle))
        }
    }

    fn distinct_spec(tag: &str) -> BrowserSpec {
        let mut spec = BrowserSpec::default();
        spec.user_agent = Some(tag.to_string());
        spec
    }

    #[tokio::test]
    async fn acquire_default_spec_hits_permanent() {
        let pool = BrowserPool::new(
            PoolConfig::default(),
            Arc::new(CountingLauncher::new()),
            Arc::new(MemoryProbe::new()),
        )
        .await
        .unwrap();
        let (_instance, hit) = pool.acquire(&BrowserSpec::default()).await.unwrap();
        assert_eq!(hit, TierHit::Permanent);
    }

    #[tokio::test]
    async fn new_spec_lands_cold_then_promotes_at_threshold() {
        let mut config = PoolConfig::default();
        config.promotion_threshold = 3;
        let pool = BrowserPool::new(config, Arc::new(CountingLauncher::new()), Arc::new(MemoryProbe::new()))
            .await
            .unwrap();
        let spec = distinct_spec("promotion-test");

        let (_, hit) = pool.acquire(&spec).await.unwrap();
        assert_eq!(hit, TierHit::New);
        let (_, hit) = pool.acquire(&spec).await.unwrap();
        assert_eq!(hit, TierHit::Cold);
        let (instance, hit) = pool.acquire(&spec).await.unwrap();
        assert_eq!(hit, TierHit::ColdPromoted);
        assert_eq!(instance.use_count(), 3);

        let (_, hit) = pool.acquire(&spec).await.unwrap();
        assert_eq!(hit, TierHit::Hot);
    }

    #[tokio::test]
    async fn launch_failure_is_not_cached_and_retries_succeed() {
        let launcher = Arc::new(CountingLauncher::new());
        launcher.fail_next.store(true, AtomicOrdering::Relaxed);
        let pool = BrowserPool::new(PoolConfig::default(), launcher, Arc::new(MemoryProbe::new()))
            .await
            .unwrap();
        let spec = distinct_spec("retry-test");

        let err = pool.acquire(&spec).await.unwrap_err();
        assert!(matches!(err, CoreError::EngineLaunchError(_)));

        let (_, hit) = pool.acquire(&spec).await.unwrap();
        assert_eq!(hit, TierHit::New);
    }

    #[tokio::test]
    async fn release_decrements_active_requests() {
        let pool = BrowserPool::new(
            PoolConfig::default(),
            Arc::new(CountingLauncher::new()),
            Arc::new(MemoryProbe::new()),
        )
        .await
        .unwrap();
        let spec = distinct_spec("release-test");
        let (instance, _) = pool.acquire(&spec).await.unwrap();
        assert_eq!(instance.active_requests(), 1);
        pool.release(&instance);
        assert_eq!(instance.active_requests(), 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_all_tiers() {
        let pool = BrowserPool::new(
            PoolConfig::default(),
            Arc::new(CountingLauncher::new()),
            Arc::new(MemoryProbe::new()),
        )
        .await
        .unwrap();
        pool.acquire(&distinct_spec("snap-1")).await.unwrap();
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.entries.len(), 2);
        assert!(snapshot.entries.iter().any(|e| e.tier == Tier::Permanent));
        assert!(snapshot.entries.iter().any(|e| e.tier == Tier::Cold));
    }
}
