//! Process-wide request/event monitor (§4.7).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crawlctl_pool::{BrowserPool, MemoryProbe};
use crawlctl_types::{
    EndpointAggregate, ErrorEvent, JanitorEvent, RequestRecord, TierHit, TimelineMetric, TimelineSample,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::ring::push_bounded;

const RING_CAPACITY: usize = 100;
const TIMELINE_CAPACITY: usize = 60;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);
const HINT_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorHealth {
    pub memory_percent: f64,
    pub pool_size: usize,
    pub active_requests: usize,
    pub uptime_secs: u64,
}

struct MonitorInner {
    active: HashMap<String, RequestRecord>,
    completed: VecDeque<RequestRecord>,
    janitor_events: VecDeque<JanitorEvent>,
    errors: VecDeque<ErrorEvent>,
    endpoint_aggregates: HashMap<String, EndpointAggregate>,
    memory_timeline: VecDeque<TimelineSample>,
    inflight_timeline: VecDeque<TimelineSample>,
    pool_timeline: VecDeque<TimelineSample>,
}

impl Default for MonitorInner {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            completed: VecDeque::new(),
            janitor_events: VecDeque::new(),
            errors: VecDeque::new(),
            endpoint_aggregates: HashMap::new(),
            memory_timeline: VecDeque::new(),
            inflight_timeline: VecDeque::new(),
            pool_timeline: VecDeque::new(),
        }
    }
}

/// Serializes every mutating operation behind one lock; readers receive
/// cloned, internally-consistent snapshots.
pub struct Monitor {
    inner: Mutex<MonitorInner>,
    pool: Arc<BrowserPool>,
    memory_probe: Arc<MemoryProbe>,
    started_at: Instant,
    max_age: Duration,
    hint_tx: mpsc::Sender<()>,
    hint_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Monitor {
    pub fn new(pool: Arc<BrowserPool>, memory_probe: Arc<MemoryProbe>) -> Self {
        let (hint_tx, hint_rx) = mpsc::channel(HINT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(MonitorInner::default()),
            pool,
            memory_probe,
            started_at: Instant::now(),
            max_age: DEFAULT_MAX_AGE,
            hint_tx,
            hint_rx: Mutex::new(Some(hint_rx)),
        }
    }

    /// Takes the hint receiver so a `PersistenceWorker` can consume it. Can
    /// only be called once.
    pub async fn take_hint_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.hint_rx.lock().await.take()
    }

    pub async fn track_start(&self, request_id: String, endpoint: String, url: String, mem_now: f64) {
        let record = RequestRecord {
            id: request_id.clone(),
            endpoint: endpoint.clone(),
            url,
            started_at: Utc::now(),
            finished_at: None,
            success: None,
            error: None,
            mem_start_mib: mem_now,
            mem_end_mib: None,
            tier_hit: None,
            fingerprint: None,
        };
        let mut inner = self.inner.lock().await;
        inner.active.insert(request_id, record);
        inner.endpoint_aggregates.entry(endpoint).or_default().count += 1;
        drop(inner);
        self.send_hint();
    }

    pub async fn track_end(
        &self,
        request_id: &str,
        success: bool,
        error: Option<String>,
        mem_now: f64,
        tier_hit: Option<TierHit>,
        fingerprint: Option<String>,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(mut record) = inner.active.remove(request_id) else {
            tracing::warn!(request_id, "trackEnd for unknown/already-finished request");
            return;
        };
        record.finished_at = Some(Utc::now());
        record.success = Some(success);
        record.error = error;
        record.mem_end_mib = Some(mem_now);
        record.tier_hit = tier_hit;
        record.fingerprint = fingerprint;

        let elapsed_ms = record
            .finished_at
            .unwrap()
            .signed_duration_since(record.started_at)
            .num_milliseconds()
            .max(0) as u64;

        let aggregate = inner.endpoint_aggregates.entry(record.endpoint.clone()).or_default();
        aggregate.total_elapsed_ms += elapsed_ms;
        if success {
            aggregate.successes += 1;
        } else {
            aggregate.errors += 1;
        }
        if matches!(record.tier_hit, Some(TierHit::Hot) | Some(TierHit::Cold) | Some(TierHit::ColdPromoted)) {
            aggregate.pool_hits += 1;
        }

        push_bounded(&mut inner.completed, record, RING_CAPACITY);
        drop(inner);
        self.send_hint();
    }

    pub async fn track_janitor(&self, event: JanitorEvent) {
        let mut inner = self.inner.lock().await;
        push_bounded(&mut inner.janitor_events, event, RING_CAPACITY);
    }

    pub async fn track_error(&self, event: ErrorEvent) {
        let mut inner = self.inner.lock().await;
        push_bounded(&mut inner.errors, event, RING_CAPACITY);
    }

    /// Invoked every 5 s by a background ticker: reads memory + inflight +
    /// pool size and pushes one sample per timeline, all sharing a
    /// timestamp.
    pub async fn sample_timelines(&self) {
        let mem = self.memory_probe.usage_percent();
        let pool_snapshot = self.pool.snapshot().await;
        let timestamp = Utc::now();

        let mut inner = self.inner.lock().await;
        let inflight = inner.active.len() as f64;
        push_bounded(
            &mut inner.memory_timeline,
            TimelineSample {
                timestamp,
                metric: TimelineMetric::MemoryPercent,
                value: mem,
            },
            TIMELINE_CAPACITY,
        );
        push_bounded(
            &mut inner.inflight_timeline,
            TimelineSample {
                timestamp,
                metric: TimelineMetric::InflightRequests,
                value: inflight,
            },
            TIMELINE_CAPACITY,
        );
        push_bounded(
            &mut inner.pool_timeline,
            TimelineSample {
                timestamp,
                metric: TimelineMetric::ActiveBrowserCount,
                value: pool_snapshot.entries.len() as f64,
            },
            TIMELINE_CAPACITY,
        );
    }

    /// Invoked every 5 s: drops ring entries older than `max_age`,
    /// independent of (and possibly tighter than) the capacity bound.
    pub async fn sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.max_age).unwrap_or_default();
        let mut inner = self.inner.lock().await;
        inner
            .completed
            .retain(|r| r.finished_at.map(|t| t >= cutoff).unwrap_or(true));
        inner.janitor_events.retain(|e| e.timestamp >= cutoff);
        inner.errors.retain(|e| e.timestamp >= cutoff);
    }

    pub async fn get_health(&self) -> MonitorHealth {
        let inner = self.inner.lock().await;
        MonitorHealth {
            memory_percent: self.memory_probe.usage_percent(),
            pool_size: self.pool.snapshot().await.entries.len(),
            active_requests: inner.active.len(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub async fn get_active(&self) -> Vec<RequestRecord> {
        self.inner.lock().await.active.values().cloned().collect()
    }

    pub async fn get_completed(&self, limit: usize) -> Vec<RequestRecord> {
        let inner = self.inner.lock().await;
        inner.completed.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_browser_list(&self) -> crawlctl_types::PoolSnapshot {
        self.pool.snapshot().await
    }

    pub async fn get_timeline(&self, metric: TimelineMetric, window: Option<Duration>) -> Vec<TimelineSample> {
        let inner = self.inner.lock().await;
        let series = match metric {
            TimelineMetric::MemoryPercent => &inner.memory_timeline,
            TimelineMetric::InflightRequests => &inner.inflight_timeline,
            TimelineMetric::ActiveBrowserCount => &inner.pool_timeline,
        };
        match window {
            None => series.iter().cloned().collect(),
            Some(window) => {
                let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
                series.iter().filter(|s| s.timestamp >= cutoff).cloned().collect()
            }
        }
    }

    pub async fn get_janitor_log(&self, limit: usize) -> Vec<JanitorEvent> {
        let inner = self.inner.lock().await;
        inner.janitor_events.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_error_log(&self, limit: usize) -> Vec<ErrorEvent> {
        let inner = self.inner.lock().await;
        inner.errors.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_endpoint_aggregates(&self) -> HashMap<String, EndpointAggregate> {
        self.inner.lock().await.endpoint_aggregates.clone()
    }

    fn send_hint(&self) {
        if self.hint_tx.try_send(()).is_err() {
            tracing::debug!("persistence hint channel full, dropping hint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlctl_pool::{EngineHandle, EngineLauncher, PoolConfig};
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

    async fn test_monitor() -> Monitor {
        let pool = Arc::new(
            BrowserPool::new(PoolConfig::default(), Arc::new(NoopLauncher), Arc::new(MemoryProbe::new()))
                .await
                .unwrap(),
        );
        Monitor::new(pool, Arc::new(MemoryProbe::new()))
    }

    #[tokio::test]
    async fn start_then_end_moves_active_to_completed() {
        let monitor = test_monitor().await;
        monitor
            .track_start("r1".to_string(), "/crawl".to_string(), "https://x".to_string(), 10.0)
            .await;
        assert_eq!(monitor.get_active().await.len(), 1);

        monitor
            .track_end("r1", true, None, 12.0, Some(TierHit::New), Some("fp".to_string()))
            .await;
        assert_eq!(monitor.get_active().await.len(), 0);
        assert_eq!(monitor.get_completed(10).await.len(), 1);

        let aggregates = monitor.get_endpoint_aggregates().await;
        let agg = aggregates.get("/crawl").unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.successes, 1);
    }

    #[tokio::test]
    async fn completed_ring_is_capacity_bounded() {
        let monitor = test_monitor().await;
        for i in 0..150 {
            let id = format!("r{i}");
            monitor
                .track_start(id.clone(), "/crawl".to_string(), "https://x".to_string(), 1.0)
                .await;
            monitor.track_end(&id, true, None, 1.0, None, None).await;
        }
        assert_eq!(monitor.get_completed(1000).await.len(), RING_CAPACITY);
    }

    #[tokio::test]
    async fn double_end_on_unknown_request_is_a_warned_no_op() {
        let monitor = test_monitor().await;
        monitor.track_end("missing", true, None, 1.0, None, None).await;
        assert_eq!(monitor.get_completed(10).await.len(), 0);
    }
}
