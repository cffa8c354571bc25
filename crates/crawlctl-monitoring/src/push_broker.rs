//! Fans out periodic monitor snapshots to subscribed observers (§4.9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::monitor::Monitor;

const TICK_INTERVAL: Duration = Duration::from_secs(2);
const SEND_DEADLINE: Duration = Duration::from_secs(1);
const DEFAULT_UNHEALTHY_AFTER: u32 = 3;
const RECENT_LIMIT: usize = 10;
const TIMELINE_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub timestamp: chrono::DateTime<Utc>,
    pub health: crate::monitor::MonitorHealth,
    pub active: Vec<crawlctl_types::RequestRecord>,
    pub completed: Vec<crawlctl_types::RequestRecord>,
    pub pool: crawlctl_types::PoolSnapshot,
    pub memory_timeline: Vec<crawlctl_types::TimelineSample>,
    pub inflight_timeline: Vec<crawlctl_types::TimelineSample>,
    pub pool_timeline: Vec<crawlctl_types::TimelineSample>,
    pub janitor_events: Vec<crawlctl_types::JanitorEvent>,
    pub errors: Vec<crawlctl_types::ErrorEvent>,
}

struct Observer {
    tx: mpsc::Sender<Arc<MonitorSnapshot>>,
    misses: u32,
}

pub struct PushBroker {
    monitor: Arc<Monitor>,
    observers: Mutex<HashMap<u64, Observer>>,
    next_id: AtomicU64,
    cancel: Notify,
    unhealthy_after: u32,
}

impl PushBroker {
    pub fn new(monitor: Arc<Monitor>) -> Arc<Self> {
        Arc::new(Self {
            monitor,
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            cancel: Notify::new(),
            unhealthy_after: DEFAULT_UNHEALTHY_AFTER,
        })
    }

    pub async fn subscribe(&self, channel_capacity: usize) -> (u64, mpsc::Receiver<Arc<MonitorSnapshot>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        self.observers.lock().await.insert(id, Observer { tx, misses: 0 });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.observers.lock().await.remove(&id);
    }

    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                _ = self.cancel.notified() => {
                    tracing::info!("push broker cancelled, exiting");
                    break;
                }
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let snapshot = Arc::new(self.build_snapshot().await);
        let mut observers = self.observers.lock().await;
        let mut dead = Vec::new();
        for (id, observer) in observers.iter_mut() {
            let sent = tokio::time::timeout(SEND_DEADLINE, observer.tx.send(snapshot.clone())).await;
            match sent {
                Ok(Ok(())) => observer.misses = 0,
                _ => {
                    observer.misses += 1;
                    if observer.misses >= self.unhealthy_after {
                        dead.push(*id);
                    }
                }
            }
        }
        for id in dead {
            observers.remove(&id);
            tracing::info!(observer_id = id, "removed unhealthy push observer");
        }
    }

    async fn build_snapshot(&self) -> MonitorSnapshot {
        use crawlctl_types::TimelineMetric;
        MonitorSnapshot {
            timestamp: Utc::now(),
            health: self.monitor.get_health().await,
            active: self.monitor.get_active().await.into_iter().take(RECENT_LIMIT).collect(),
            completed: self.monitor.get_completed(RECENT_LIMIT).await,
            pool: self.monitor.get_browser_list().await,
            memory_timeline: self
                .monitor
                .get_timeline(TimelineMetric::MemoryPercent, Some(TIMELINE_WINDOW))
                .await,
            inflight_timeline: self
                .monitor
                .get_timeline(TimelineMetric::InflightRequests, Some(TIMELINE_WINDOW))
                .await,
            pool_timeline: self
                .monitor
                .get_timeline(TimelineMetric::ActiveBrowserCount, Some(TIMELINE_WINDOW))
                .await,
            janitor_events: self.monitor.get_janitor_log(RECENT_LIMIT).await,
            errors: self.monitor.get_error_log(RECENT_LIMIT).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    async fn test_broker() -> Arc<PushBroker> {
        let pool = Arc::new(
            BrowserPool::new(PoolConfig::default(), Arc::new(NoopLauncher), Arc::new(MemoryProbe::new()))
                .await
                .unwrap(),
        );
        let monitor = Arc::new(Monitor::new(pool, Arc::new(MemoryProbe::new())));
        PushBroker::new(monitor)
    }

    #[tokio::test]
    async fn single_tick_reaches_subscriber() {
        let broker = test_broker().await;
        let (_id, mut rx) = broker.subscribe(4).await;
        broker.tick().await;
        let snapshot = rx.try_recv().expect("snapshot should have been sent");
        assert_eq!(snapshot.active.len(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_sends() {
        let broker = test_broker().await;
        let (id, mut rx) = broker.subscribe(4).await;
        broker.unsubscribe(id).await;
        broker.tick().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_misses_evict_observer() {
        let broker = test_broker().await;
        let (_id, rx) = broker.subscribe(1).await;
        // Never drain `rx`; the channel fills and every send after the
        // first should register as a miss.
        for _ in 0..(DEFAULT_UNHEALTHY_AFTER + 2) {
            broker.tick().await;
        }
        assert_eq!(broker.observers.lock().await.len(), 0);
        drop(rx);
    }
}
