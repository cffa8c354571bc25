//! Shared application state: the process-wide singletons plus the wiring
//! between them (§5 shared-resource policy).

use std::sync::Arc;

use crawlctl_monitoring::{Monitor, PushBroker};
use crawlctl_persistence::KVStore;
use crawlctl_pool::{BrowserPool, Janitor, MemoryProbe};
use crawlctl_workers::{JobRegistry, WebhookDispatcher};

use crate::config::ApiConfig;
use crate::dispatcher::Dispatcher;
use crate::engine::CrawlerEngine;
use crate::gateway::RequestGateway;
use crate::rate_limiter::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub pool: Arc<BrowserPool>,
    pub monitor: Arc<Monitor>,
    pub memory_probe: Arc<MemoryProbe>,
    pub kvstore: Arc<dyn KVStore>,
    pub job_registry: Arc<JobRegistry>,
    pub webhook_dispatcher: Arc<WebhookDispatcher>,
    pub push_broker: Arc<PushBroker>,
    pub dispatcher: Arc<Dispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub gateway: Arc<RequestGateway>,
    pub health: Arc<crate::health::HealthService>,
}

impl AppState {
    pub async fn new(
        config: ApiConfig,
        pool: Arc<BrowserPool>,
        memory_probe: Arc<MemoryProbe>,
        kvstore: Arc<dyn KVStore>,
        engine: Arc<dyn CrawlerEngine>,
    ) -> Self {
        let monitor = Arc::new(Monitor::new(pool.clone(), memory_probe.clone()));
        let job_registry = Arc::new(JobRegistry::with_stale_deadline(kvstore.clone(), config.job_stale_deadline));
        let webhook_dispatcher = Arc::new(WebhookDispatcher::new(Default::default()));
        let push_broker = PushBroker::new(monitor.clone());
        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone(), memory_probe.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone()));
        let gateway = Arc::new(RequestGateway::new(
            pool.clone(),
            monitor.clone(),
            memory_probe.clone(),
            dispatcher.clone(),
            rate_limiter.clone(),
            engine,
        ));
        let health = Arc::new(crate::health::HealthService::new(memory_probe.clone()));

        Self {
            config: Arc::new(config),
            pool,
            monitor,
            memory_probe,
            kvstore,
            job_registry,
            webhook_dispatcher,
            push_broker,
            dispatcher,
            rate_limiter,
            gateway,
            health,
        }
    }

    /// Spawns the process-wide background loops: janitor, timeline
    /// sampler, monitor sweeper, persistence worker, push broker, dispatcher
    /// scheduler, job sweeper. Returns a shutdown sender that stops the
    /// watch-based loops.
    pub async fn spawn_background_tasks(&self, shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let janitor = Janitor::new(self.pool.clone(), self.memory_probe.clone(), Default::default());
        let janitor_cancel = janitor.cancel_handle();
        tokio::spawn(janitor.run());
        {
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let _ = rx.changed().await;
                janitor_cancel.notify_one();
            });
        }

        self.dispatcher.spawn_scheduler(shutdown_rx.clone());

        {
            let monitor = self.monitor.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            monitor.sample_timelines().await;
                            monitor.sweep().await;
                        }
                        _ = rx.changed() => break,
                    }
                }
            });
        }

        {
            let worker = crawlctl_monitoring::PersistenceWorker::new(self.monitor.clone(), self.kvstore.clone()).await;
            tokio::spawn(worker.run());
        }

        {
            let broker = self.push_broker.clone();
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let cancelled = async {
                    let _ = rx.changed().await;
                    broker.cancel();
                };
                tokio::join!(broker.run(), cancelled);
            });
        }

        {
            let registry = self.job_registry.clone();
            let interval = self.config.job_sweep_interval;
            tokio::spawn(registry.run_sweeper(interval, shutdown_rx.clone()));
        }
    }
}
