//! Admission control in front of a crawl request (§4.5).
//!
//! Both strategies are fronted by the rate limiter: `Dispatcher::admit`
//! paces/backs off on the URL's domain *before* requesting a concurrency
//! permit, so a throttled host can't starve the semaphore/queue for
//! everyone else.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crawlctl_pool::MemoryProbe;
use crawlctl_types::{CoreError, CoreResult};
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex, Semaphore};
use tokio::time::{Duration, Instant};

use crate::config::{DispatcherConfig, DispatcherStrategy};
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub strategy: &'static str,
    pub inflight: usize,
    pub capacity: usize,
    pub queued: usize,
}

pub enum Dispatcher {
    Fixed(FixedConcurrencyDispatcher),
    MemoryAdaptive(Arc<MemoryAdaptiveDispatcher>),
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, memory_probe: Arc<MemoryProbe>) -> Self {
        match config.strategy {
            DispatcherStrategy::FixedConcurrency => Dispatcher::Fixed(FixedConcurrencyDispatcher::new(config.fixed_capacity)),
            DispatcherStrategy::MemoryAdaptive => Dispatcher::MemoryAdaptive(MemoryAdaptiveDispatcher::new(config, memory_probe)),
        }
    }

    /// Paces/backs off on `url`'s domain via `rate_limiter`, then admits
    /// under this dispatcher's strategy. Returns a permit that releases on
    /// drop.
    pub async fn admit(&self, url: &str, rate_limiter: &RateLimiter) -> CoreResult<DispatchPermit> {
        let domain = RateLimiter::domain_of(url);
        rate_limiter.acquire(&domain).await;
        match self {
            Dispatcher::Fixed(d) => Ok(DispatchPermit::Fixed(d.admit().await)),
            Dispatcher::MemoryAdaptive(d) => d.admit().await.map(DispatchPermit::Adaptive),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        match self {
            Dispatcher::Fixed(d) => d.stats(),
            Dispatcher::MemoryAdaptive(d) => d.stats(),
        }
    }

    pub fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) {
        if let Dispatcher::MemoryAdaptive(d) = self {
            let d = d.clone();
            tokio::spawn(d.run_scheduler(shutdown));
        }
    }
}

pub enum DispatchPermit {
    Fixed(tokio::sync::OwnedSemaphorePermit),
    Adaptive(AdaptivePermit),
}

pub struct FixedConcurrencyDispatcher {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl FixedConcurrencyDispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn admit(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("dispatcher semaphore is never closed")
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            strategy: "FIXED_CONCURRENCY",
            inflight: self.capacity - self.semaphore.available_permits(),
            capacity: self.capacity,
            queued: 0,
        }
    }
}

struct Waiter {
    arrived_at: Instant,
    notify: oneshot::Sender<CoreResult<()>>,
}

pub struct MemoryAdaptiveDispatcher {
    config: DispatcherConfig,
    memory_probe: Arc<MemoryProbe>,
    queue: Mutex<VecDeque<Waiter>>,
    inflight: AtomicUsize,
}

impl MemoryAdaptiveDispatcher {
    pub fn new(config: DispatcherConfig, memory_probe: Arc<MemoryProbe>) -> Arc<Self> {
        Arc::new(Self {
            config,
            memory_probe,
            queue: Mutex::new(VecDeque::new()),
            inflight: AtomicUsize::new(0),
        })
    }

    pub async fn admit(self: &Arc<Self>) -> CoreResult<AdaptivePermit> {
        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            queue.push_back(Waiter {
                arrived_at: Instant::now(),
                notify: tx,
            });
        }
        rx.await
            .unwrap_or_else(|_| Err(CoreError::EngineRunError("dispatcher scheduler stopped".to_string())))?;
        self.inflight.fetch_add(1, Ordering::Relaxed);
        Ok(AdaptivePermit { dispatcher: self.clone() })
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            strategy: "MEMORY_ADAPTIVE",
            inflight: self.inflight.load(Ordering::Relaxed),
            capacity: self.config.max_inflight,
            queued: self.queue.try_lock().map(|q| q.len()).unwrap_or(0),
        }
    }

    fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
    }

    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scheduling_tick);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    tracing::info!("dispatcher scheduler shutting down");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        let mem = self.memory_probe.usage_percent();
        let mut queue = self.queue.lock().await;
        let inflight = self.inflight.load(Ordering::Relaxed);

        if mem < self.config.recovery_threshold {
            let available = self.config.max_inflight.saturating_sub(inflight);
            Self::grant(&mut queue, available);
        } else if mem < self.config.soft_threshold {
            let span = (self.config.soft_threshold - self.config.recovery_threshold).max(f64::EPSILON);
            let fraction = 1.0 - (mem - self.config.recovery_threshold) / span;
            let available = self.config.max_inflight.saturating_sub(inflight);
            let grant_n = ((available as f64) * fraction).round().max(0.0) as usize;
            Self::grant(&mut queue, grant_n);
        } else if mem < self.config.critical_threshold {
            let now = Instant::now();
            while let Some(front) = queue.front() {
                if now.duration_since(front.arrived_at) >= self.config.fairness_timeout {
                    let waiter = queue.pop_front().expect("front just checked");
                    let _ = waiter.notify.send(Ok(()));
                } else {
                    break;
                }
            }
        } else {
            let now = Instant::now();
            while let Some(front) = queue.front() {
                if now.duration_since(front.arrived_at) >= self.config.hard_wait_timeout {
                    let waiter = queue.pop_front().expect("front just checked");
                    let _ = waiter.notify.send(Err(CoreError::MemoryExhausted));
                } else {
                    break;
                }
            }
        }
    }

    fn grant(queue: &mut VecDeque<Waiter>, n: usize) {
        for _ in 0..n {
            match queue.pop_front() {
                Some(waiter) => {
                    let _ = waiter.notify.send(Ok(()));
                }
                None => break,
            }
        }
    }
}

pub struct AdaptivePermit {
    dispatcher: Arc<MemoryAdaptiveDispatcher>,
}

impl Drop for AdaptivePermit {
    fn drop(&mut self) {
        self.dispatcher.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;

    fn test_limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            base_delay_lo: Duration::from_millis(0),
            base_delay_hi: Duration::from_millis(0),
            ..RateLimiterConfig::default()
        })
    }

    #[tokio::test]
    async fn fixed_concurrency_admits_up_to_capacity() {
        let dispatcher = Dispatcher::Fixed(FixedConcurrencyDispatcher::new(2));
        let limiter = test_limiter();
        let p1 = dispatcher.admit("https://a.test", &limiter).await.unwrap();
        let _p2 = dispatcher.admit("https://b.test", &limiter).await.unwrap();
        assert_eq!(dispatcher.stats().inflight, 2);
        drop(p1);
        assert_eq!(dispatcher.stats().inflight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn adaptive_grants_full_capacity_when_memory_is_low() {
        let mut config = DispatcherConfig::default();
        config.max_inflight = 2;
        config.scheduling_tick = Duration::from_millis(10);
        let dispatcher = MemoryAdaptiveDispatcher::new(config, Arc::new(MemoryProbe::stub_at(10.0)));
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(dispatcher.clone().run_scheduler(rx));

        let permit = dispatcher.admit().await.unwrap();
        assert_eq!(dispatcher.stats().inflight, 1);
        drop(permit);
    }
}
