//! Aggregate runtime configuration, environment-overridable (§4.5, §4.6).

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub strategy: DispatcherStrategy,
    /// FixedConcurrency semaphore capacity.
    pub fixed_capacity: usize,
    pub soft_threshold: f64,
    pub critical_threshold: f64,
    pub recovery_threshold: f64,
    pub max_inflight: usize,
    pub fairness_timeout: Duration,
    pub hard_wait_timeout: Duration,
    pub scheduling_tick: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStrategy {
    FixedConcurrency,
    MemoryAdaptive,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: DispatcherStrategy::MemoryAdaptive,
            fixed_capacity: 16,
            soft_threshold: 70.0,
            critical_threshold: 85.0,
            recovery_threshold: 65.0,
            max_inflight: 20,
            fairness_timeout: Duration::from_secs(600),
            hard_wait_timeout: Duration::from_secs(600),
            scheduling_tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub base_delay_lo: Duration,
    pub base_delay_hi: Duration,
    pub rate_limit_codes: Vec<u16>,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay_lo: Duration::from_millis(200),
            base_delay_hi: Duration::from_millis(1000),
            rate_limit_codes: vec![429, 503],
            max_delay: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub redis_url: String,
    pub redis_pool_size: usize,
    pub dispatcher: DispatcherConfig,
    pub rate_limiter: RateLimiterConfig,
    pub shutdown_drain_timeout: Duration,
    pub sync_crawl_timeout: Duration,
    pub stream_init_timeout: Duration,
    pub job_stale_deadline: Duration,
    pub job_sweep_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind addr"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_pool_size: 4,
            dispatcher: DispatcherConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            shutdown_drain_timeout: Duration::from_secs(30),
            sync_crawl_timeout: Duration::from_secs(300),
            stream_init_timeout: Duration::from_secs(30),
            job_stale_deadline: Duration::from_secs(60 * 60),
            job_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ApiConfig {
    /// Overlays environment variables on top of the defaults. Unset or
    /// unparsable variables silently keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CRAWLCTL_BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }
        if let Ok(url) = std::env::var("CRAWLCTL_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(size) = std::env::var("CRAWLCTL_REDIS_POOL_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.redis_pool_size = parsed;
            }
        }
        if let Ok(strategy) = std::env::var("CRAWLCTL_DISPATCHER_STRATEGY") {
            config.dispatcher.strategy = match strategy.to_lowercase().as_str() {
                "fixed" | "fixed_concurrency" => DispatcherStrategy::FixedConcurrency,
                _ => DispatcherStrategy::MemoryAdaptive,
            };
        }
        if let Ok(capacity) = std::env::var("CRAWLCTL_DISPATCHER_FIXED_CAPACITY") {
            if let Ok(parsed) = capacity.parse() {
                config.dispatcher.fixed_capacity = parsed;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.dispatcher.recovery_threshold >= self.dispatcher.soft_threshold
            || self.dispatcher.soft_threshold >= self.dispatcher.critical_threshold
        {
            return Err("dispatcher thresholds must satisfy recovery < soft < critical".to_string());
        }
        if self.rate_limiter.base_delay_lo > self.rate_limiter.base_delay_hi {
            return Err("rate limiter base_delay_lo must be <= base_delay_hi".to_string());
        }
        if self.dispatcher.max_inflight == 0 {
            return Err("dispatcher max_inflight must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ApiConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = ApiConfig::default();
        config.dispatcher.soft_threshold = 90.0;
        assert!(config.validate().is_err());
    }
}
