//! Per-domain pacing and throttle backoff (§4.6).
//!
//! Two independent concerns share one per-domain clock: a constant "don't
//! hammer the same host" pace applied to every request, and an exponential
//! backoff applied only after the host itself signals a rate limit (429,
//! 503 by default). A 2xx/3xx/4xx-non-rate-limit response leaves the
//! backoff magnitude untouched — it neither grows nor resets.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;

use crate::config::RateLimiterConfig;

struct DomainState {
    next_allowed_at: Instant,
    backoff_delay: Duration,
}

impl DomainState {
    fn fresh() -> Self {
        Self {
            next_allowed_at: Instant::now(),
            backoff_delay: Duration::ZERO,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    domains: DashMap<String, DomainState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            domains: DashMap::new(),
        }
    }

    pub fn domain_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }

    /// Blocks until this domain's earliest-next-attempt has passed, then
    /// schedules the next slot at `now + uniform(lo, hi)`.
    pub async fn acquire(&self, domain: &str) {
        let wait = {
            let entry = self.domains.entry(domain.to_string()).or_insert_with(DomainState::fresh);
            entry.next_allowed_at.saturating_duration_since(Instant::now())
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        let pacing = self.uniform_base_delay();
        self.domains.entry(domain.to_string()).and_modify(|s| {
            s.next_allowed_at = Instant::now() + pacing;
        });
    }

    /// Call after a response. Returns `Some(delay)` already applied as the
    /// domain's next-allowed-at when a retry is warranted; `None` when the
    /// status isn't a rate-limit code or retries are exhausted.
    pub fn on_response(&self, domain: &str, status: u16, attempt: u32) -> Option<Duration> {
        if !self.config.rate_limit_codes.contains(&status) {
            return None;
        }
        if attempt >= self.config.max_retries {
            return None;
        }
        let mut entry = self.domains.entry(domain.to_string()).or_insert_with(DomainState::fresh);
        let doubled = if entry.backoff_delay.is_zero() {
            self.config.base_delay_hi
        } else {
            entry.backoff_delay * 2
        };
        let capped = doubled.min(self.config.max_delay);
        entry.backoff_delay = capped;
        let jittered = jitter(capped);
        entry.next_allowed_at = Instant::now() + jittered;
        Some(jittered)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn uniform_base_delay(&self) -> Duration {
        let lo = self.config.base_delay_lo.as_secs_f64();
        let hi = self.config.base_delay_hi.as_secs_f64();
        if hi <= lo {
            return self.config.base_delay_lo;
        }
        let secs = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_secs_f64(secs)
    }
}

fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_of_extracts_host() {
        assert_eq!(RateLimiter::domain_of("https://example.com/a/b"), "example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn non_throttle_status_does_not_change_backoff() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        assert!(limiter.on_response("x.test", 200, 0).is_none());
        assert!(limiter.on_response("x.test", 404, 0).is_none());
    }

    #[test]
    fn throttle_status_doubles_until_capped() {
        let mut config = RateLimiterConfig::default();
        config.base_delay_hi = Duration::from_millis(100);
        config.max_delay = Duration::from_secs(1);
        let limiter = RateLimiter::new(config);

        let first = limiter.on_response("x.test", 429, 0).unwrap();
        assert!(first <= Duration::from_millis(120));
        let second = limiter.on_response("x.test", 429, 1).unwrap();
        assert!(second > first / 2);
    }

    #[test]
    fn retries_exhausted_returns_none() {
        let mut config = RateLimiterConfig::default();
        config.max_retries = 1;
        let limiter = RateLimiter::new(config);
        assert!(limiter.on_response("x.test", 429, 1).is_none());
    }
}
