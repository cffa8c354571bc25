//! Engine abstraction and the pool's internal instance record.
//!
//! The actual crawling engine (the thing that drives a headless browser) is
//! an external collaborator the pool only needs two things from: the
//! ability to launch a handle for a given spec, and to close one down.
//! Everything else (navigation, extraction) is the gateway's concern, not
//! the pool's.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawlctl_types::{BrowserSpec, CoreResult, PoolEntry, Tier};

/// A live handle to a launched browser, opaque to the pool beyond `close`.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    async fn close(&self);
}

/// Launches new engine handles for a given spec.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, spec: &BrowserSpec) -> CoreResult<Box<dyn EngineHandle>>;
}

/// A pool-managed browser instance: engine handle plus the metadata the
/// pool and monitor need (use count, last-used time, in-flight count).
pub struct BrowserInstance {
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    last_used_at_millis: AtomicU64,
    use_count: AtomicU64,
    active_requests: AtomicU32,
    handle: Box<dyn EngineHandle>,
}

impl BrowserInstance {
    pub fn new(fingerprint: String, handle: Box<dyn EngineHandle>) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            created_at: now,
            last_used_at_millis: AtomicU64::new(now.timestamp_millis() as u64),
            use_count: AtomicU64::new(0),
            active_requests: AtomicU32::new(0),
            handle,
        }
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        let millis = self.last_used_at_millis.load(Ordering::Relaxed) as i64;
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    pub fn touch(&self) {
        self.last_used_at_millis
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }

    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    pub fn bump_use_count(&self) -> u64 {
        self.use_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn active_requests(&self) -> u32 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn mark_acquired(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        self.bump_use_count();
        self.touch();
    }

    pub fn mark_released(&self) {
        self.active_requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .ok();
        self.touch();
    }

    pub async fn close(&self) {
        self.handle.close().await;
    }

    pub fn entry(&self, tier: Tier) -> PoolEntry {
        PoolEntry {
            fingerprint: self.fingerprint.clone(),
            tier,
            last_used_at: self.last_used_at(),
            use_count: self.use_count(),
            active_requests: self.active_requests(),
        }
    }
}
