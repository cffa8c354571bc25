//! Core data model: browser specs/fingerprints, pool read-models, monitor
//! records, and job/webhook shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable description of how a browser instance should be launched.
///
/// `extra` captures fields the caller sent that this version doesn't know
/// about. They round-trip through the API but deliberately do not
/// participate in [`BrowserSpec::canonical`] / [`BrowserSpec::fingerprint`] —
/// two requests that differ only in unrecognized extra fields still hash to
/// the same pool key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserSpec {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_headless() -> bool {
    true
}

impl Default for BrowserSpec {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            proxy: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// A `BrowserSpec` restricted to the fields that define pool identity,
/// serialized with deterministic (alphabetical) key ordering.
#[derive(Serialize)]
struct CanonicalSpec<'a> {
    headless: bool,
    viewport: Viewport,
    user_agent: &'a Option<String>,
    proxy: &'a Option<String>,
}

impl BrowserSpec {
    /// Canonical JSON representation used as fingerprint input. Key order is
    /// fixed by field declaration order in `CanonicalSpec`, and `extra` is
    /// excluded on purpose (see struct docs).
    pub fn canonical(&self) -> String {
        let canon = CanonicalSpec {
            headless: self.headless,
            viewport: self.viewport,
            user_agent: &self.user_agent,
            proxy: &self.proxy,
        };
        serde_json::to_string(&canon).expect("CanonicalSpec is always serializable")
    }

    /// Stable hex digest of [`Self::canonical`], used as the pool key.
    /// Sha-256 produces 64 hex chars, comfortably over the required 40.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Which eviction policy governs a browser instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Permanent,
    Hot,
    Cold,
}

/// How an acquisition was satisfied, reported back to callers/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierHit {
    Permanent,
    Hot,
    Cold,
    ColdPromoted,
    New,
}

/// Read-model of a single pool entry, produced by `BrowserPool::snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub fingerprint: String,
    pub tier: Tier,
    pub last_used_at: DateTime<Utc>,
    pub use_count: u64,
    pub active_requests: u32,
}

/// A consistent read-model of the whole pool at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub entries: Vec<PoolEntry>,
}

/// A single in-flight or completed crawl request, as tracked by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub endpoint: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub mem_start_mib: f64,
    pub mem_end_mib: Option<f64>,
    /// Known only once `BrowserPool::acquire` returns, so absent on the
    /// `trackStart` record and filled in by `trackEnd`.
    pub tier_hit: Option<TierHit>,
    pub fingerprint: Option<String>,
}

/// Rolling per-endpoint counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointAggregate {
    pub count: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_elapsed_ms: u64,
    pub pool_hits: u64,
}

/// A notable pool lifecycle event (eviction, promotion, skipped eviction...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// A request-path or background error worth keeping in the rolling log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// Which scalar metric a `TimelineSample` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimelineMetric {
    MemoryPercent,
    InflightRequests,
    ActiveBrowserCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSample {
    pub timestamp: DateTime<Utc>,
    pub metric: TimelineMetric,
    pub value: f64,
}

/// Kind of asynchronous job accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Crawl,
    LlmExtract,
}

/// Strict PENDING -> RUNNING -> {COMPLETED, FAILED} state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub webhook_data_in_payload: bool,
    #[serde(default)]
    pub webhook_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub urls: Vec<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub webhook_config: Option<WebhookConfig>,
}

/// A pending or in-flight webhook POST for one job. Transient: rebuilt from
/// `Job` state on process restart, never itself persisted.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub job_id: String,
    pub target_url: String,
    pub headers: BTreeMap<String, String>,
    pub include_data: bool,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = BrowserSpec::default();
        let b = BrowserSpec::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().len() >= 40);
    }

    #[test]
    fn unknown_fields_do_not_affect_fingerprint() {
        let mut a = BrowserSpec::default();
        a.extra
            .insert("future_flag".to_string(), serde_json::json!(true));
        let b = BrowserSpec::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn differing_specs_hash_differently() {
        let a = BrowserSpec::default();
        let mut b = BrowserSpec::default();
        b.user_agent = Some("custom-ua".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
