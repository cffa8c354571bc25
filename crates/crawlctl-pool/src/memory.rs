//! Container-aware memory usage probe (§4.1).
//!
//! Tries cgroup v2, then cgroup v1, then falls back to host RAM via
//! `sysinfo`. Every step is advisory: a failed read is logged once and the
//! probe moves on to the next resolution step rather than propagating an
//! error.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use sysinfo::System;

const CGROUP_V2_CURRENT: &str = "/sys/fs/cgroup/memory.current";
const CGROUP_V2_MAX: &str = "/sys/fs/cgroup/memory.max";
const CGROUP_V1_USAGE: &str = "/sys/fs/cgroup/memory/memory.usage_in_bytes";
const CGROUP_V1_LIMIT: &str = "/sys/fs/cgroup/memory/memory.limit_in_bytes";

/// Samples container/host memory pressure as a percentage in `[0, 100]`.
pub struct MemoryProbe {
    system: Mutex<System>,
    failure_logged: AtomicBool,
    /// Test/fixture seam: when set, `usage_percent` returns this instead of
    /// reading cgroup/host state. Unused in production.
    stub: Mutex<Option<f64>>,
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            failure_logged: AtomicBool::new(false),
            stub: Mutex::new(None),
        }
    }

    /// Builds a probe that always reports `percent`, bypassing every real
    /// resolution step. For tests and scenario fixtures only.
    pub fn stub_at(percent: f64) -> Self {
        let probe = Self::new();
        *probe.stub.lock().expect("stub mutex poisoned") = Some(percent);
        probe
    }

    /// Current memory usage as a percentage. Never fails; returns `0.0` and
    /// logs once if every resolution step is unavailable.
    pub fn usage_percent(&self) -> f64 {
        if let Some(pct) = *self.stub.lock().expect("stub mutex poisoned") {
            return pct;
        }
        if let Some(pct) = self.cgroup_v2() {
            return pct;
        }
        if let Some(pct) = self.cgroup_v1() {
            return pct;
        }
        if let Some(pct) = self.host_rss() {
            return pct;
        }
        if !self.failure_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!("MemoryProbe: all resolution steps failed, reporting 0.0");
        }
        0.0
    }

    fn cgroup_v2(&self) -> Option<f64> {
        let current: u64 = fs::read_to_string(CGROUP_V2_CURRENT).ok()?.trim().parse().ok()?;
        let max_raw = fs::read_to_string(CGROUP_V2_MAX).ok()?;
        let max_raw = max_raw.trim();
        let limit: u64 = if max_raw == "max" {
            self.host_total_bytes()?
        } else {
            max_raw.parse().ok()?
        };
        percent(current, limit)
    }

    fn cgroup_v1(&self) -> Option<f64> {
        let usage: u64 = fs::read_to_string(CGROUP_V1_USAGE).ok()?.trim().parse().ok()?;
        let limit: u64 = fs::read_to_string(CGROUP_V1_LIMIT).ok()?.trim().parse().ok()?;
        let host_total = self.host_total_bytes();
        let limit = match host_total {
            Some(host) if limit > host => host,
            _ => limit,
        };
        percent(usage, limit)
    }

    fn host_rss(&self) -> Option<f64> {
        let mut system = self.system.lock().expect("MemoryProbe system mutex poisoned");
        system.refresh_memory();
        percent(system.used_memory(), system.total_memory())
    }

    fn host_total_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock().expect("MemoryProbe system mutex poisoned");
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            None
        } else {
            Some(total)
        }
    }
}

fn percent(used: u64, limit: u64) -> Option<f64> {
    if limit == 0 {
        return None;
    }
    Some((used as f64 / limit as f64 * 100.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_limit() {
        assert_eq!(percent(10, 0), None);
    }

    #[test]
    fn percent_clamps_to_100() {
        assert_eq!(percent(200, 100), Some(100.0));
    }

    #[test]
    fn host_rss_fallback_never_panics() {
        let probe = MemoryProbe::new();
        let pct = probe.usage_percent();
        assert!((0.0..=100.0).contains(&pct));
    }
}
