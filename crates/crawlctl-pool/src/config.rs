//! Tunables for the pool and janitor (§4.3, §4.4).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// COLD -> HOT promotion threshold on `useCount`.
    pub promotion_threshold: u64,
    /// `MemoryProbe.usagePercent()` at/above which `acquire` refuses to
    /// launch a brand-new instance.
    pub memory_hard_limit: f64,
    /// Bound on `shutdown()`'s wait for `activeRequests == 0` per instance.
    pub shutdown_drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 3,
            memory_hard_limit: 95.0,
            shutdown_drain_timeout: Duration::from_secs(30),
        }
    }
}

/// One row of the janitor's memory-band table.
#[derive(Debug, Clone, Copy)]
pub struct JanitorBand {
    pub interval: Duration,
    pub cold_ttl: Duration,
    pub hot_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// `mem > high_watermark` band.
    pub high_watermark: f64,
    /// `mid_watermark < mem <= high_watermark` band; otherwise the low band.
    pub mid_watermark: f64,
    pub high_band: JanitorBand,
    pub mid_band: JanitorBand,
    pub low_band: JanitorBand,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            high_watermark: 80.0,
            mid_watermark: 60.0,
            high_band: JanitorBand {
                interval: Duration::from_secs(10),
                cold_ttl: Duration::from_secs(30),
                hot_ttl: Duration::from_secs(120),
            },
            mid_band: JanitorBand {
                interval: Duration::from_secs(30),
                cold_ttl: Duration::from_secs(60),
                hot_ttl: Duration::from_secs(300),
            },
            low_band: JanitorBand {
                interval: Duration::from_secs(60),
                cold_ttl: Duration::from_secs(300),
                hot_ttl: Duration::from_secs(600),
            },
        }
    }
}

impl JanitorConfig {
    /// Select the active band for a given memory usage percentage.
    pub fn band_for(&self, mem_percent: f64) -> JanitorBand {
        if mem_percent > self.high_watermark {
            self.high_band
        } else if mem_percent > self.mid_watermark {
            self.mid_band
        } else {
            self.low_band
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_selection_matches_table() {
        let cfg = JanitorConfig::default();
        assert_eq!(cfg.band_for(85.0).interval, Duration::from_secs(10));
        assert_eq!(cfg.band_for(70.0).interval, Duration::from_secs(30));
        assert_eq!(cfg.band_for(40.0).interval, Duration::from_secs(60));
        assert_eq!(cfg.band_for(80.0).interval, Duration::from_secs(30));
        assert_eq!(cfg.band_for(60.0).interval, Duration::from_secs(60));
    }
}
