//! `GET /health` (§6): coarse container health, independent of the
//! monitor's richer `/monitor/health` projection.

use std::sync::Arc;
use std::time::Instant;

use crawlctl_pool::MemoryProbe;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct ContainerHealth {
    pub memory_percent: f64,
    pub cpu_percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub container: ContainerHealth,
    pub uptime_secs: u64,
    pub status: &'static str,
}

pub struct HealthService {
    memory_probe: Arc<MemoryProbe>,
    system: Mutex<System>,
    started_at: Instant,
}

impl HealthService {
    pub fn new(memory_probe: Arc<MemoryProbe>) -> Self {
        Self {
            memory_probe,
            system: Mutex::new(System::new()),
            started_at: Instant::now(),
        }
    }

    pub async fn report(&self) -> HealthReport {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        let cpu_percent = system.global_cpu_usage();
        HealthReport {
            container: ContainerHealth {
                memory_percent: self.memory_probe.usage_percent(),
                cpu_percent,
            },
            uptime_secs: self.started_at.elapsed().as_secs(),
            status: "ok",
        }
    }
}
