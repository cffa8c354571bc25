//! Browser pool, memory probe, and janitor sweep loop.

pub mod config;
pub mod janitor;
pub mod memory;
pub mod models;
pub mod pool;

pub use config::{JanitorBand, JanitorConfig, PoolConfig};
pub use janitor::Janitor;
pub use memory::MemoryProbe;
pub use models::{BrowserInstance, EngineHandle, EngineLauncher};
pub use pool::{BrowserPool, PoolEventSink};
