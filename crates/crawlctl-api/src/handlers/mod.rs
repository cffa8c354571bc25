pub mod crawl;
pub mod dispatchers;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod monitor;
