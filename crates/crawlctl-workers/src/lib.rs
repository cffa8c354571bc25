//! Async job registry and webhook delivery.

pub mod job_registry;
pub mod webhook_dispatcher;

pub use job_registry::JobRegistry;
pub use webhook_dispatcher::WebhookDispatcher;
