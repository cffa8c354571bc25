//! Core error taxonomy (see §7 error handling design).
//!
//! `WebhookDeliveryFailure` and `PersistenceFailure` are never surfaced to
//! API callers — they exist so internal call sites can log/count them
//! uniformly; handlers never construct an HTTP response from them.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("memory pressure: pool refused launch")]
    MemoryPressure,

    #[error("memory exhausted: dispatcher admission timed out under sustained pressure")]
    MemoryExhausted,

    #[error("engine launch failed: {0}")]
    EngineLaunchError(String),

    #[error("engine run failed: {0}")]
    EngineRunError(String),

    #[error("webhook delivery failure: {0}")]
    WebhookDeliveryFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Stable machine-readable code surfaced in `{error: {code, message}}`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::MemoryPressure => "memory_pressure",
            CoreError::MemoryExhausted => "memory_exhausted",
            CoreError::EngineLaunchError(_) => "engine_launch_error",
            CoreError::EngineRunError(_) => "engine_run_error",
            CoreError::WebhookDeliveryFailure(_) => "webhook_delivery_failure",
            CoreError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}
