//! HTTP-facing error type (§6 error HTTP mapping, §7 error handling design).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("memory pressure: pool refused launch")]
    MemoryPressure,

    #[error("memory exhausted: dispatcher admission timed out under sustained pressure")]
    MemoryExhausted,

    #[error("engine launch failed: {0}")]
    EngineLaunch(String),

    #[error("engine run failed: {0}")]
    EngineRun(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MemoryPressure | ApiError::MemoryExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::EngineLaunch(_) | ApiError::EngineRun(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::MemoryPressure => "memory_pressure",
            ApiError::MemoryExhausted => "memory_exhausted",
            ApiError::EngineLaunch(_) => "engine_launch_error",
            ApiError::EngineRun(_) => "engine_run_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<crawlctl_types::CoreError> for ApiError {
    fn from(err: crawlctl_types::CoreError) -> Self {
        match err {
            crawlctl_types::CoreError::ValidationError(msg) => ApiError::Validation(msg),
            crawlctl_types::CoreError::NotFound(msg) => ApiError::NotFound(msg),
            crawlctl_types::CoreError::MemoryPressure => ApiError::MemoryPressure,
            crawlctl_types::CoreError::MemoryExhausted => ApiError::MemoryExhausted,
            crawlctl_types::CoreError::EngineLaunchError(msg) => ApiError::EngineLaunch(msg),
            crawlctl_types::CoreError::EngineRunError(msg) => ApiError::EngineRun(msg),
            // Never surfaced directly to callers; a handler hitting these
            // paths is a programming error, so fold them into internal.
            crawlctl_types::CoreError::WebhookDeliveryFailure(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
            crawlctl_types::CoreError::PersistenceFailure(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => tracing::error!(error = %self, "request failed"),
            StatusCode::SERVICE_UNAVAILABLE => tracing::warn!(error = %self, "request refused"),
            _ => tracing::info!(error = %self, "request rejected"),
        }
        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
