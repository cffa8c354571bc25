//! Dispatcher introspection endpoints (§6): `/dispatchers`,
//! `/dispatchers/default`, `/dispatchers/{type}/stats`.
//!
//! The process runs a single configured dispatcher strategy at a time, so
//! "default" and "the dispatcher matching `{type}`" both resolve to the
//! same `Dispatcher::stats()` call.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::dispatcher::DispatcherStats;
use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

fn type_name(stats: &DispatcherStats) -> &'static str {
    stats.strategy
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let stats = state.dispatcher.stats();
    Json(json!({"dispatchers": [stats]}))
}

pub async fn default_dispatcher(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.dispatcher.stats())
}

pub async fn stats(State(state): State<AppState>, Path(kind): Path<String>) -> ApiResult<Json<DispatcherStats>> {
    let stats = state.dispatcher.stats();
    if type_name(&stats).eq_ignore_ascii_case(&kind) {
        Ok(Json(stats))
    } else {
        Err(ApiError::NotFound(format!("no dispatcher of type {kind} is running")))
    }
}
