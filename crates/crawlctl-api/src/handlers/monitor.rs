//! Read-model endpoints over the `Monitor` plus the live push stream (§4.7, §4.9, §6).

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use crawlctl_types::TimelineMetric;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{ApiError, ApiResult};
use crate::requests::{validate_limit, TimelineWindow};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    status: Option<String>,
    limit: Option<usize>,
}

pub async fn health(State(state): State<AppState>) -> Json<crawlctl_monitoring::MonitorHealth> {
    Json(state.monitor.get_health().await)
}

pub async fn requests(State(state): State<AppState>, Query(q): Query<RequestsQuery>) -> ApiResult<Json<Value>> {
    let limit = validate_limit(q.limit.unwrap_or(50))?;
    let records = match q.status.as_deref().unwrap_or("all") {
        "all" => {
            let mut records = state.monitor.get_active().await;
            records.extend(state.monitor.get_completed(limit).await);
            records
        }
        "active" => state.monitor.get_active().await,
        "completed" => state.monitor.get_completed(limit).await,
        "success" => state
            .monitor
            .get_completed(limit)
            .await
            .into_iter()
            .filter(|r| r.success == Some(true))
            .collect(),
        "error" => state
            .monitor
            .get_completed(limit)
            .await
            .into_iter()
            .filter(|r| r.success == Some(false))
            .collect(),
        other => {
            return Err(ApiError::Validation(format!(
                "status must be one of all, active, completed, success, error, got {other}"
            )))
        }
    };
    Ok(Json(json!({"requests": records})))
}

pub async fn browsers(State(state): State<AppState>) -> Json<crawlctl_types::PoolSnapshot> {
    Json(state.monitor.get_browser_list().await)
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

pub async fn janitor_log(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> ApiResult<Json<Value>> {
    let limit = validate_limit(q.limit.unwrap_or(50))?;
    Ok(Json(json!({"events": state.monitor.get_janitor_log(limit).await})))
}

pub async fn error_log(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> ApiResult<Json<Value>> {
    let limit = validate_limit(q.limit.unwrap_or(50))?;
    Ok(Json(json!({"events": state.monitor.get_error_log(limit).await})))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    metric: String,
    window: Option<String>,
}

pub async fn timeline(State(state): State<AppState>, Query(q): Query<TimelineQuery>) -> ApiResult<Json<Value>> {
    let metric = match q.metric.as_str() {
        "memory" => TimelineMetric::MemoryPercent,
        "requests" => TimelineMetric::InflightRequests,
        "browsers" => TimelineMetric::ActiveBrowserCount,
        other => {
            return Err(ApiError::Validation(format!(
                "metric must be one of memory, requests, browsers, got {other}"
            )))
        }
    };
    let window = q.window.as_deref().map(TimelineWindow::parse).transpose()?.map(TimelineWindow::as_duration);
    Ok(Json(json!({"samples": state.monitor.get_timeline(metric, window).await})))
}

pub async fn ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.push_broker.subscribe(4).await;
    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                let payload = match serde_json::to_string(&*snapshot) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize monitor snapshot");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            // Any client frame, including a close, ends the push stream.
            _ = socket.recv() => break,
        }
    }
    state.push_broker.unsubscribe(id).await;
}
