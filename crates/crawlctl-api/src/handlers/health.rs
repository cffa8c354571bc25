//! `GET /health` (§6).

use axum::extract::State;
use axum::Json;

use crate::health::HealthReport;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.report().await)
}
