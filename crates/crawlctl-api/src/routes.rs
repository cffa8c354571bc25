//! Router assembly (§6): wires every handler onto its path and layers the
//! cross-cutting tower-http middleware over the whole surface.

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{crawl, dispatchers, health, jobs, metrics, monitor};
use crate::state::AppState;
use crate::streaming::ndjson;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .route("/crawl", post(crawl::crawl))
        .route("/crawl/stream", post(ndjson::crawl_stream))
        .route("/crawl/job", post(jobs::create_crawl_job))
        .route("/crawl/job/:id", get(jobs::get_job))
        .route("/llm/job", post(jobs::create_llm_job))
        .route("/llm/job/:id", get(jobs::get_job))
        .route("/html", post(crawl::html))
        .route("/md", post(crawl::markdown))
        .route("/screenshot", post(crawl::screenshot))
        .route("/pdf", post(crawl::pdf))
        .route("/execute_js", post(crawl::execute_js))
        .route("/monitor/health", get(monitor::health))
        .route("/monitor/requests", get(monitor::requests))
        .route("/monitor/browsers", get(monitor::browsers))
        .route("/monitor/timeline", get(monitor::timeline))
        .route("/monitor/logs/janitor", get(monitor::janitor_log))
        .route("/monitor/logs/errors", get(monitor::error_log))
        .route("/monitor/ws", get(monitor::ws))
        .route("/dispatchers", get(dispatchers::list))
        .route("/dispatchers/default", get(dispatchers::default_dispatcher))
        .route("/dispatchers/:kind/stats", get(dispatchers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .with_state(state)
}
