//! `POST /crawl` and the specialized synchronous variants (§6).

use axum::extract::State;
use axum::Json;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::info;

use crate::engine::CrawlVariant;
use crate::errors::ApiResult;
use crate::requests::CrawlRequest;
use crate::state::AppState;

async fn run_batch(state: &AppState, endpoint: &str, req: &CrawlRequest, variant: CrawlVariant) -> Value {
    let browser_spec = req.browser_config.clone().unwrap_or_default();
    let results = join_all(req.urls.iter().map(|url| {
        let state = state.clone();
        let browser_spec = browser_spec.clone();
        let url = url.clone();
        let endpoint = endpoint.to_string();
        async move {
            match state.gateway.crawl_one(&endpoint, &url, &browser_spec, variant).await {
                Ok(result) => json!({"url": url, "success": true, "result": result}),
                Err(err) => json!({"url": url, "success": false, "error": err.to_string()}),
            }
        }
    }))
    .await;
    json!({"results": results})
}

pub async fn crawl(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    info!(url_count = req.urls.len(), "synchronous crawl request");
    Ok(Json(run_batch(&state, "/crawl", &req, CrawlVariant::Crawl).await))
}

pub async fn html(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    Ok(Json(run_batch(&state, "/html", &req, CrawlVariant::Html).await))
}

pub async fn markdown(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    Ok(Json(run_batch(&state, "/md", &req, CrawlVariant::Markdown).await))
}

pub async fn screenshot(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    Ok(Json(run_batch(&state, "/screenshot", &req, CrawlVariant::Screenshot).await))
}

pub async fn pdf(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    Ok(Json(run_batch(&state, "/pdf", &req, CrawlVariant::Pdf).await))
}

pub async fn execute_js(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> ApiResult<Json<Value>> {
    req.validate()?;
    Ok(Json(run_batch(&state, "/execute_js", &req, CrawlVariant::ExecuteJs).await))
}
