//! `POST /crawl/stream` (§6): one JSON line per URL result, a final
//! `{"status":"completed"}` line closes the stream.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::CrawlVariant;
use crate::requests::CrawlRequest;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 16;

pub async fn crawl_stream(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> Response {
    if let Err(err) = req.validate() {
        return err.into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::convert::Infallible>>(CHANNEL_CAPACITY);
    let browser_spec = req.browser_config.unwrap_or_default();
    let urls = req.urls;

    tokio::spawn(async move {
        // Each URL is an independent gateway invocation run concurrently;
        // lines are emitted in completion order, not submission order.
        let mut inflight: FuturesUnordered<_> = urls
            .into_iter()
            .map(|url| {
                let state = state.clone();
                let browser_spec = browser_spec.clone();
                async move {
                    match state
                        .gateway
                        .crawl_one("/crawl/stream", &url, &browser_spec, CrawlVariant::Crawl)
                        .await
                    {
                        Ok(result) => result,
                        Err(err) => serde_json::json!({"url": url, "success": false, "error": err.to_string()}),
                    }
                }
            })
            .collect();

        while let Some(line) = inflight.next().await {
            if !send_line(&tx, &line).await {
                return;
            }
        }
        let _ = send_line(&tx, &serde_json::json!({"status": "completed"})).await;
    });

    Response::builder()
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to build ndjson stream response");
            Response::builder()
                .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .expect("static error response is always buildable")
        })
}

async fn send_line(tx: &mpsc::Sender<Result<Bytes, std::convert::Infallible>>, value: &serde_json::Value) -> bool {
    let mut line = serde_json::to_vec(value).unwrap_or_default();
    line.push(b'\n');
    tx.send(Ok(Bytes::from(line))).await.is_ok()
}
