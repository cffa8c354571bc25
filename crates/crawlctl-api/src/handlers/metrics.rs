//! `GET /metrics` (§6): Prometheus text exposition built fresh on each
//! scrape from `Monitor`/`Dispatcher` read models.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

pub async fn metrics(State(state): State<AppState>) -> Response {
    let registry = Registry::new();

    let health = state.monitor.get_health().await;
    let dispatcher_stats = state.dispatcher.stats();
    let aggregates = state.monitor.get_endpoint_aggregates().await;

    register_gauge(&registry, "crawlctl_memory_percent", "Process memory usage percent", health.memory_percent);
    register_gauge(&registry, "crawlctl_pool_size", "Number of live browser pool entries", health.pool_size as f64);
    register_gauge(&registry, "crawlctl_active_requests", "In-flight request count", health.active_requests as f64);
    register_gauge(&registry, "crawlctl_uptime_seconds", "Process uptime in seconds", health.uptime_secs as f64);
    register_gauge(
        &registry,
        "crawlctl_dispatcher_inflight",
        "Requests currently admitted by the dispatcher",
        dispatcher_stats.inflight as f64,
    );
    register_gauge(
        &registry,
        "crawlctl_dispatcher_capacity",
        "Dispatcher's configured maximum concurrency",
        dispatcher_stats.capacity as f64,
    );
    register_gauge(
        &registry,
        "crawlctl_dispatcher_queued",
        "Requests waiting for a dispatcher slot",
        dispatcher_stats.queued as f64,
    );

    if let Ok(count) = GaugeVec::new(Opts::new("crawlctl_endpoint_requests_total", "Requests seen per endpoint"), &["endpoint"]) {
        if let Ok(successes) = GaugeVec::new(Opts::new("crawlctl_endpoint_successes_total", "Successful requests per endpoint"), &["endpoint"]) {
            if let Ok(errors) = GaugeVec::new(Opts::new("crawlctl_endpoint_errors_total", "Failed requests per endpoint"), &["endpoint"]) {
                for (endpoint, agg) in &aggregates {
                    count.with_label_values(&[endpoint]).set(agg.count as f64);
                    successes.with_label_values(&[endpoint]).set(agg.successes as f64);
                    errors.with_label_values(&[endpoint]).set(agg.errors as f64);
                }
                let _ = registry.register(Box::new(count));
                let _ = registry.register(Box::new(successes));
                let _ = registry.register(Box::new(errors));
            }
        }
    }

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %err, "failed to encode prometheus metrics");
    }

    ([(CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}

fn register_gauge(registry: &Registry, name: &'static str, help: &'static str, value: f64) {
    match Gauge::with_opts(Opts::new(name, help)) {
        Ok(gauge) => {
            gauge.set(value);
            if let Err(err) = registry.register(Box::new(gauge)) {
                tracing::warn!(error = %err, metric = name, "failed to register metric");
            }
        }
        Err(err) => tracing::warn!(error = %err, metric = name, "failed to build gauge"),
    }
}
