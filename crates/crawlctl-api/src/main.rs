use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use crawlctl_api::config::ApiConfig;
use crawlctl_api::engine::SimpleHttpCrawlerEngine;
use crawlctl_api::state::AppState;
use crawlctl_persistence::{shared_in_memory, RedisKVStore};
use crawlctl_pool::{BrowserPool, EngineHandle, EngineLauncher, MemoryProbe, PoolConfig};
use crawlctl_types::{BrowserSpec, CoreResult};
use crawlctl_utils::{HttpClientFactory, HttpConfig};

#[derive(Parser)]
#[command(name = "crawlctl-api")]
#[command(about = "Crawl control-plane API server")]
struct Args {
    #[arg(long)]
    bind: Option<String>,
}

/// The pool's permanent/hot/cold tiers only track launch-and-close
/// lifecycle; actual page work happens inside `CrawlerEngine::run` against
/// a plain `reqwest::Client`, so a launched instance carries no resource of
/// its own beyond its fingerprint.
struct NoopEngineHandle;

#[async_trait]
impl EngineHandle for NoopEngineHandle {
    async fn close(&self) {}
}

struct NoopEngineLauncher;

#[async_trait]
impl EngineLauncher for NoopEngineLauncher {
    async fn launch(&self, _spec: &BrowserSpec) -> CoreResult<Box<dyn EngineHandle>> {
        Ok(Box::new(NoopEngineHandle))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse()?;
    }
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_addr,
        redis_url = %config.redis_url,
        "starting crawlctl-api"
    );

    let memory_probe = Arc::new(MemoryProbe::new());
    let pool = Arc::new(
        BrowserPool::new(PoolConfig::default(), Arc::new(NoopEngineLauncher), memory_probe.clone()).await?,
    );

    let kvstore: Arc<dyn crawlctl_persistence::KVStore> = match RedisKVStore::connect(&config.redis_url, config.redis_pool_size).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "failed to connect to redis, falling back to in-memory kvstore");
            shared_in_memory()
        }
    };

    let http_client = HttpClientFactory::create(HttpConfig::default())?;
    let engine = Arc::new(SimpleHttpCrawlerEngine::new(http_client));

    let state = AppState::new(config.clone(), pool, memory_probe, kvstore, engine).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    state.spawn_background_tasks(shutdown_rx).await;

    let shutdown_state = state.clone();
    let app = crawlctl_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(bind_address = %config.bind_addr, "crawlctl-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, shutdown_state))
        .await?;

    tracing::info!("crawlctl-api shutdown complete");
    Ok(())
}

fn init_tracing() {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(&endpoint))
            .install_batch(opentelemetry_sdk::runtime::Tokio);
        match provider {
            Ok(provider) => {
                let tracer = provider.tracer("crawlctl-api");
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer())
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .init();
                tracing::info!(endpoint = %endpoint, "opentelemetry tracing initialized");
                return;
            }
            Err(err) => {
                eprintln!("failed to initialize opentelemetry pipeline: {err}, falling back to plain tracing");
            }
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Races Ctrl+C against SIGTERM, then flips the shared shutdown watch so
/// every background loop (janitor, dispatcher scheduler, monitor ticker,
/// push broker, job sweeper) unwinds before axum finishes draining
/// in-flight connections. After the drain window, force-releases any pool
/// instances still serving in-flight requests and flushes the monitor's
/// endpoint aggregates one last time before the process exits.
async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>, state: AppState) {
    let drain_timeout = state.config.shutdown_drain_timeout;
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl_c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received sigterm, initiating graceful shutdown"),
    }

    let _ = shutdown_tx.send(true);
    tokio::time::sleep(drain_timeout).await;
    tracing::info!("background task drain window elapsed");

    state.pool.shutdown(drain_timeout).await;
    crawlctl_monitoring::flush_once(&state.monitor, &state.kvstore).await;
    tracing::info!("pool closed and monitor aggregates flushed");
}
