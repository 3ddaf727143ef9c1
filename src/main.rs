//! podscope binary entry point.
//!
//! Runs the collector scheduler and the read API in one process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use podscope::{
    cache::HotCache,
    clock::SystemClock,
    collector::{
        AlertSink, AlertSubscriptions, CollectorScheduler, FanOutAggregator, LogAlertSink,
        NodeProber, RegistryClient, SampleSize, ScheduleTicker, WebhookAlertSink,
    },
    config::{AppConfig, parse_duration, parse_endpoint_map},
    credits::CreditsClient,
    server::{AppState, create_router},
    storage::StorageBuilder,
    transport::{HttpTransport, SharedTransport},
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// podscope - fleet data collection and read API
#[derive(Parser, Debug)]
#[command(name = "podscope", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "PODSCOPE_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "PODSCOPE_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "PODSCOPE_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database URL; an empty value disables persistence
    #[arg(long, env = "PODSCOPE_DB_URL")]
    db_url: Option<String>,

    /// Collection cron expression (replaces the configured interval)
    #[arg(long, env = "PODSCOPE_CRON", conflicts_with = "interval")]
    cron: Option<String>,

    /// Fixed collection interval, e.g. "5m" (replaces the configured cron)
    #[arg(long, env = "PODSCOPE_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Probes per wave
    #[arg(long, env = "PODSCOPE_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Pods probed per network per cycle, or "all"
    #[arg(long, env = "PODSCOPE_SAMPLE_SIZE")]
    sample_size: Option<SampleSize>,

    /// Comma-separated allowed CORS origins
    #[arg(long, env = "PODSCOPE_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Option<Vec<String>>,

    /// Network RPC overrides, e.g. "devnet=https://a/rpc,mainnet=https://b/rpc"
    #[arg(long, env = "PODSCOPE_RPC_ENDPOINTS")]
    rpc_endpoints: Option<String>,
}

impl Cli {
    /// Apply CLI/env overrides (CLI > ENV > config file).
    fn apply(self, config: &mut AppConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(bind) = self.server_bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.server_port {
            config.server.port = port;
        }
        if let Some(url) = self.db_url {
            config.database.url = url;
        }
        if let Some(cron) = self.cron {
            config.collector.cron = Some(cron);
            config.collector.interval = None;
        }
        if let Some(interval) = self.interval {
            config.collector.interval = Some(interval);
            config.collector.cron = None;
        }
        if let Some(batch_size) = self.batch_size {
            config.collector.batch_size = batch_size;
        }
        if let Some(sample_size) = self.sample_size {
            config.collector.sample_size = sample_size;
        }
        if let Some(origins) = self.cors_origins {
            config.server.cors_origins = origins
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(raw) = self.rpc_endpoints {
            config.apply_endpoint_overrides(parse_endpoint_map(&raw)?);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,podscope=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;
    cli.apply(&mut config)?;
    config.validate()?;

    tracing::info!(
        bind = %config.server.bind,
        port = config.server.port,
        networks = config.networks.len(),
        database = %config.database.url,
        "Configuration loaded"
    );

    let clock = SystemClock::shared();

    // Build storage layer; an unreachable store disables persistence
    let mut store_unavailable = None;
    let handles = if config.database.is_enabled() {
        let opened = StorageBuilder::new(&config.database.url)
            .channel_capacity(config.database.channel_capacity)
            .batch_size(config.database.batch_size)
            .batch_flush_interval(config.database.flush_interval)
            .retention(config.database.retention)
            .clock(clock.clone())
            .open()
            .await;
        match opened {
            Ok(handles) => Some(handles),
            Err(e) => {
                tracing::error!(
                    kind = e.kind(),
                    error = %e,
                    "Storage unavailable; continuing without persistence"
                );
                store_unavailable = Some(e);
                None
            }
        }
    } else {
        tracing::warn!("No database configured; history endpoints will return empty data");
        None
    };

    let http = HttpTransport::new(config.collector.transport_config())?;
    let transport: SharedTransport = Arc::new(http.clone());
    let hot_cache = Arc::new(HotCache::new(config.cache.ttl, clock.clone()));
    let subscriptions = Arc::new(AlertSubscriptions::new());
    let sink: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url, config.alerts.token.clone())),
        None => Arc::new(LogAlertSink),
    };

    // Collector scheduler
    let aggregator = FanOutAggregator::new(
        RegistryClient::new(transport.clone()),
        NodeProber::new(transport.clone(), config.collector.rpc_port),
        config.collector.aggregator_config(),
        clock.clone(),
    );
    let mut scheduler = CollectorScheduler::new(
        config.networks.clone(),
        aggregator,
        hot_cache.clone(),
        clock.clone(),
    )
    .with_alerts(subscriptions.clone(), sink)
    .with_registry_snapshot_interval(config.collector.registry_snapshot_interval);
    if let Some(handles) = &handles {
        scheduler = scheduler.with_store(handles.writer.clone(), handles.admin.clone());
    }

    let schedule = config.collector.schedule()?;
    let ticker = ScheduleTicker::new(&schedule, config.collector.initial_delay, clock.clone())?;
    tracing::info!(?schedule, "Starting collector scheduler");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(ticker, shutdown_rx).await });

    // Create web server state
    let mut app_state = AppState::new(config.networks.clone(), transport, hot_cache)
        .with_subscriptions(subscriptions)
        .with_integrations(config.integrations.clone())
        .with_rpc_port(config.collector.rpc_port);
    if let Some(handles) = &handles {
        app_state = app_state.with_store(handles.reader.clone());
    }
    if let Some(err) = &store_unavailable {
        app_state = app_state.with_store_unavailable(err);
    }
    if let Some(url) = &config.credits.url {
        app_state = app_state.with_credits(CreditsClient::new(
            http,
            url,
            config.credits.ttl,
            clock.clone(),
        ));
    }

    let app = create_router(app_state, &config.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping collector scheduler...");
    let _ = shutdown_tx.send(true);
    match scheduler_task.await {
        Ok(cycles) => tracing::info!(cycles, "Collector scheduler stopped"),
        Err(e) => tracing::error!("Collector scheduler task failed: {}", e),
    }

    if let Some(handles) = handles {
        tracing::info!("Shutting down storage...");
        if let Err(e) = handles.shutdown().await {
            tracing::error!("Failed to shutdown storage: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
