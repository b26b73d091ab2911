use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ge_sniper::api::{self, ApiContext, RateLimiter};
use ge_sniper::catalog::ItemCatalog;
use ge_sniper::config::{AppConfig, ConfigHandle};
use ge_sniper::database::{MarketDatabase, PruneService};
use ge_sniper::egress::{ChatEgress, DiscordEgress, DryRunEgress};
use ge_sniper::engine::EventEngine;
use ge_sniper::poller::{CatalogRefreshLoop, IngestLoop, PipelineStatus};
use ge_sniper::router::AlertRouter;
use ge_sniper::tenants::TenantStore;
use ge_sniper::upstream::UpstreamClient;
use ge_sniper::views::ViewPublisher;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_STORE_ERROR: i32 = 3;

struct ServiceOrchestrator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ServiceOrchestrator {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    fn spawn(&mut self, name: &'static str, task: JoinHandle<Result<()>>) {
        info!(service = name, "service started");
        self.tasks.push((name, task));
    }

    async fn shutdown_all(&mut self) {
        info!("shutting down all services");
        let _ = self.shutdown_tx.send(());

        for (name, task) in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => info!(service = name, "service shut down cleanly"),
                Ok(Ok(Err(e))) => warn!(service = name, error = %e, "service error during shutdown"),
                Ok(Err(e)) => error!(service = name, error = %e, "service task failed"),
                Err(_) => {
                    error!(service = name, "service did not stop within grace period");
                }
            }
        }
        info!("all services stopped");
    }
}

fn init_tracing() -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "ge-sniper.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .json()
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Keep the appender guard alive for the process lifetime.
    std::mem::forget(guard);

    Ok(())
}

async fn run(config: AppConfig) -> Result<i32> {
    let config = Arc::new(config);

    let db = match MarketDatabase::connect(&config.database_url()).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "unrecoverable store error at startup");
            return Ok(EXIT_STORE_ERROR);
        }
    };

    let upstream = Arc::new(UpstreamClient::new(
        &config.upstream_base_url,
        &config.user_agent,
    )?);
    let catalog = Arc::new(ItemCatalog::new(&config.cache_root));
    let views = Arc::new(ViewPublisher::new());
    let status = Arc::new(PipelineStatus::new());
    let tenants = match TenantStore::new(config.config_root.clone(), db.clone()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to initialize tenant config store");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    let egress: Arc<dyn ChatEgress> = match &config.chat_token {
        Some(token) => Arc::new(DiscordEgress::new(token, &config.user_agent)?),
        None => {
            warn!("no chat token configured, alert emissions run dry");
            Arc::new(DryRunEgress)
        }
    };

    let engine = Arc::new(EventEngine::new(
        db.clone(),
        catalog.clone(),
        config.thresholds.clone(),
    ));
    let router = Arc::new(AlertRouter::new(
        tenants.clone(),
        egress,
        config.ingest_period_seconds,
    ));

    let mut orchestrator = ServiceOrchestrator::new();

    let ingest = IngestLoop::new(
        upstream.clone(),
        db.clone(),
        engine,
        views.clone(),
        router,
        status.clone(),
        Duration::from_secs(config.ingest_period_seconds),
        config.admin_webhook.clone(),
        orchestrator.shutdown_tx.subscribe(),
    );
    orchestrator.spawn("ingest", tokio::spawn(ingest.run()));

    let catalog_loop = CatalogRefreshLoop::new(
        catalog.clone(),
        upstream.clone(),
        Duration::from_secs(config.catalog_period_seconds),
        orchestrator.shutdown_tx.subscribe(),
    );
    orchestrator.spawn("catalog", tokio::spawn(catalog_loop.run()));

    let prune = PruneService::new(
        db.clone(),
        Duration::from_secs(config.prune_period_seconds),
        config.retention_seconds(),
        orchestrator.shutdown_tx.subscribe(),
    );
    orchestrator.spawn("prune", tokio::spawn(prune.run()));

    let bind: SocketAddr = match config.api_bind.parse() {
        Ok(bind) => bind,
        Err(e) => {
            error!(error = %e, bind = %config.api_bind, "invalid api bind address");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let api_ctx = ApiContext {
        config: Arc::new(ConfigHandle::new((*config).clone())),
        config_path: std::env::var("CONFIG_PATH").ok().map(PathBuf::from),
        db,
        views,
        tenants,
        catalog,
        upstream,
        limiter: Arc::new(RateLimiter::new()),
        status,
    };
    let api_shutdown = orchestrator.shutdown_tx.subscribe();
    orchestrator.spawn(
        "api",
        tokio::spawn(async move { api::serve(api_ctx, bind, api_shutdown).await }),
    );

    info!("all services running, press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    orchestrator.shutdown_all().await;
    Ok(0)
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    info!("ge-sniper market event detector starting");

    let config_path = std::env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    match run(config).await {
        Ok(code) if code == 0 => info!("shutdown complete"),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "fatal error");
            std::process::exit(1);
        }
    }
}
