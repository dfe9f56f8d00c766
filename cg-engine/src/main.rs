//! cg-engine - conversational threat-assessment service
//!
//! Accepts conversation events over HTTP, runs every configured analysis
//! module against them, and streams synthesized verdicts to live
//! dashboard subscribers.

use anyhow::{Context, Result};
use cg_common::config::load_or_default;
use cg_engine::adapters::build_adapters;
use cg_engine::maintenance::MaintenanceTask;
use cg_engine::pipeline::Pipeline;
use cg_engine::store::{warm_start, SqliteVerdictStore, VerdictStore};
use cg_engine::AppState;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cg-engine
#[derive(Parser, Debug)]
#[command(name = "cg-engine")]
#[command(about = "Conversational threat-assessment engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CG_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "CG_PORT")]
    port: Option<u16>,

    /// SQLite database for verdict persistence (overrides the config file)
    #[arg(short, long, env = "CG_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = Some(database);
    }

    // Initialize tracing; RUST_LOG wins over the configured level
    let default_filter = format!("cg_engine={0},cg_common={0},tower_http={0}", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cg-engine v{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!(
        "Build: {} ({})",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let adapters = build_adapters(&config.adapters).context("Failed to build module adapters")?;
    info!("Installed {} analysis module(s)", adapters.len());

    let store: Option<Arc<dyn VerdictStore>> = match &config.database.path {
        Some(path) => {
            info!("Database: {}", path.display());
            let store = SqliteVerdictStore::open(path, config.database.max_lock_wait_ms)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
            let store: Arc<dyn VerdictStore> = Arc::new(store);
            Some(store)
        }
        None => {
            warn!("No database configured, verdicts will not be persisted");
            None
        }
    };

    let pipeline = Arc::new(Pipeline::from_config(&config, adapters, store.clone()));

    if let Some(store) = &store {
        warm_start(
            store.as_ref(),
            pipeline.tracker(),
            config.sessions.idle_timeout(),
            config.database.warm_start_limit,
        )
        .await;
    }

    let maintenance = MaintenanceTask::new(
        Arc::clone(pipeline.cache()),
        Arc::clone(pipeline.tracker()),
        config.maintenance.sweep_interval(),
    );
    maintenance.start();

    let app = cg_engine::build_router(AppState::new(Arc::clone(&pipeline)));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.stop().await;
    if let Some(store) = &store {
        store.close().await;
    }
    info!("cg-engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
