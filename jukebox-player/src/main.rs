//! Jukebox player - main entry point
//!
//! Opens the queue database, launches the player, then runs the HTTP API and
//! the playback loop side by side until a shutdown signal or a fatal error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::db::init_database;
use jukebox_common::events::EventBus;
use jukebox_common::AppConfig;
use jukebox_player::api::{self, AppContext};
use jukebox_player::collaborators::{LocalStartChannel, StaticAssetRenderer, YtDlpResolver};
use jukebox_player::playback::{Orchestrator, OrchestratorConfig};
use jukebox_player::player::driver::DriverConfig;
use jukebox_player::player::{MpvDriver, PlayerControl};
use jukebox_player::queue::QueueStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for jukebox-player
#[derive(Parser, Debug)]
#[command(name = "jukebox-player")]
#[command(about = "Shared playback queue driving an external player")]
#[command(version)]
struct Args {
    /// Config file (overrides config-portable.toml / config.toml lookup)
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Database file
    #[arg(long, env = "JUKEBOX_DB")]
    db: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "JUKEBOX_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jukebox_player=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting jukebox-player v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = args.db {
        config.db_file = db;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);
    info!("Database: {}", config.db_file.display());

    let pool = init_database(&config.db_file)
        .await
        .context("Failed to open queue database")?;
    let store = QueueStore::new(pool);

    let driver = Arc::new(MpvDriver::new(DriverConfig::from(config.as_ref())));
    driver.start().await.context("Failed to start player")?;
    driver
        .script_message(&["osc-idlescreen", "no"])
        .await
        .context("Failed to configure player")?;

    let starts = Arc::new(LocalStartChannel::new());
    let events = EventBus::default();
    let orchestrator = Orchestrator::new(
        store.clone(),
        driver.clone(),
        Arc::new(StaticAssetRenderer::new(
            &config.preview_template,
            &config.loading_template,
        )),
        starts.clone(),
        events,
        OrchestratorConfig::from(config.as_ref()),
    );

    let ctx = AppContext {
        store,
        starts,
        resolver: Arc::new(YtDlpResolver::new(config.yt_dlp_path.clone())),
        config: config.clone(),
    };

    let shutdown = CancellationToken::new();
    let playback = orchestrator.run(shutdown.clone(), driver.exit_signal());

    let outcome = tokio::select! {
        result = api::serve(ctx) => result.context("HTTP server failed"),
        result = playback => result.context("Playback stopped"),
        _ = shutdown_signal() => {
            shutdown.cancel();
            Ok(())
        }
    };

    driver.shutdown();
    match &outcome {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => error!("{:#}", e),
    }
    outcome
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
