//! vnm-ingest - VPN node ingestion and lifecycle service
//!
//! Imports pasted node lists, deduplicates them against the SQLite node
//! store and drives nodes through ping, throughput and activation tests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vnm_common::config::{load_or_default, RootFolderInitializer, RootFolderResolver};
use vnm_common::events::EventBus;

use vnm_ingest::config::{CliOverrides, ServiceSettings};
use vnm_ingest::services::{CommandActivator, CommandProbe, Importer, ProbeOrchestrator, Rechecker};
use vnm_ingest::store::Stores;
use vnm_ingest::AppState;

const MODULE_NAME: &str = "vnm-ingest";

/// Command-line arguments for vnm-ingest
#[derive(Parser, Debug)]
#[command(name = "vnm-ingest")]
#[command(about = "VPN node ingestion and lifecycle service")]
#[command(version)]
struct Args {
    /// Folder holding the node database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5740
    #[arg(short, long)]
    bind: Option<String>,

    /// trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Probes in flight at once
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = load_or_default(args.config.as_deref(), MODULE_NAME);

    let cli = CliOverrides {
        root_folder: args.root_folder.clone(),
        bind: args.bind.clone(),
        log_level: args.log_level.clone(),
        concurrency: args.concurrency,
    };

    // RUST_LOG wins over the configured level
    let level = cli.log_level.clone().unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vnm_ingest={level},vnm_common={level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vnm-ingest {}", env!("CARGO_PKG_VERSION"));

    let settings = ServiceSettings::resolve(&cli, &toml_config).context("Invalid configuration")?;

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = vnm_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let stores = Stores::sqlite(pool);
    let events = EventBus::new(256);
    let shutdown = CancellationToken::new();

    let orchestrator = ProbeOrchestrator::new(
        stores.nodes.clone(),
        Arc::new(CommandProbe::from_config(&toml_config.probe)),
        Arc::new(CommandActivator::new(settings.activation_command.clone())),
        events.clone(),
        settings.probe,
    )
    .with_shutdown(shutdown.clone());
    let importer = Importer::new(stores.clone(), events.clone(), settings.import)
        .with_in_flight(orchestrator.in_flight());

    let rechecker = settings.recheck.map(|policy| {
        info!("Scheduled re-check enabled every {}s", policy.interval.as_secs());
        Rechecker::new(orchestrator.clone(), policy).spawn(shutdown.clone())
    });

    let state = AppState::new(stores, importer, orchestrator, events, settings.default_protocol);
    let app = vnm_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    info!("Listening on http://{}", settings.bind_address);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    // Covers the server exiting without a signal
    shutdown.cancel();
    if let Some(handle) = rechecker {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
