//! sel-ingest - event ingestion service
//!
//! Accepts event submissions from producers, normalizes and deduplicates
//! them, queues doubtful ones for review, and publishes a change feed that
//! federation peers replicate from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sel_ingest::cache::{LookupCache, SqliteLookupCache, DEFAULT_TTL};
use sel_ingest::db::Store;
use sel_ingest::jobs::spawn_scheduler;
use sel_ingest::services::{Geocoder, NominatimGeocoder};
use sel_ingest::AppState;

/// Command-line arguments for sel-ingest
#[derive(Parser, Debug)]
#[command(name = "sel-ingest")]
#[command(about = "Event ingestion service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config file
    #[arg(short, long, env = "SEL_DATABASE")]
    database: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(short, long, env = "SEL_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = sel_common::config::load_config(args.config.as_deref(), "sel-ingest")
        .context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sel_ingest={0},sel_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting sel-ingest {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("SEL_GIT_COMMIT"),
        env!("SEL_BUILT_AT")
    );
    info!("Database: {}", config.database_path.display());
    info!("Public base URL: {}", config.base_url);

    let pool = sel_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let store = Store::new(pool, config.storage.max_lock_wait_ms);
    let state = AppState::new(store.clone(), &config);

    let geocoder: Option<Arc<dyn Geocoder>> = match &config.geocoding.nominatim_url {
        Some(url) => Some(Arc::new(
            NominatimGeocoder::new(url.clone()).context("Failed to build geocoder")?,
        )),
        None => {
            warn!("No geocoder configured; geocode_place jobs will fail until one is");
            None
        }
    };
    let cache: Arc<dyn LookupCache> = Arc::new(SqliteLookupCache::new(store, DEFAULT_TTL));

    let cancel = CancellationToken::new();
    let workers = Arc::new(state.worker_pool(&config, geocoder, cache)).spawn(cancel.clone());
    let scheduler = spawn_scheduler(state.jobs.clone(), &config.jobs, cancel.clone());
    info!(workers = workers.len(), "Background workers started");

    let app = sel_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Jobs are cancellable between attempts; give running ones a moment to finish
    cancel.cancel();
    let drain = async {
        for handle in workers {
            let _ = handle.await;
        }
        let _ = scheduler.await;
    };
    if tokio::time::timeout(Duration::from_secs(config.jobs.job_timeout_secs), drain)
        .await
        .is_err()
    {
        warn!("Workers did not stop in time; exiting anyway");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
