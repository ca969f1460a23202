//! Donation Gateway Worker
//!
//! Reconciles donations stranded in gateway limbo queues by asking each
//! gateway what became of them.

mod config;
mod shutdown;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use dgw_core::config::ConfigStore;
use dgw_core::framework::DatabaseProcessor;
use dgw_core::gateway::GatewayAdapter;
use dgw_core::processors::OrphanSweeper;
use dgw_core::queue::{DonationQueue, PgQueueBackend, PgStatusLedger, QueueBackend, StatusLedger};
use dgw_core::reconcile::Finalizer;
use dgw_core::utils::unix_now;
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Donation Gateway Worker - orphaned transaction reconciliation
#[derive(Parser, Debug)]
#[command(name = "dgw-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./dgw-config.toml")]
    config: PathBuf,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Run one sweep pass for every gateway, then exit
    #[arg(long, default_value = "false")]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting dgw-worker v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let db = DatabaseProcessor::new(db_pool.clone());
    let backend: Arc<dyn QueueBackend> = Arc::new(PgQueueBackend::new(db.clone()));
    let ledger: Arc<dyn StatusLedger> = Arc::new(PgStatusLedger::new(db));
    let queue = DonationQueue::from_config(backend, &loaded_config.donation);
    let finalizer = Finalizer::new(queue.clone(), ledger);

    let gateways: Vec<Arc<dyn GatewayAdapter>> = loaded_config
        .gateways
        .iter()
        .map(|settings| settings.build())
        .collect();
    if gateways.is_empty() {
        tracing::warn!("No gateways configured, nothing to reconcile");
    }

    let config_store = ConfigStore::new(loaded_config.donation);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweepers = gateways.into_iter().map(|gateway| {
        OrphanSweeper::new(
            gateway,
            queue.clone(),
            finalizer.clone(),
            config_store.clone(),
            shutdown_rx.clone(),
        )
    });

    if args.once {
        for sweeper in sweepers {
            let report = sweeper.sweep_once(unix_now()).await;
            tracing::info!(
                examined = report.examined,
                finalized = report.finalized,
                moved_to_pending = report.moved_to_pending,
                already_final = report.already_final,
                republished = report.republished,
                errors = report.errors,
                "Single sweep pass complete"
            );
        }
        db_pool.close().await;
        return Ok(());
    }

    let handles: Vec<_> = sweepers
        .map(|sweeper| tokio::spawn(sweeper.run()))
        .collect();

    let reload_notify = spawn_config_reload_handler(config_store, config_loader);

    shutdown_signal().await;

    if shutdown_tx.send(true).is_err() {
        tracing::debug!("No sweepers left to notify");
    }
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Sweeper task failed: {}", e);
        }
    }

    reload_notify.notify_one();

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Worker shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
