mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::models::settings::SqliteSettings;
use crate::services::indexer_sync::start_indexer_sync;
use crate::state::AppState;
use backup_engine::{AesGcmProtector, BackupService};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    backup_engine::utils::logger::init(&config.log_level)?;
    tracing::info!(
        "Starting dashboard server v{} on port {}",
        config.app_version,
        config.port
    );

    let maintenance = config.maintenance()?;
    std::fs::create_dir_all(&maintenance.data_dir)?;
    std::fs::create_dir_all(&maintenance.backup_dir)?;
    std::fs::create_dir_all(&config.keys_dir)?;

    // A restore from the previous run is complete once we get here.
    backup_engine::RestartGate::new(&maintenance.data_dir).clear_on_startup()?;

    // Initialize database
    let pool = create_pool(&maintenance.database_path)?;
    migrate(&pool, &maintenance.data_dir, &config.keys_dir)?;

    let protector = Arc::new(AesGcmProtector::load_or_create(&config.keys_dir)?);
    let settings = Arc::new(SqliteSettings::new(pool.clone()));
    let cancel = CancellationToken::new();
    let backups = Arc::new(BackupService::new(maintenance, protector, settings).with_shutdown(cancel.clone()));

    // Build application state
    let state = Arc::new(AppState::new(pool, config.clone(), backups));

    // Start background sync
    start_indexer_sync(state.clone(), cancel.clone());

    // Build router
    let app = routes::create_router(state.clone());

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Cleanup
    tracing::info!("Shutting down...");
    cancel.cancel();

    // Pool connections close when the state drops.
    drop(state);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
