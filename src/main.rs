use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filevault::config::Config;
use filevault::db::Database;
use filevault::storage::{LocalStorage, StorageProvider};
use filevault::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filevault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FileVault...");

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path, config.database.max_connections).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Initialize blob storage
    let local = LocalStorage::new(&config.storage.blob_path);
    if !local.staging_renames().await? {
        tracing::warn!(
            "Staging directory {:?} is not on the blob filesystem; new uploads will be copied",
            local.staging_dir()
        );
    }
    let storage: Arc<dyn StorageProvider> = Arc::new(local);
    tracing::info!(
        "Blob storage ({}) at {}",
        storage.storage_type(),
        config.storage.blob_path
    );

    let state = AppState::new(db.clone(), config.clone(), storage);

    // Reconcile blobs left behind by an interrupted run before taking traffic
    state.engine.objects().sweep_orphans(&db).await?;

    if let Some(limiter) = state.rate_limiter.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                limiter.prune();
                tracing::debug!(users = limiter.tracked_users(), "Pruned rate limiter buckets");
            }
        });
    }

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
