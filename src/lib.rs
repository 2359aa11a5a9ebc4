pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::services::{AccessController, DedupEngine, ObjectStore, UserRateLimiter};
use crate::storage::StorageProvider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub engine: DedupEngine,
    pub rate_limiter: Option<UserRateLimiter>,
}

impl AppState {
    pub fn new(db: Database, config: Arc<Config>, storage: Arc<dyn StorageProvider>) -> Self {
        let engine = DedupEngine::new(
            db.clone(),
            ObjectStore::new(storage),
            AccessController::new(&config.access),
            config.upload.quota_bytes,
        );

        let rate_limiter = UserRateLimiter::new(&config.rate_limit);

        Self {
            db,
            config,
            engine,
            rate_limiter,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(state.config.upload.max_upload_bytes).unwrap_or(usize::MAX);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/public/shares/:link", get(handlers::share::get_public_share))
        .route(
            "/public/shares/:link/download",
            get(handlers::share::download_public_share),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Files
        .route("/files", get(handlers::file::list_files))
        .route("/files/upload", post(handlers::file::upload_file))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        // Admin routes
        .route("/admin/files", get(handlers::admin::list_files))
        .route("/admin/stats", get(handlers::admin::get_stats))
        // Share routes (Authenticated)
        .route(
            "/shares",
            get(handlers::share::list_my_shares).post(handlers::share::create_share),
        )
        .route("/shares/:id", delete(handlers::share::delete_share))
        // Outer layers run first: authenticate, then throttle per user
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
