//! Raw material lot pipeline - backend library
//!
//! Receptions, lots and truck weighing, quality control, fumigation work
//! orders and the operational dashboard, on top of a transactional ledger.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};

use ledger::Ledger;
use services::ArtifactCache;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub artifacts: ArtifactCache,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, config: Config) -> Self {
        Self {
            ledger,
            artifacts: ArtifactCache::new(&config.artifacts.cache_dir),
            config: Arc::new(config),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Lotline raw material API v1"
}
