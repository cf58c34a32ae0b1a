//! Route definitions for the lot pipeline API

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/receptions", post(handlers::open_reception))
        .nest("/lots", lot_routes())
        .nest("/fumigations", fumigation_routes())
        .nest("/qc", qc_routes())
        .route("/dashboard", get(handlers::get_dashboard))
}

/// Lot registration, weighing and labels
fn lot_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_lot))
        .route("/:lot_id", get(handlers::get_lot))
        .route("/:lot_id/weight", put(handlers::register_truck_weight))
        .route("/:lot_id/labels.pdf", get(handlers::lot_labels_pdf))
        .route("/:lot_id/qc", get(handlers::get_lot_qc))
        .route("/:lot_id/qc/report.pdf", get(handlers::lot_qc_report_pdf))
}

/// Fumigation work orders
fn fumigation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_fumigations).post(handlers::assign_fumigation),
        )
        .route("/assignable-lots", get(handlers::list_assignable_lots))
        .route("/:fumigation_id", get(handlers::get_fumigation))
        .route("/:fumigation_id/start", post(handlers::start_fumigation))
        .route("/:fumigation_id/complete", post(handlers::complete_fumigation))
}

/// Quality control
fn qc_routes() -> Router<AppState> {
    Router::new()
        .route("/validate", post(handlers::validate_qc))
        .route("/lots", post(handlers::create_lot_qc))
        .route("/samples", post(handlers::create_sample_qc))
        .route("/samples/:sample_id", get(handlers::get_sample_qc))
        .route(
            "/samples/:sample_id/report.pdf",
            get(handlers::sample_qc_report_pdf),
        )
}
