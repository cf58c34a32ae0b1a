//! Dashboard HTTP handlers

use axum::{extract::State, Json};
use shared::DashboardSummary;

use crate::error::AppResult;
use crate::services::dashboard::DashboardService;
use crate::AppState;

/// Today's intake, lots per fumigation status and stuck-lot alerts
pub async fn get_dashboard(State(state): State<AppState>) -> AppResult<Json<DashboardSummary>> {
    let service = DashboardService::new(state.ledger.clone(), state.config.dashboard);
    Ok(Json(service.summary().await?))
}
