//! Fumigation HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared::{FumigationFilter, FumigationPhase, Lot, Pagination, ValidationError};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::fumigation::{
    AssignFumigationInput, CompleteFumigationInput, FumigationService, StartFumigationInput,
};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AssignFumigationRequest {
    #[validate(length(max = 50))]
    pub work_order: String,
    pub lot_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListFumigationsQuery {
    pub phase: Option<String>,
    #[validate(length(max = 50))]
    pub work_order: Option<String>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1))]
    pub per_page: Option<u32>,
}

fn check_document_path(field: &str, path: &Option<String>) -> AppResult<()> {
    if path.as_ref().is_some_and(|p| p.chars().count() > 255) {
        return Err(ValidationError::on_field(
            field,
            format!("The path of {} is too long.", field),
            format!("La ruta de {} es demasiado larga.", field),
        )
        .into());
    }
    Ok(())
}

/// Assign lots to a new work order
pub async fn assign_fumigation(
    State(state): State<AppState>,
    Json(request): Json<AssignFumigationRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return AppError::from(e).into_response();
    }
    let service = FumigationService::new(state.ledger.clone());
    let input = AssignFumigationInput {
        work_order: request.work_order,
        lot_ids: request.lot_ids,
    };

    match service.assign(&input).await {
        Ok(transition) => (StatusCode::CREATED, Json(transition)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Start a fumigation
pub async fn start_fumigation(
    State(state): State<AppState>,
    Path(fumigation_id): Path<i64>,
    Json(input): Json<StartFumigationInput>,
) -> impl IntoResponse {
    let checked = check_document_path("fumigation_sign_path", &input.documents.fumigation_sign_path)
        .and_then(|_| check_document_path("work_order_path", &input.documents.work_order_path));
    if let Err(e) = checked {
        return e.into_response();
    }
    let service = FumigationService::new(state.ledger.clone());

    match service.start(fumigation_id, &input).await {
        Ok(transition) => (StatusCode::OK, Json(transition)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Complete a fumigation
pub async fn complete_fumigation(
    State(state): State<AppState>,
    Path(fumigation_id): Path<i64>,
    Json(input): Json<CompleteFumigationInput>,
) -> impl IntoResponse {
    if let Err(e) = check_document_path("certificate_path", &input.certificate_path) {
        return e.into_response();
    }
    let service = FumigationService::new(state.ledger.clone());

    match service.complete(fumigation_id, &input).await {
        Ok(transition) => (StatusCode::OK, Json(transition)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a fumigation with its lots
pub async fn get_fumigation(
    State(state): State<AppState>,
    Path(fumigation_id): Path<i64>,
) -> impl IntoResponse {
    let service = FumigationService::new(state.ledger.clone());

    match service.get(fumigation_id).await {
        Ok(fumigation) => (StatusCode::OK, Json(fumigation)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// List fumigations, newest first
pub async fn list_fumigations(
    State(state): State<AppState>,
    Query(query): Query<ListFumigationsQuery>,
) -> impl IntoResponse {
    if let Err(e) = query.validate() {
        return AppError::from(e).into_response();
    }
    let phase = match query.phase.as_deref().filter(|p| !p.trim().is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<FumigationPhase>() {
            Ok(phase) => Some(phase),
            Err(e) => return AppError::from(e).into_response(),
        },
    };

    let limits = state.config.pagination;
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(limits.default_page_size),
    }
    .clamped(limits.max_page_size);
    let filter = FumigationFilter {
        phase,
        work_order: query.work_order.filter(|w| !w.trim().is_empty()),
    };

    let service = FumigationService::new(state.ledger.clone());
    match service.list(&filter, pagination).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Lots that can be assigned to a new work order
pub async fn list_assignable_lots(State(state): State<AppState>) -> AppResult<Json<Vec<Lot>>> {
    let service = FumigationService::new(state.ledger.clone());
    Ok(Json(service.assignable_lots().await?))
}
