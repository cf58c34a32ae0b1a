//! Reception, lot and weighing HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use shared::{NewLot, NewReception};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::handlers::{invalidate_lot_labels, pdf_attachment};
use crate::services::artifact_cache::LOT_LABELS;
use crate::services::lot::{CreateLotInput, LotService, TruckWeightInput};
use crate::services::reports;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OpenReceptionRequest {
    #[validate(range(min = 1))]
    pub waybill: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[validate(length(max = 20))]
    pub truck_plate: String,
    #[validate(length(max = 100))]
    pub trucker_name: String,
    #[validate(length(max = 2000))]
    pub observations: Option<String>,
}

impl From<OpenReceptionRequest> for NewReception {
    fn from(request: OpenReceptionRequest) -> Self {
        NewReception {
            waybill: request.waybill,
            date: request.date,
            time: request.time,
            truck_plate: request.truck_plate,
            trucker_name: request.trucker_name,
            observations: request.observations.filter(|o| !o.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLotRequest {
    pub reception_id: i64,
    pub variety_id: i64,
    pub packaging_id: i64,
    /// One label is printed per unit
    #[validate(range(max = 5000))]
    pub packagings_quantity: i32,
    pub lot_number: i32,
    #[serde(default)]
    pub close_reception: bool,
}

impl From<CreateLotRequest> for CreateLotInput {
    fn from(request: CreateLotRequest) -> Self {
        CreateLotInput {
            lot: NewLot {
                reception_id: request.reception_id,
                variety_id: request.variety_id,
                packaging_id: request.packaging_id,
                packagings_quantity: request.packagings_quantity,
                lot_number: request.lot_number,
            },
            close_reception: request.close_reception,
        }
    }
}

/// Open a reception for an arriving truck
pub async fn open_reception(
    State(state): State<AppState>,
    Json(request): Json<OpenReceptionRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return AppError::from(e).into_response();
    }
    let service = LotService::new(state.ledger.clone());

    match service.open_reception(&request.into()).await {
        Ok(reception) => (StatusCode::CREATED, Json(reception)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Register a lot, optionally closing its reception
pub async fn create_lot(
    State(state): State<AppState>,
    Json(request): Json<CreateLotRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return AppError::from(e).into_response();
    }
    let service = LotService::new(state.ledger.clone());

    match service.create_lot(&request.into()).await {
        Ok(lot) => (StatusCode::CREATED, Json(lot)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a lot
pub async fn get_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> impl IntoResponse {
    let service = LotService::new(state.ledger.clone());

    match service.get_lot(lot_id).await {
        Ok(lot) => (StatusCode::OK, Json(lot)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Register the truck weights of a lot
pub async fn register_truck_weight(
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
    Json(input): Json<TruckWeightInput>,
) -> impl IntoResponse {
    let service = LotService::new(state.ledger.clone());

    match service.register_full_truck_weight(lot_id, &input).await {
        Ok(registration) => {
            invalidate_lot_labels(&state, lot_id).await;
            (StatusCode::OK, Json(registration)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Label sheet of a lot, served from the artifact cache when current
pub async fn lot_labels_pdf(
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Response> {
    let service = LotService::new(state.ledger.clone());
    let (lot, reception, packaging) = service.get_lot_details(lot_id).await?;

    let pdf = state
        .artifacts
        .get_or_render(
            LOT_LABELS,
            &lot.id.to_string(),
            lot.mutation_token(),
            || async { reports::render_lot_labels(&lot, &reception, &packaging) },
        )
        .await?;

    Ok(pdf_attachment(
        format!("lot_labels_{}.pdf", lot.display_number()),
        pdf,
    ))
}
