//! Quality-control HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use shared::{LotQc, LotQcInput, QcImages, QcMeasurements, QcMetrics, SampleQc, SampleQcInput};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::handlers::{invalidate_lot_labels, pdf_attachment};
use crate::services::artifact_cache::{LOT_QC_REPORT, SAMPLE_QC_REPORT};
use crate::services::lot::LotService;
use crate::services::qc::QcService;
use crate::services::reports;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LotQcRequest {
    #[serde(flatten)]
    pub input: LotQcInput,
    #[validate(length(max = 255))]
    pub inshell_image_path: Option<String>,
    #[validate(length(max = 255))]
    pub shelled_image_path: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SampleQcRequest {
    #[serde(flatten)]
    pub input: SampleQcInput,
    #[validate(length(max = 255))]
    pub inshell_image_path: Option<String>,
    #[validate(length(max = 255))]
    pub shelled_image_path: Option<String>,
}

fn images(inshell: Option<String>, shelled: Option<String>) -> QcImages {
    let keep = |path: Option<String>| path.filter(|p| !p.trim().is_empty());
    QcImages {
        inshell_image_path: keep(inshell),
        shelled_image_path: keep(shelled),
    }
}

/// Derive QC metrics without persisting (calculator preview)
pub async fn validate_qc(Json(measurements): Json<QcMeasurements>) -> AppResult<Json<QcMetrics>> {
    Ok(Json(QcService::validate(&measurements)?))
}

/// Record the QC analysis of a lot
pub async fn create_lot_qc(
    State(state): State<AppState>,
    Json(request): Json<LotQcRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return AppError::from(e).into_response();
    }
    let service = QcService::new(state.ledger.clone());
    let images = images(request.inshell_image_path, request.shelled_image_path);

    match service.create_lot_qc(&request.input, &images).await {
        Ok(record) => {
            invalidate_lot_labels(&state, record.lot_id).await;
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// QC record of a lot
pub async fn get_lot_qc(
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Json<LotQc>> {
    let service = QcService::new(state.ledger.clone());
    Ok(Json(service.find_lot_qc(lot_id).await?))
}

/// Record the QC analysis of a grower sample
pub async fn create_sample_qc(
    State(state): State<AppState>,
    Json(request): Json<SampleQcRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return AppError::from(e).into_response();
    }
    let service = QcService::new(state.ledger.clone());
    let images = images(request.inshell_image_path, request.shelled_image_path);

    match service.create_sample_qc(&request.input, &images).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_sample_qc(
    State(state): State<AppState>,
    Path(sample_id): Path<i64>,
) -> AppResult<Json<SampleQc>> {
    let service = QcService::new(state.ledger.clone());
    Ok(Json(service.find_sample_qc(sample_id).await?))
}

/// QC report of a lot
pub async fn lot_qc_report_pdf(
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Response> {
    let lot = LotService::new(state.ledger.clone()).get_lot(lot_id).await?;
    let record = QcService::new(state.ledger.clone())
        .find_lot_qc(lot_id)
        .await?;

    let pdf = state
        .artifacts
        .get_or_render(
            LOT_QC_REPORT,
            &record.id.to_string(),
            record.mutation_token(),
            || async { reports::render_lot_qc_report(&lot, &record) },
        )
        .await?;

    Ok(pdf_attachment(
        format!("qc_lote_{}.pdf", lot.display_number()),
        pdf,
    ))
}

/// QC report of a grower sample
pub async fn sample_qc_report_pdf(
    State(state): State<AppState>,
    Path(sample_id): Path<i64>,
) -> AppResult<Response> {
    let record = QcService::new(state.ledger.clone())
        .find_sample_qc(sample_id)
        .await?;

    let pdf = state
        .artifacts
        .get_or_render(
            SAMPLE_QC_REPORT,
            &record.id.to_string(),
            record.mutation_token(),
            || async { reports::render_sample_qc_report(&record) },
        )
        .await?;

    Ok(pdf_attachment(format!("qc_muestra_{}.pdf", record.id), pdf))
}
