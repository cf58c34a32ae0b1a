//! HTTP request handlers

pub mod dashboard;
pub mod fumigation;
pub mod health;
pub mod lot;
pub mod qc;

pub use dashboard::*;
pub use fumigation::*;
pub use health::*;
pub use lot::*;
pub use qc::*;

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

use crate::services::artifact_cache::LOT_LABELS;
use crate::AppState;

/// PDF download response
pub(crate) fn pdf_attachment(filename: String, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Drop cached label sheets of a lot after a committed write
///
/// The write already succeeded, so a failure here is only logged.
pub(crate) async fn invalidate_lot_labels(state: &AppState, lot_id: i64) {
    if let Err(e) = state
        .artifacts
        .invalidate(LOT_LABELS, &lot_id.to_string())
        .await
    {
        tracing::warn!(lot_id, error = %e, "Could not invalidate lot labels");
    }
}
