//! WebAssembly module for the raw material lot pipeline
//!
//! Provides client-side previews computed by the same code the server runs:
//! - Net weight preview while the operator types truck weights
//! - QC calculator (units, shelled weight, yield)
//! - Eager filtering of lots by fumigation transition

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    // Set up panic hook for better error messages in browser console
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Outcome of a preview: either a value or the operator-facing message
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Preview<T> {
    Ok { value: T },
    Invalid { field: Option<String>, message: String },
}

fn language(code: &str) -> Language {
    if code.eq_ignore_ascii_case("en") {
        Language::English
    } else {
        Language::Spanish
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Option<Decimal>, JsValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&raw.replace(',', "."))
        .map(Some)
        .map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", field, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Preview the net weight of a lot; inputs are the raw form strings
#[wasm_bindgen]
pub fn preview_net_weight(
    loaded_truck_weight: &str,
    empty_truck_weight: &str,
    packaging_tare: &str,
    packagings_quantity: i32,
    lang: &str,
) -> Result<String, JsValue> {
    let loaded = parse_decimal("loaded_truck_weight", loaded_truck_weight)?;
    let empty = parse_decimal("empty_truck_weight", empty_truck_weight)?;
    let tare = parse_decimal("packaging_tare", packaging_tare)?.unwrap_or(Decimal::ZERO);

    let preview = match compute_net_weight(loaded, empty, tare, packagings_quantity) {
        Ok(net) => Preview::Ok {
            value: net.to_string(),
        },
        Err(e) => Preview::Invalid {
            message: e.message_for(language(lang)).to_string(),
            field: e.field,
        },
    };
    to_json(&preview)
}

/// Preview QC metrics from a JSON object of the QC form fields
#[wasm_bindgen]
pub fn preview_qc_metrics(measurements_json: &str, lang: &str) -> Result<String, JsValue> {
    let measurements: QcMeasurements = serde_json::from_str(measurements_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid QC JSON: {}", e)))?;

    let preview = match compute_qc_metrics(&measurements) {
        Ok(metrics) => Preview::Ok { value: metrics },
        Err(e) => Preview::Invalid {
            message: e.message_for(language(lang)).to_string(),
            field: e.field,
        },
    };
    to_json(&preview)
}

/// Whether a lot in status `current_code` may move to `target_code`
#[wasm_bindgen]
pub fn can_transition_status(current_code: &str, target_code: &str) -> bool {
    match (
        FumigationStatus::from_code(current_code),
        FumigationStatus::from_code(target_code),
    ) {
        (Some(current), Some(target)) => current.can_transition_to(target),
        _ => false,
    }
}

/// Display label for a status code, empty for unknown codes
#[wasm_bindgen]
pub fn fumigation_status_label(code: &str) -> String {
    FumigationStatus::from_code(code)
        .map(|status| status.label().to_string())
        .unwrap_or_default()
}
