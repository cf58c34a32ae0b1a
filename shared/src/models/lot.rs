//! Reception, lot and weighing models

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fumigation::FumigationStatus;

/// A truck delivery event grouping one or more lots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reception {
    pub id: i64,
    pub waybill: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub truck_plate: String,
    pub trucker_name: String,
    pub observations: Option<String>,
    /// Cleared when the last lot is registered; a closed reception takes no new lots
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input for opening a reception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReception {
    pub waybill: i32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub truck_plate: String,
    pub trucker_name: String,
    pub observations: Option<String>,
}

/// Packaging type (bins, sacks...) with its tare weight in kg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packaging {
    pub id: i64,
    pub name: String,
    pub tare: Decimal,
    pub is_active: bool,
}

/// A uniquely numbered batch of raw material
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lot {
    pub id: i64,
    pub reception_id: i64,
    pub variety_id: i64,
    pub packaging_id: i64,
    /// Globally unique, immutable
    pub lot_number: i32,
    pub packagings_quantity: i32,
    /// Present and strictly positive once the lot has been weighed
    pub net_weight: Option<Decimal>,
    /// One-way latch, set when the lot-scoped QC record is created
    pub has_qc: bool,
    pub fumigation_status: FumigationStatus,
    pub on_warehouse: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Lot {
    /// Last-modified timestamp used to key derived artifacts
    pub fn mutation_token(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Zero-padded lot number as printed on labels (e.g. `007`)
    pub fn display_number(&self) -> String {
        format!("{:03}", self.lot_number)
    }
}

/// Input for registering a lot under a reception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLot {
    pub reception_id: i64,
    pub variety_id: i64,
    pub packaging_id: i64,
    pub packagings_quantity: i32,
    pub lot_number: i32,
}

/// Loaded and empty truck weights recorded for one lot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullTruckWeight {
    pub id: i64,
    pub lot_id: i64,
    pub loaded_truck_weight: Decimal,
    pub empty_truck_weight: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of the net-weight formula for a lot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetWeightComputation {
    pub net_weight: Decimal,
    pub packaging_tare: Decimal,
}
