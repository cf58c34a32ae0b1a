//! Operational dashboard models

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fumigation::FumigationStatus;

/// Alert raised for lots stuck in a pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardAlert {
    NoQc,
    MissingNetWeight,
    NoFumigation,
}

impl DashboardAlert {
    pub const ALL: [DashboardAlert; 3] = [
        DashboardAlert::NoQc,
        DashboardAlert::MissingNetWeight,
        DashboardAlert::NoFumigation,
    ];

    pub fn label(&self, hours: i64) -> String {
        match self {
            DashboardAlert::NoQc => format!("Lotes sin QC > {} horas", hours),
            DashboardAlert::MissingNetWeight => format!("Lotes sin peso neto > {} horas", hours),
            DashboardAlert::NoFumigation => format!("Lotes sin fumigación > {} horas", hours),
        }
    }
}

/// Time bounds for one dashboard query, all in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardWindow {
    pub today_start: DateTime<Utc>,
    pub today_end: DateTime<Utc>,
    pub no_qc_cutoff: DateTime<Utc>,
    pub missing_net_weight_cutoff: DateTime<Utc>,
    pub no_fumigation_cutoff: DateTime<Utc>,
}

/// Raw counts returned by storage for a window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardCounts {
    pub lots_received_today: i64,
    pub kilograms_received_today: Decimal,
    /// Lot count per status, in `FumigationStatus::ALL` order
    pub status_counts: [i64; 4],
    pub no_qc: i64,
    pub missing_net_weight: i64,
    pub no_fumigation: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodaySummary {
    pub lots_received: i64,
    pub kilograms_received: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: FumigationStatus,
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCount {
    pub alert: DashboardAlert,
    pub label: String,
    pub hours: i64,
    pub count: i64,
}

/// Dashboard payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub generated_at: DateTime<FixedOffset>,
    pub today: TodaySummary,
    pub fumigation_status: Vec<StatusCount>,
    pub alerts: Vec<AlertCount>,
}
