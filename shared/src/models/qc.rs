//! Quality control models
//!
//! A QC analysis takes 100 in-shell units, classifies them by size and
//! defect, shells them and weighs the kernels by color grade.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Units per size class (mm); the five classes must sum to 100
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SizeDistribution {
    pub lessthan30: i32,
    pub between3032: i32,
    pub between3234: i32,
    pub between3436: i32,
    pub morethan36: i32,
}

impl SizeDistribution {
    /// Sum of the five classes, saturating at `i32` bounds
    pub fn total(&self) -> i32 {
        self.fields()
            .iter()
            .fold(0i32, |acc, (_, count)| acc.saturating_add(*count))
    }

    pub fn fields(&self) -> [(&'static str, i32); 5] {
        [
            ("lessthan30", self.lessthan30),
            ("between3032", self.between3032),
            ("between3234", self.between3234),
            ("between3436", self.between3436),
            ("morethan36", self.morethan36),
        ]
    }
}

/// Defective units found in the sample
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DefectCounts {
    pub broken_walnut: i32,
    pub split_walnut: i32,
    pub light_stain: i32,
    pub serious_stain: i32,
    pub adhered_hull: i32,
    pub shrivel: i32,
    pub empty: i32,
    pub insect_damage: i32,
    pub inactive_fungus: i32,
    pub active_fungus: i32,
}

impl DefectCounts {
    pub fn fields(&self) -> [(&'static str, i32); 10] {
        [
            ("broken_walnut", self.broken_walnut),
            ("split_walnut", self.split_walnut),
            ("light_stain", self.light_stain),
            ("serious_stain", self.serious_stain),
            ("adhered_hull", self.adhered_hull),
            ("shrivel", self.shrivel),
            ("empty", self.empty),
            ("insect_damage", self.insect_damage),
            ("inactive_fungus", self.inactive_fungus),
            ("active_fungus", self.active_fungus),
        ]
    }

    pub fn total(&self) -> i32 {
        self.fields()
            .iter()
            .fold(0i32, |acc, (_, count)| acc.saturating_add(*count))
    }
}

/// Kernel weight (g) by color grade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ColorGrades {
    pub extra_light: Decimal,
    pub light: Decimal,
    pub light_amber: Decimal,
    pub amber: Decimal,
    /// Recorded but not part of the shelled weight
    pub yellow: Decimal,
}

impl ColorGrades {
    /// Extra light + light + light amber + amber, or `None` on overflow
    pub fn checked_shelled_weight(&self) -> Option<Decimal> {
        self.extra_light
            .checked_add(self.light)?
            .checked_add(self.light_amber)?
            .checked_add(self.amber)
    }

    pub fn fields(&self) -> [(&'static str, Decimal); 5] {
        [
            ("extra_light", self.extra_light),
            ("light", self.light),
            ("light_amber", self.light_amber),
            ("amber", self.amber),
            ("yellow", self.yellow),
        ]
    }
}

/// Raw QC measurements shared by lot and sample analyses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QcMeasurements {
    pub analyst: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub inshell_weight: Decimal,
    #[serde(flatten)]
    pub sizes: SizeDistribution,
    #[serde(flatten)]
    pub defects: DefectCounts,
    #[serde(flatten)]
    pub colors: ColorGrades,
}

/// Values derived from the measurements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QcMetrics {
    pub units: i32,
    pub shelled_weight: Decimal,
    pub yieldpercentage: Decimal,
}

/// Input for a lot-scoped QC analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotQcInput {
    pub lot_id: i64,
    #[serde(flatten)]
    pub measurements: QcMeasurements,
}

/// Input for a QC analysis of a grower's sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleQcInput {
    pub grower: String,
    pub brought_by: String,
    #[serde(flatten)]
    pub measurements: QcMeasurements,
}

/// Image evidence stored alongside a QC record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QcImages {
    pub inshell_image_path: Option<String>,
    pub shelled_image_path: Option<String>,
}

/// Immutable QC record of a lot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotQc {
    pub id: i64,
    pub lot_id: i64,
    #[serde(flatten)]
    pub measurements: QcMeasurements,
    #[serde(flatten)]
    pub metrics: QcMetrics,
    #[serde(flatten)]
    pub images: QcImages,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LotQc {
    pub fn mutation_token(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Immutable QC record of a sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleQc {
    pub id: i64,
    pub grower: String,
    pub brought_by: String,
    #[serde(flatten)]
    pub measurements: QcMeasurements,
    #[serde(flatten)]
    pub metrics: QcMetrics,
    #[serde(flatten)]
    pub images: QcImages,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SampleQc {
    pub fn mutation_token(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}
