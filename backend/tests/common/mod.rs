//! Shared fixtures for the backend integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use lotline_backend::ledger::MemoryLedger;
use lotline_backend::services::fumigation::{
    AssignFumigationInput, CompleteFumigationInput, StartFumigationInput,
};
use lotline_backend::services::lot::{CreateLotInput, LotService};
use lotline_backend::services::FumigationService;
use rust_decimal::Decimal;
use shared::{
    ColorGrades, DefectCounts, Lot, NewLot, NewReception, Packaging, QcMeasurements, Reception,
    SizeDistribution, StartDocuments,
};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 19).unwrap()
}

pub fn time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 30, 0).unwrap()
}

pub struct Fixture {
    pub ledger: Arc<MemoryLedger>,
    pub packaging: Packaging,
    pub lots: LotService,
    pub fumigations: FumigationService,
}

impl Fixture {
    /// Fresh ledger with one 2.5 kg packaging type
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        let ledger = Arc::new(MemoryLedger::new(lock_timeout));
        let packaging = ledger.insert_packaging("Saco 50 kg", dec("2.5")).unwrap();
        Self {
            lots: LotService::new(ledger.clone()),
            fumigations: FumigationService::new(ledger.clone()),
            ledger,
            packaging,
        }
    }

    pub async fn reception(&self, waybill: i32) -> Reception {
        self.lots
            .open_reception(&NewReception {
                waybill,
                date: date(),
                time: time(),
                truck_plate: "AB-1234".to_string(),
                trucker_name: "Juan Pérez".to_string(),
                observations: None,
            })
            .await
            .unwrap()
    }

    pub fn new_lot(&self, reception_id: i64, lot_number: i32, close_reception: bool) -> CreateLotInput {
        CreateLotInput {
            lot: NewLot {
                reception_id,
                variety_id: 1,
                packaging_id: self.packaging.id,
                packagings_quantity: 10,
                lot_number,
            },
            close_reception,
        }
    }

    /// Lots numbered `numbers` under one fresh reception
    pub async fn lots(&self, numbers: &[i32]) -> Vec<Lot> {
        let reception = self.reception(100 + numbers.first().copied().unwrap_or(0)).await;
        let mut lots = Vec::new();
        for number in numbers {
            lots.push(
                self.lots
                    .create_lot(&self.new_lot(reception.id, *number, false))
                    .await
                    .unwrap(),
            );
        }
        lots
    }

    pub async fn lot_status(&self, lot_id: i64) -> shared::FumigationStatus {
        self.lots.get_lot(lot_id).await.unwrap().fumigation_status
    }
}

pub fn assign_input(work_order: &str, lot_ids: &[i64]) -> AssignFumigationInput {
    AssignFumigationInput {
        work_order: work_order.to_string(),
        lot_ids: lot_ids.to_vec(),
    }
}

pub fn start_input() -> StartFumigationInput {
    StartFumigationInput {
        real_start_date: date(),
        real_start_time: time(),
        documents: StartDocuments {
            fumigation_sign_path: Some("uploads/sign_1.pdf".to_string()),
            work_order_path: None,
        },
    }
}

pub fn complete_input() -> CompleteFumigationInput {
    CompleteFumigationInput {
        real_end_date: date(),
        real_end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        certificate_path: Some("uploads/certificate_1.pdf".to_string()),
    }
}

/// Sizes 20 x 5, grades 10/10/15/15 over 100 g in-shell
pub fn measurements() -> QcMeasurements {
    QcMeasurements {
        analyst: "Ana Rojas".to_string(),
        date: date(),
        time: time(),
        inshell_weight: dec("100"),
        sizes: SizeDistribution {
            lessthan30: 20,
            between3032: 20,
            between3234: 20,
            between3436: 20,
            morethan36: 20,
        },
        defects: DefectCounts::default(),
        colors: ColorGrades {
            extra_light: dec("10"),
            light: dec("10"),
            light_amber: dec("15"),
            amber: dec("15"),
            yellow: Decimal::ZERO,
        },
    }
}
