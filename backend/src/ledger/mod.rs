//! Persistence abstraction for the lot pipeline
//!
//! A [`Ledger`] hands out explicit transaction handles. Every repository
//! operation runs on a [`LedgerTx`], so services never touch ambient session
//! state and compose by passing the handle down. Row locks are exclusive and
//! held until the transaction commits or rolls back; dropping an unfinished
//! transaction rolls it back.

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::{
    DashboardCounts, DashboardWindow, FullTruckWeight, Fumigation, FumigationFilter,
    FumigationStatus, FumigationWithLots, Lot, LotQc, LotQcInput, NewLot, NewReception,
    Packaging, Pagination, QcImages, QcMetrics, Reception, SampleQc, SampleQcInput,
};

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Unique-key names reported by [`AppError::UniqueViolation`]
pub const LOT_NUMBER_KEY: &str = "lots_lot_number_key";
pub const WORK_ORDER_KEY: &str = "fumigations_work_order_key";
pub const LOT_QC_KEY: &str = "lots_qc_lot_id_key";
pub const FUMIGATION_MEMBERSHIP_KEY: &str = "fumigation_lots_lot_id_key";

/// Marker for a nested scope inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Savepoint(pub(crate) u32);

impl Savepoint {
    pub(crate) fn name(&self) -> String {
        format!("sp_{}", self.0)
    }
}

/// Source of transactions
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;
}

/// One open transaction
///
/// `commit` and `rollback` finish the transaction; any call after that fails
/// with `AppError::Internal`.
#[async_trait]
pub trait LedgerTx: Send {
    // Scope control
    async fn savepoint(&mut self) -> AppResult<Savepoint>;
    async fn release_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()>;
    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()>;
    async fn commit(&mut self) -> AppResult<()>;
    async fn rollback(&mut self) -> AppResult<()>;

    // Lots
    /// Exclusive locks on the given lots, taken in ascending id order.
    /// Ids that do not resolve are omitted from the result.
    async fn lock_lots(&mut self, ids: &[i64]) -> AppResult<Vec<Lot>>;
    async fn find_lot(&mut self, id: i64) -> AppResult<Option<Lot>>;
    async fn find_lot_by_number(&mut self, lot_number: i32) -> AppResult<Option<Lot>>;
    async fn insert_lot(&mut self, new_lot: &NewLot) -> AppResult<Lot>;
    async fn save_lot(&mut self, lot: &Lot) -> AppResult<Lot>;
    /// Lots in any of the given statuses, ordered by lot number
    async fn list_lots_by_status(&mut self, statuses: &[FumigationStatus]) -> AppResult<Vec<Lot>>;

    // Receptions and reference data
    async fn insert_reception(&mut self, new_reception: &NewReception) -> AppResult<Reception>;
    async fn find_reception(&mut self, id: i64) -> AppResult<Option<Reception>>;
    async fn lock_reception(&mut self, id: i64) -> AppResult<Option<Reception>>;
    async fn save_reception(&mut self, reception: &Reception) -> AppResult<Reception>;
    async fn find_packaging(&mut self, id: i64) -> AppResult<Option<Packaging>>;

    // Weighing
    async fn find_truck_weight(&mut self, lot_id: i64) -> AppResult<Option<FullTruckWeight>>;
    /// Upsert of the one weight record of a lot
    async fn save_truck_weight(
        &mut self,
        lot_id: i64,
        loaded_truck_weight: Decimal,
        empty_truck_weight: Decimal,
    ) -> AppResult<FullTruckWeight>;

    // Fumigations
    async fn find_fumigation_by_work_order(
        &mut self,
        work_order: &str,
    ) -> AppResult<Option<Fumigation>>;
    async fn find_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>>;
    async fn lock_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>>;
    /// Creates the fumigation row and its fixed membership
    async fn insert_fumigation(&mut self, work_order: &str, lot_ids: &[i64])
        -> AppResult<Fumigation>;
    async fn save_fumigation(&mut self, fumigation: &Fumigation) -> AppResult<Fumigation>;
    /// Member lot ids in ascending order
    async fn fumigation_lot_ids(&mut self, fumigation_id: i64) -> AppResult<Vec<i64>>;
    /// Page of fumigations, newest first, with the total number of matches
    async fn list_fumigations(
        &mut self,
        filter: &FumigationFilter,
        pagination: Pagination,
    ) -> AppResult<(Vec<FumigationWithLots>, u64)>;

    // Quality control
    async fn insert_lot_qc(
        &mut self,
        input: &LotQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<LotQc>;
    async fn find_lot_qc(&mut self, lot_id: i64) -> AppResult<Option<LotQc>>;
    async fn find_sample_qc(&mut self, id: i64) -> AppResult<Option<SampleQc>>;
    async fn insert_sample_qc(
        &mut self,
        input: &SampleQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<SampleQc>;

    // Dashboard
    async fn dashboard_counts(&mut self, window: &DashboardWindow) -> AppResult<DashboardCounts>;
}

/// Commit on success, roll back on failure
///
/// A failed rollback is logged and never masks the original error.
pub async fn settle<T>(mut tx: Box<dyn LedgerTx>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(error = %rollback_error, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Release the savepoint on success, roll back to it on failure
pub async fn settle_savepoint<T>(
    tx: &mut dyn LedgerTx,
    savepoint: Savepoint,
    result: AppResult<T>,
) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.release_savepoint(savepoint).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback_to_savepoint(savepoint).await {
                tracing::warn!(
                    error = %rollback_error,
                    savepoint = %savepoint.name(),
                    "Rollback to savepoint failed"
                );
            }
            Err(e)
        }
    }
}

pub(crate) fn finished() -> AppError {
    AppError::Internal("transaction already finished".to_string())
}
