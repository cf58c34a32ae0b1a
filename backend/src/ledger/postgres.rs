//! PostgreSQL ledger
//!
//! Runtime queries with `query_as`/`bind`. Each transaction sets a local
//! `lock_timeout`, so a blocked `FOR UPDATE` fails fast with SQLSTATE 55P03,
//! which is reported as a retryable `AppError::LockTimeout`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use shared::{
    ColorGrades, DashboardCounts, DashboardWindow, DefectCounts, FullTruckWeight, Fumigation,
    FumigationFilter, FumigationPhase, FumigationStatus, FumigationWithLots, Lot, LotQc,
    LotQcInput, NewLot, NewReception, Packaging, Pagination, QcImages, QcMeasurements,
    QcMetrics, Reception, SampleQc, SampleQcInput, SizeDistribution,
};
use sqlx::postgres::{PgArguments, PgConnection, PgPool};
use sqlx::query::QueryAs;
use sqlx::{FromRow, Postgres, Transaction};

use super::{finished, Ledger, LedgerTx, Savepoint};
use crate::error::{AppError, AppResult};

/// Classify driver errors the services care about
pub fn db_error(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            // lock_not_available, query_canceled, deadlock_detected, serialization_failure
            Some("55P03") | Some("57014") | Some("40P01") | Some("40001") => {
                return AppError::LockTimeout(db.message().to_string());
            }
            Some("23505") => {
                return AppError::UniqueViolation(db.constraint().unwrap_or("unique").to_string());
            }
            _ => {}
        }
    }
    AppError::DatabaseError(e)
}

/// Ledger backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        // SET does not take bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        Ok(Box::new(PgLedgerTx {
            tx: Some(tx),
            next_savepoint: 0,
        }))
    }
}

/// Transaction over a [`PgLedger`]; dropping it rolls back
pub struct PgLedgerTx {
    tx: Option<Transaction<'static, Postgres>>,
    next_savepoint: u32,
}

impl PgLedgerTx {
    fn conn(&mut self) -> AppResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or_else(finished)
    }

    async fn execute(&mut self, sql: &str) -> AppResult<()> {
        sqlx::query(sql)
            .execute(self.conn()?)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

const LOT_COLUMNS: &str = "id, reception_id, variety_id, packaging_id, lot_number, \
    packagings_quantity, net_weight, has_qc, fumigation_status, on_warehouse, \
    created_at, updated_at";

const RECEPTION_COLUMNS: &str = "id, waybill, \"date\", \"time\", truck_plate, trucker_name, \
    observations, is_open, created_at, updated_at";

const TRUCK_WEIGHT_COLUMNS: &str =
    "id, lot_id, loaded_truck_weight, empty_truck_weight, created_at, updated_at";

const FUMIGATION_COLUMNS: &str = "id, work_order, real_start_date, real_start_time, \
    real_end_date, real_end_time, fumigation_sign_path, work_order_path, certificate_path, \
    created_at, updated_at";

/// Shared by `lots_qc` and `samples_qc`, in bind order
const QC_COLUMNS: &str = "analyst, \"date\", \"time\", inshell_weight, \
    lessthan30, between3032, between3234, between3436, morethan36, \
    broken_walnut, split_walnut, light_stain, serious_stain, adhered_hull, shrivel, empty, \
    insect_damage, inactive_fungus, active_fungus, \
    extra_light, light, light_amber, amber, yellow, \
    units, shelled_weight, yieldpercentage, inshell_image_path, shelled_image_path";
const QC_COLUMN_COUNT: usize = 29;

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(FromRow)]
struct LotRow {
    id: i64,
    reception_id: i64,
    variety_id: i64,
    packaging_id: i64,
    lot_number: i32,
    packagings_quantity: i32,
    net_weight: Option<Decimal>,
    has_qc: bool,
    fumigation_status: String,
    on_warehouse: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<LotRow> for Lot {
    type Error = AppError;

    fn try_from(row: LotRow) -> Result<Self, Self::Error> {
        let fumigation_status =
            FumigationStatus::from_code(&row.fumigation_status).ok_or_else(|| {
                AppError::Internal(format!(
                    "lot {} has unknown fumigation status {:?}",
                    row.id, row.fumigation_status
                ))
            })?;
        Ok(Lot {
            id: row.id,
            reception_id: row.reception_id,
            variety_id: row.variety_id,
            packaging_id: row.packaging_id,
            lot_number: row.lot_number,
            packagings_quantity: row.packagings_quantity,
            net_weight: row.net_weight,
            has_qc: row.has_qc,
            fumigation_status,
            on_warehouse: row.on_warehouse,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn lots_from_rows(rows: Vec<LotRow>) -> AppResult<Vec<Lot>> {
    rows.into_iter().map(Lot::try_from).collect()
}

#[derive(FromRow)]
struct ReceptionRow {
    id: i64,
    waybill: i32,
    date: NaiveDate,
    time: NaiveTime,
    truck_plate: String,
    trucker_name: String,
    observations: Option<String>,
    is_open: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<ReceptionRow> for Reception {
    fn from(row: ReceptionRow) -> Self {
        Reception {
            id: row.id,
            waybill: row.waybill,
            date: row.date,
            time: row.time,
            truck_plate: row.truck_plate,
            trucker_name: row.trucker_name,
            observations: row.observations,
            is_open: row.is_open,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PackagingRow {
    id: i64,
    name: String,
    tare: Decimal,
    is_active: bool,
}

#[derive(FromRow)]
struct TruckWeightRow {
    id: i64,
    lot_id: i64,
    loaded_truck_weight: Decimal,
    empty_truck_weight: Decimal,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<TruckWeightRow> for FullTruckWeight {
    fn from(row: TruckWeightRow) -> Self {
        FullTruckWeight {
            id: row.id,
            lot_id: row.lot_id,
            loaded_truck_weight: row.loaded_truck_weight,
            empty_truck_weight: row.empty_truck_weight,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct FumigationRow {
    id: i64,
    work_order: String,
    real_start_date: Option<NaiveDate>,
    real_start_time: Option<NaiveTime>,
    real_end_date: Option<NaiveDate>,
    real_end_time: Option<NaiveTime>,
    fumigation_sign_path: Option<String>,
    work_order_path: Option<String>,
    certificate_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<FumigationRow> for Fumigation {
    fn from(row: FumigationRow) -> Self {
        Fumigation {
            id: row.id,
            work_order: row.work_order,
            real_start_date: row.real_start_date,
            real_start_time: row.real_start_time,
            real_end_date: row.real_end_date,
            real_end_time: row.real_end_time,
            fumigation_sign_path: row.fumigation_sign_path,
            work_order_path: row.work_order_path,
            certificate_path: row.certificate_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct QcRow {
    analyst: String,
    date: NaiveDate,
    time: NaiveTime,
    inshell_weight: Decimal,
    lessthan30: i32,
    between3032: i32,
    between3234: i32,
    between3436: i32,
    morethan36: i32,
    broken_walnut: i32,
    split_walnut: i32,
    light_stain: i32,
    serious_stain: i32,
    adhered_hull: i32,
    shrivel: i32,
    empty: i32,
    insect_damage: i32,
    inactive_fungus: i32,
    active_fungus: i32,
    extra_light: Decimal,
    light: Decimal,
    light_amber: Decimal,
    amber: Decimal,
    yellow: Decimal,
    units: i32,
    shelled_weight: Decimal,
    yieldpercentage: Decimal,
    inshell_image_path: Option<String>,
    shelled_image_path: Option<String>,
}

impl QcRow {
    fn into_parts(self) -> (QcMeasurements, QcMetrics, QcImages) {
        let measurements = QcMeasurements {
            analyst: self.analyst,
            date: self.date,
            time: self.time,
            inshell_weight: self.inshell_weight,
            sizes: SizeDistribution {
                lessthan30: self.lessthan30,
                between3032: self.between3032,
                between3234: self.between3234,
                between3436: self.between3436,
                morethan36: self.morethan36,
            },
            defects: DefectCounts {
                broken_walnut: self.broken_walnut,
                split_walnut: self.split_walnut,
                light_stain: self.light_stain,
                serious_stain: self.serious_stain,
                adhered_hull: self.adhered_hull,
                shrivel: self.shrivel,
                empty: self.empty,
                insect_damage: self.insect_damage,
                inactive_fungus: self.inactive_fungus,
                active_fungus: self.active_fungus,
            },
            colors: ColorGrades {
                extra_light: self.extra_light,
                light: self.light,
                light_amber: self.light_amber,
                amber: self.amber,
                yellow: self.yellow,
            },
        };
        let metrics = QcMetrics {
            units: self.units,
            shelled_weight: self.shelled_weight,
            yieldpercentage: self.yieldpercentage,
        };
        let images = QcImages {
            inshell_image_path: self.inshell_image_path,
            shelled_image_path: self.shelled_image_path,
        };
        (measurements, metrics, images)
    }
}

#[derive(FromRow)]
struct LotQcRow {
    id: i64,
    lot_id: i64,
    #[sqlx(flatten)]
    qc: QcRow,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<LotQcRow> for LotQc {
    fn from(row: LotQcRow) -> Self {
        let (measurements, metrics, images) = row.qc.into_parts();
        LotQc {
            id: row.id,
            lot_id: row.lot_id,
            measurements,
            metrics,
            images,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct SampleQcRow {
    id: i64,
    grower: String,
    brought_by: String,
    #[sqlx(flatten)]
    qc: QcRow,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<SampleQcRow> for SampleQc {
    fn from(row: SampleQcRow) -> Self {
        let (measurements, metrics, images) = row.qc.into_parts();
        SampleQc {
            id: row.id,
            grower: row.grower,
            brought_by: row.brought_by,
            measurements,
            metrics,
            images,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Binds the QC columns in `QC_COLUMNS` order
fn bind_qc<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    m: &'q QcMeasurements,
    metrics: &'q QcMetrics,
    images: &'q QcImages,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    query
        .bind(&m.analyst)
        .bind(m.date)
        .bind(m.time)
        .bind(m.inshell_weight)
        .bind(m.sizes.lessthan30)
        .bind(m.sizes.between3032)
        .bind(m.sizes.between3234)
        .bind(m.sizes.between3436)
        .bind(m.sizes.morethan36)
        .bind(m.defects.broken_walnut)
        .bind(m.defects.split_walnut)
        .bind(m.defects.light_stain)
        .bind(m.defects.serious_stain)
        .bind(m.defects.adhered_hull)
        .bind(m.defects.shrivel)
        .bind(m.defects.empty)
        .bind(m.defects.insect_damage)
        .bind(m.defects.inactive_fungus)
        .bind(m.defects.active_fungus)
        .bind(m.colors.extra_light)
        .bind(m.colors.light)
        .bind(m.colors.light_amber)
        .bind(m.colors.amber)
        .bind(m.colors.yellow)
        .bind(metrics.units)
        .bind(metrics.shelled_weight)
        .bind(metrics.yieldpercentage)
        .bind(&images.inshell_image_path)
        .bind(&images.shelled_image_path)
}

fn phase_key(phase: FumigationPhase) -> &'static str {
    match phase {
        FumigationPhase::Assigned => "assigned",
        FumigationPhase::Started => "started",
        FumigationPhase::Completed => "completed",
    }
}

/// `ILIKE` pattern matching `needle` literally anywhere
fn contains_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Fumigations with their derived phase
const PHASED_FUMIGATIONS: &str = r#"
    WITH phased AS (
        SELECT f.*,
            CASE
                WHEN f.real_end_date IS NOT NULL THEN 'completed'
                WHEN EXISTS (
                    SELECT 1 FROM fumigation_lots fl JOIN lots l ON l.id = fl.lot_id
                    WHERE fl.fumigation_id = f.id AND l.fumigation_status = '3'
                ) THEN 'started'
                WHEN EXISTS (
                    SELECT 1 FROM fumigation_lots fl JOIN lots l ON l.id = fl.lot_id
                    WHERE fl.fumigation_id = f.id AND l.fumigation_status = '2'
                ) THEN 'assigned'
            END AS phase
        FROM fumigations f
    )
"#;

const PHASED_FILTER: &str = r#"
    WHERE ($1::TEXT IS NULL OR work_order ILIKE $1)
      AND ($2::TEXT IS NULL OR phase = $2)
"#;

#[derive(FromRow)]
struct DashboardRow {
    lots_received_today: i64,
    kilograms_received_today: Decimal,
    no_qc: i64,
    missing_net_weight: i64,
    no_fumigation: i64,
}

// ============================================================================
// Ledger operations
// ============================================================================

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn savepoint(&mut self) -> AppResult<Savepoint> {
        self.next_savepoint += 1;
        let savepoint = Savepoint(self.next_savepoint);
        self.execute(&format!("SAVEPOINT {}", savepoint.name()))
            .await?;
        Ok(savepoint)
    }

    async fn release_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", savepoint.name()))
            .await
    }

    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name()))
            .await
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.commit().await.map_err(db_error)
    }

    async fn rollback(&mut self) -> AppResult<()> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(db_error)
    }

    async fn lock_lots(&mut self, ids: &[i64]) -> AppResult<Vec<Lot>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {} FROM lots WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            LOT_COLUMNS
        ))
        .bind(ordered)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        lots_from_rows(rows)
    }

    async fn find_lot(&mut self, id: i64) -> AppResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {} FROM lots WHERE id = $1",
            LOT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        row.map(Lot::try_from).transpose()
    }

    async fn find_lot_by_number(&mut self, lot_number: i32) -> AppResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {} FROM lots WHERE lot_number = $1",
            LOT_COLUMNS
        ))
        .bind(lot_number)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        row.map(Lot::try_from).transpose()
    }

    async fn insert_lot(&mut self, new_lot: &NewLot) -> AppResult<Lot> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            INSERT INTO lots (reception_id, variety_id, packaging_id, lot_number,
                              packagings_quantity, fumigation_status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            LOT_COLUMNS
        ))
        .bind(new_lot.reception_id)
        .bind(new_lot.variety_id)
        .bind(new_lot.packaging_id)
        .bind(new_lot.lot_number)
        .bind(new_lot.packagings_quantity)
        .bind(FumigationStatus::Available.code())
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        Lot::try_from(row)
    }

    async fn save_lot(&mut self, lot: &Lot) -> AppResult<Lot> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            UPDATE lots
            SET packagings_quantity = $2, net_weight = $3, has_qc = $4,
                fumigation_status = $5, on_warehouse = $6, updated_at = clock_timestamp()
            WHERE id = $1
            RETURNING {}
            "#,
            LOT_COLUMNS
        ))
        .bind(lot.id)
        .bind(lot.packagings_quantity)
        .bind(lot.net_weight)
        .bind(lot.has_qc)
        .bind(lot.fumigation_status.code())
        .bind(lot.on_warehouse)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::NotFound(format!("Lot {}", lot.id)))?;

        Lot::try_from(row)
    }

    async fn list_lots_by_status(&mut self, statuses: &[FumigationStatus]) -> AppResult<Vec<Lot>> {
        let codes: Vec<String> = statuses.iter().map(|s| s.code().to_string()).collect();
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {} FROM lots WHERE fumigation_status = ANY($1) ORDER BY lot_number",
            LOT_COLUMNS
        ))
        .bind(codes)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        lots_from_rows(rows)
    }

    async fn insert_reception(&mut self, new_reception: &NewReception) -> AppResult<Reception> {
        let row = sqlx::query_as::<_, ReceptionRow>(&format!(
            r#"
            INSERT INTO receptions (waybill, "date", "time", truck_plate, trucker_name,
                                    observations, is_open)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING {}
            "#,
            RECEPTION_COLUMNS
        ))
        .bind(new_reception.waybill)
        .bind(new_reception.date)
        .bind(new_reception.time)
        .bind(&new_reception.truck_plate)
        .bind(&new_reception.trucker_name)
        .bind(&new_reception.observations)
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.into())
    }

    async fn find_reception(&mut self, id: i64) -> AppResult<Option<Reception>> {
        let row = sqlx::query_as::<_, ReceptionRow>(&format!(
            "SELECT {} FROM receptions WHERE id = $1",
            RECEPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(Reception::from))
    }

    async fn lock_reception(&mut self, id: i64) -> AppResult<Option<Reception>> {
        let row = sqlx::query_as::<_, ReceptionRow>(&format!(
            "SELECT {} FROM receptions WHERE id = $1 FOR UPDATE",
            RECEPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(Reception::from))
    }

    async fn save_reception(&mut self, reception: &Reception) -> AppResult<Reception> {
        let row = sqlx::query_as::<_, ReceptionRow>(&format!(
            r#"
            UPDATE receptions
            SET is_open = $2, observations = $3, updated_at = clock_timestamp()
            WHERE id = $1
            RETURNING {}
            "#,
            RECEPTION_COLUMNS
        ))
        .bind(reception.id)
        .bind(reception.is_open)
        .bind(&reception.observations)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::NotFound(format!("Reception {}", reception.id)))?;

        Ok(row.into())
    }

    async fn find_packaging(&mut self, id: i64) -> AppResult<Option<Packaging>> {
        let row = sqlx::query_as::<_, PackagingRow>(
            "SELECT id, name, tare, is_active FROM packagings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(|r| Packaging {
            id: r.id,
            name: r.name,
            tare: r.tare,
            is_active: r.is_active,
        }))
    }

    async fn find_truck_weight(&mut self, lot_id: i64) -> AppResult<Option<FullTruckWeight>> {
        let row = sqlx::query_as::<_, TruckWeightRow>(&format!(
            "SELECT {} FROM full_truck_weights WHERE lot_id = $1",
            TRUCK_WEIGHT_COLUMNS
        ))
        .bind(lot_id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(FullTruckWeight::from))
    }

    async fn save_truck_weight(
        &mut self,
        lot_id: i64,
        loaded_truck_weight: Decimal,
        empty_truck_weight: Decimal,
    ) -> AppResult<FullTruckWeight> {
        let row = sqlx::query_as::<_, TruckWeightRow>(&format!(
            r#"
            INSERT INTO full_truck_weights (lot_id, loaded_truck_weight, empty_truck_weight)
            VALUES ($1, $2, $3)
            ON CONFLICT (lot_id) DO UPDATE
            SET loaded_truck_weight = EXCLUDED.loaded_truck_weight,
                empty_truck_weight = EXCLUDED.empty_truck_weight,
                updated_at = clock_timestamp()
            RETURNING {}
            "#,
            TRUCK_WEIGHT_COLUMNS
        ))
        .bind(lot_id)
        .bind(loaded_truck_weight)
        .bind(empty_truck_weight)
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.into())
    }

    async fn find_fumigation_by_work_order(
        &mut self,
        work_order: &str,
    ) -> AppResult<Option<Fumigation>> {
        let row = sqlx::query_as::<_, FumigationRow>(&format!(
            "SELECT {} FROM fumigations WHERE work_order = $1",
            FUMIGATION_COLUMNS
        ))
        .bind(work_order)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(Fumigation::from))
    }

    async fn find_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>> {
        let row = sqlx::query_as::<_, FumigationRow>(&format!(
            "SELECT {} FROM fumigations WHERE id = $1",
            FUMIGATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(Fumigation::from))
    }

    async fn lock_fumigation(&mut self, id: i64) -> AppResult<Option<Fumigation>> {
        let row = sqlx::query_as::<_, FumigationRow>(&format!(
            "SELECT {} FROM fumigations WHERE id = $1 FOR UPDATE",
            FUMIGATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(Fumigation::from))
    }

    async fn insert_fumigation(
        &mut self,
        work_order: &str,
        lot_ids: &[i64],
    ) -> AppResult<Fumigation> {
        let row = sqlx::query_as::<_, FumigationRow>(&format!(
            "INSERT INTO fumigations (work_order) VALUES ($1) RETURNING {}",
            FUMIGATION_COLUMNS
        ))
        .bind(work_order)
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        let mut members = lot_ids.to_vec();
        members.sort_unstable();
        members.dedup();

        sqlx::query(
            r#"
            INSERT INTO fumigation_lots (fumigation_id, lot_id)
            SELECT $1, lot_id FROM UNNEST($2::BIGINT[]) AS lot_id
            "#,
        )
        .bind(row.id)
        .bind(members)
        .execute(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.into())
    }

    async fn save_fumigation(&mut self, fumigation: &Fumigation) -> AppResult<Fumigation> {
        let row = sqlx::query_as::<_, FumigationRow>(&format!(
            r#"
            UPDATE fumigations
            SET real_start_date = $2, real_start_time = $3,
                real_end_date = $4, real_end_time = $5,
                fumigation_sign_path = $6, work_order_path = $7, certificate_path = $8,
                updated_at = clock_timestamp()
            WHERE id = $1
            RETURNING {}
            "#,
            FUMIGATION_COLUMNS
        ))
        .bind(fumigation.id)
        .bind(fumigation.real_start_date)
        .bind(fumigation.real_start_time)
        .bind(fumigation.real_end_date)
        .bind(fumigation.real_end_time)
        .bind(&fumigation.fumigation_sign_path)
        .bind(&fumigation.work_order_path)
        .bind(&fumigation.certificate_path)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::NotFound(format!("Fumigation {}", fumigation.id)))?;

        Ok(row.into())
    }

    async fn fumigation_lot_ids(&mut self, fumigation_id: i64) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT lot_id FROM fumigation_lots WHERE fumigation_id = $1 ORDER BY lot_id",
        )
        .bind(fumigation_id)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(ids)
    }

    async fn list_fumigations(
        &mut self,
        filter: &FumigationFilter,
        pagination: Pagination,
    ) -> AppResult<(Vec<FumigationWithLots>, u64)> {
        let pattern = filter
            .work_order
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(contains_pattern);
        let phase = filter.phase.map(phase_key);

        let total: i64 = sqlx::query_scalar(&format!(
            "{} SELECT COUNT(*) FROM phased {}",
            PHASED_FUMIGATIONS, PHASED_FILTER
        ))
        .bind(&pattern)
        .bind(phase)
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query_as::<_, FumigationRow>(&format!(
            "{} SELECT {} FROM phased {} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
            PHASED_FUMIGATIONS, FUMIGATION_COLUMNS, PHASED_FILTER
        ))
        .bind(&pattern)
        .bind(phase)
        .bind(i64::from(pagination.per_page))
        .bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX))
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        let fumigation_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let memberships = sqlx::query_as::<_, (i64, i64)>(
            "SELECT fumigation_id, lot_id FROM fumigation_lots WHERE fumigation_id = ANY($1)",
        )
        .bind(fumigation_ids)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        let lot_ids: Vec<i64> = memberships.iter().map(|(_, lot_id)| *lot_id).collect();
        let lot_rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {} FROM lots WHERE id = ANY($1) ORDER BY lot_number",
            LOT_COLUMNS
        ))
        .bind(lot_ids)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        let owner: HashMap<i64, i64> = memberships
            .into_iter()
            .map(|(fumigation_id, lot_id)| (lot_id, fumigation_id))
            .collect();
        let mut lots_by_fumigation: HashMap<i64, Vec<Lot>> = HashMap::new();
        for lot in lots_from_rows(lot_rows)? {
            if let Some(fumigation_id) = owner.get(&lot.id) {
                lots_by_fumigation
                    .entry(*fumigation_id)
                    .or_default()
                    .push(lot);
            }
        }

        let page = rows
            .into_iter()
            .map(|row| {
                let lots = lots_by_fumigation.remove(&row.id).unwrap_or_default();
                FumigationWithLots {
                    fumigation: row.into(),
                    lots,
                }
            })
            .collect();

        Ok((page, u64::try_from(total).unwrap_or(0)))
    }

    async fn insert_lot_qc(
        &mut self,
        input: &LotQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<LotQc> {
        let sql = format!(
            "INSERT INTO lots_qc (lot_id, {cols}) VALUES ($1, {values}) \
             RETURNING id, lot_id, {cols}, created_at, updated_at",
            cols = QC_COLUMNS,
            values = placeholders(2, QC_COLUMN_COUNT),
        );
        let query = sqlx::query_as::<_, LotQcRow>(&sql).bind(input.lot_id);
        let row = bind_qc(query, &input.measurements, metrics, images)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_error)?;

        Ok(row.into())
    }

    async fn find_lot_qc(&mut self, lot_id: i64) -> AppResult<Option<LotQc>> {
        let row = sqlx::query_as::<_, LotQcRow>(&format!(
            "SELECT id, lot_id, {}, created_at, updated_at FROM lots_qc WHERE lot_id = $1",
            QC_COLUMNS
        ))
        .bind(lot_id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(LotQc::from))
    }

    async fn find_sample_qc(&mut self, id: i64) -> AppResult<Option<SampleQc>> {
        let row = sqlx::query_as::<_, SampleQcRow>(&format!(
            "SELECT id, grower, brought_by, {}, created_at, updated_at FROM samples_qc WHERE id = $1",
            QC_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_error)?;

        Ok(row.map(SampleQc::from))
    }

    async fn insert_sample_qc(
        &mut self,
        input: &SampleQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<SampleQc> {
        let sql = format!(
            "INSERT INTO samples_qc (grower, brought_by, {cols}) VALUES ($1, $2, {values}) \
             RETURNING id, grower, brought_by, {cols}, created_at, updated_at",
            cols = QC_COLUMNS,
            values = placeholders(3, QC_COLUMN_COUNT),
        );
        let query = sqlx::query_as::<_, SampleQcRow>(&sql)
            .bind(&input.grower)
            .bind(&input.brought_by);
        let row = bind_qc(query, &input.measurements, metrics, images)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_error)?;

        Ok(row.into())
    }

    async fn dashboard_counts(&mut self, window: &DashboardWindow) -> AppResult<DashboardCounts> {
        let row = sqlx::query_as::<_, DashboardRow>(
            r#"
            SELECT
                COUNT(*) FILTER (
                    WHERE l.created_at >= $1 AND l.created_at < $2
                ) AS lots_received_today,
                COALESCE(SUM(l.net_weight) FILTER (
                    WHERE l.created_at >= $1 AND l.created_at < $2 AND l.net_weight > 0
                ), 0) AS kilograms_received_today,
                COUNT(*) FILTER (
                    WHERE l.created_at < $3 AND q.id IS NULL
                ) AS no_qc,
                COUNT(*) FILTER (
                    WHERE l.created_at < $4 AND (l.net_weight IS NULL OR l.net_weight <= 0)
                ) AS missing_net_weight,
                COUNT(*) FILTER (
                    WHERE l.created_at < $5 AND l.fumigation_status = '1'
                ) AS no_fumigation
            FROM lots l
            LEFT JOIN lots_qc q ON q.lot_id = l.id
            "#,
        )
        .bind(window.today_start)
        .bind(window.today_end)
        .bind(window.no_qc_cutoff)
        .bind(window.missing_net_weight_cutoff)
        .bind(window.no_fumigation_cutoff)
        .fetch_one(self.conn()?)
        .await
        .map_err(db_error)?;

        let status_rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT fumigation_status, COUNT(*) FROM lots GROUP BY fumigation_status",
        )
        .fetch_all(self.conn()?)
        .await
        .map_err(db_error)?;

        let mut status_counts = [0i64; 4];
        for (code, count) in status_rows {
            if let Some(index) = FumigationStatus::from_code(&code)
                .and_then(|status| FumigationStatus::ALL.iter().position(|s| *s == status))
            {
                status_counts[index] = count;
            }
        }

        Ok(DashboardCounts {
            lots_received_today: row.lots_received_today,
            kilograms_received_today: row.kilograms_received_today,
            status_counts,
            no_qc: row.no_qc,
            missing_net_weight: row.missing_net_weight,
            no_fumigation: row.no_fumigation,
        })
    }
}
