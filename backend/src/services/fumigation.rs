//! Fumigation workflow: assign, start and complete work orders
//!
//! Every operation locks what it reads before checking state: the fumigation
//! row first, then its lots in ascending id order. A failed check on any lot
//! rolls the whole batch back.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use shared::{
    can_transition, transition_fumigation_status, Fumigation, FumigationFilter,
    FumigationStatus, FumigationWithLots, Lot, PaginatedResponse, Pagination, PaginationMeta,
    StartDocuments, TransitionError, ValidationError,
};

use crate::error::{AppError, AppResult};
use crate::ledger::{
    settle, settle_savepoint, Ledger, LedgerTx, FUMIGATION_MEMBERSHIP_KEY, WORK_ORDER_KEY,
};

/// Fumigation service driving the lot status lattice
#[derive(Clone)]
pub struct FumigationService {
    ledger: Arc<dyn Ledger>,
}

/// Input for assigning lots to a new work order
#[derive(Debug, Clone, Deserialize)]
pub struct AssignFumigationInput {
    pub work_order: String,
    pub lot_ids: Vec<i64>,
}

/// Input for starting a fumigation
#[derive(Debug, Clone, Deserialize)]
pub struct StartFumigationInput {
    pub real_start_date: NaiveDate,
    pub real_start_time: NaiveTime,
    #[serde(flatten)]
    pub documents: StartDocuments,
}

/// Input for completing a fumigation
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteFumigationInput {
    pub real_end_date: NaiveDate,
    pub real_end_time: NaiveTime,
    pub certificate_path: Option<String>,
}

/// Outcome of a state change, with the lots it moved
#[derive(Debug, Clone, Serialize)]
pub struct FumigationTransition {
    #[serde(flatten)]
    pub fumigation: Fumigation,
    pub lots: Vec<Lot>,
}

fn work_order_taken() -> AppError {
    TransitionError::new(
        "The fumigation work order already exists. Please use another one.",
        "La Orden de Fumigación ya existe. Por favor, use otra.",
    )
    .into()
}

fn already_completed() -> AppError {
    TransitionError::new(
        "This fumigation was already completed.",
        "Esta fumigación ya fue completada.",
    )
    .into()
}

fn fumigation_not_found(fumigation_id: i64) -> AppError {
    AppError::NotFound(format!("Fumigation {}", fumigation_id))
}

impl FumigationService {
    /// Create a new FumigationService instance
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    // ------------------------------------------------------------------------
    // Assign
    // ------------------------------------------------------------------------

    /// Create a work order over available lots and move them to `ASSIGNED`
    pub async fn assign(&self, input: &AssignFumigationInput) -> AppResult<FumigationTransition> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::assign_steps(tx.as_mut(), input).await;
        settle(tx, result).await
    }

    /// Same as [`assign`](Self::assign) inside the caller's transaction
    pub async fn assign_in(
        &self,
        tx: &mut dyn LedgerTx,
        input: &AssignFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let savepoint = tx.savepoint().await?;
        let result = Self::assign_steps(&mut *tx, input).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn assign_steps(
        tx: &mut dyn LedgerTx,
        input: &AssignFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let work_order = input.work_order.trim();
        if work_order.is_empty() {
            return Err(ValidationError::on_field(
                "work_order",
                "The fumigation work order is required.",
                "Debe ingresar la Orden de Fumigación.",
            )
            .into());
        }
        if input.lot_ids.is_empty() {
            return Err(ValidationError::on_field(
                "lot_ids",
                "Please select at least one lot to continue.",
                "Por favor, seleccione al menos un Lote para continuar.",
            )
            .into());
        }
        if tx.find_fumigation_by_work_order(work_order).await?.is_some() {
            return Err(work_order_taken());
        }

        let mut requested = input.lot_ids.clone();
        requested.sort_unstable();
        requested.dedup();

        let mut lots = tx.lock_lots(&requested).await?;
        if lots.len() != requested.len() {
            let missing: Vec<String> = requested
                .iter()
                .filter(|id| !lots.iter().any(|lot| lot.id == **id))
                .map(|id| id.to_string())
                .collect();
            return Err(TransitionError::new(
                format!(
                    "One or more selected lots do not exist ({}).",
                    missing.join(", ")
                ),
                "Uno o más lotes seleccionados no existen.",
            )
            .into());
        }

        for lot in lots.iter_mut() {
            transition_fumigation_status(lot, FumigationStatus::Assigned)?;
        }

        let fumigation = match tx.insert_fumigation(work_order, &requested).await {
            Err(AppError::UniqueViolation(key)) if key == WORK_ORDER_KEY => {
                return Err(work_order_taken())
            }
            Err(AppError::UniqueViolation(key)) if key == FUMIGATION_MEMBERSHIP_KEY => {
                return Err(TransitionError::new(
                    "One or more selected lots already belong to a fumigation.",
                    "Uno o más lotes seleccionados ya pertenecen a una fumigación.",
                )
                .into())
            }
            other => other?,
        };

        let mut saved = Vec::with_capacity(lots.len());
        for lot in &lots {
            saved.push(tx.save_lot(lot).await?);
        }

        tracing::info!(
            fumigation_id = fumigation.id,
            work_order = %fumigation.work_order,
            lot_count = saved.len(),
            "Fumigation assigned"
        );

        Ok(FumigationTransition {
            fumigation,
            lots: saved,
        })
    }

    // ------------------------------------------------------------------------
    // Start / complete
    // ------------------------------------------------------------------------

    /// Move every member lot from `ASSIGNED` to `STARTED` and record the start
    pub async fn start(
        &self,
        fumigation_id: i64,
        input: &StartFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::start_steps(tx.as_mut(), fumigation_id, input).await;
        settle(tx, result).await
    }

    pub async fn start_in(
        &self,
        tx: &mut dyn LedgerTx,
        fumigation_id: i64,
        input: &StartFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let savepoint = tx.savepoint().await?;
        let result = Self::start_steps(&mut *tx, fumigation_id, input).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn start_steps(
        tx: &mut dyn LedgerTx,
        fumigation_id: i64,
        input: &StartFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let (mut fumigation, lots) =
            Self::advance_members(tx, fumigation_id, FumigationStatus::Started).await?;

        fumigation.real_start_date = Some(input.real_start_date);
        fumigation.real_start_time = Some(input.real_start_time);
        if let Some(path) = non_empty(&input.documents.fumigation_sign_path) {
            fumigation.fumigation_sign_path = Some(path);
        }
        if let Some(path) = non_empty(&input.documents.work_order_path) {
            fumigation.work_order_path = Some(path);
        }
        let fumigation = tx.save_fumigation(&fumigation).await?;

        tracing::info!(
            fumigation_id = fumigation.id,
            work_order = %fumigation.work_order,
            lot_count = lots.len(),
            "Fumigation started"
        );

        Ok(FumigationTransition { fumigation, lots })
    }

    /// Move every member lot from `STARTED` to `COMPLETED` and close the work order
    pub async fn complete(
        &self,
        fumigation_id: i64,
        input: &CompleteFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::complete_steps(tx.as_mut(), fumigation_id, input).await;
        settle(tx, result).await
    }

    pub async fn complete_in(
        &self,
        tx: &mut dyn LedgerTx,
        fumigation_id: i64,
        input: &CompleteFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let savepoint = tx.savepoint().await?;
        let result = Self::complete_steps(&mut *tx, fumigation_id, input).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn complete_steps(
        tx: &mut dyn LedgerTx,
        fumigation_id: i64,
        input: &CompleteFumigationInput,
    ) -> AppResult<FumigationTransition> {
        let (mut fumigation, lots) =
            Self::advance_members(tx, fumigation_id, FumigationStatus::Completed).await?;

        fumigation.real_end_date = Some(input.real_end_date);
        fumigation.real_end_time = Some(input.real_end_time);
        if let Some(path) = non_empty(&input.certificate_path) {
            fumigation.certificate_path = Some(path);
        }
        let fumigation = tx.save_fumigation(&fumigation).await?;

        tracing::info!(
            fumigation_id = fumigation.id,
            work_order = %fumigation.work_order,
            lot_count = lots.len(),
            "Fumigation completed"
        );

        Ok(FumigationTransition { fumigation, lots })
    }

    /// Lock the fumigation and its lots, then move every lot to `target`
    async fn advance_members(
        tx: &mut dyn LedgerTx,
        fumigation_id: i64,
        target: FumigationStatus,
    ) -> AppResult<(Fumigation, Vec<Lot>)> {
        let fumigation = tx
            .lock_fumigation(fumigation_id)
            .await?
            .ok_or_else(|| fumigation_not_found(fumigation_id))?;
        if fumigation.is_completed() {
            return Err(already_completed());
        }

        let member_ids = tx.fumigation_lot_ids(fumigation.id).await?;
        let mut lots = tx.lock_lots(&member_ids).await?;
        if lots.len() != member_ids.len() {
            return Err(AppError::Internal(format!(
                "fumigation {} references missing lots",
                fumigation.id
            )));
        }

        for lot in lots.iter_mut() {
            transition_fumigation_status(lot, target)?;
        }

        let mut saved = Vec::with_capacity(lots.len());
        for lot in &lots {
            saved.push(tx.save_lot(lot).await?);
        }
        Ok((fumigation, saved))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Lots that may be assigned right now, ordered by lot number
    pub async fn assignable_lots(&self) -> AppResult<Vec<Lot>> {
        let candidates: Vec<FumigationStatus> = FumigationStatus::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(FumigationStatus::Assigned))
            .collect();

        let mut tx = self.ledger.begin().await?;
        let result: AppResult<Vec<Lot>> = tx.list_lots_by_status(&candidates).await.map(|lots| {
            lots.into_iter()
                .filter(|lot| can_transition(lot, FumigationStatus::Assigned))
                .collect()
        });
        settle(tx, result).await
    }

    /// Fumigation with its member lots
    pub async fn get(&self, fumigation_id: i64) -> AppResult<FumigationWithLots> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::load(tx.as_mut(), fumigation_id).await;
        settle(tx, result).await
    }

    async fn load(tx: &mut dyn LedgerTx, fumigation_id: i64) -> AppResult<FumigationWithLots> {
        let fumigation = tx
            .find_fumigation(fumigation_id)
            .await?
            .ok_or_else(|| fumigation_not_found(fumigation_id))?;
        let member_ids = tx.fumigation_lot_ids(fumigation.id).await?;

        let mut lots = Vec::with_capacity(member_ids.len());
        for lot_id in member_ids {
            if let Some(lot) = tx.find_lot(lot_id).await? {
                lots.push(lot);
            }
        }
        lots.sort_by_key(|lot| lot.lot_number);
        Ok(FumigationWithLots { fumigation, lots })
    }

    /// Paginated fumigations, newest first
    pub async fn list(
        &self,
        filter: &FumigationFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<FumigationWithLots>> {
        let mut tx = self.ledger.begin().await?;
        let result = tx.list_fumigations(filter, pagination).await;
        let (data, total) = settle(tx, result).await?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(pagination, total),
        })
    }
}

fn non_empty(path: &Option<String>) -> Option<String> {
    path.as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}
