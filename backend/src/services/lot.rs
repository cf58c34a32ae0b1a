//! Reception, lot registration and weighing service

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    compute_net_weight_for_packaging, normalize_truck_weights, FullTruckWeight, Lot,
    NetWeightComputation, NewLot, NewReception, Packaging, Reception, ValidationError,
};

use crate::error::{AppError, AppResult};
use crate::ledger::{settle, settle_savepoint, Ledger, LedgerTx, LOT_NUMBER_KEY};

/// Lot service for receptions, lot creation and truck weighing
#[derive(Clone)]
pub struct LotService {
    ledger: Arc<dyn Ledger>,
}

/// Input for registering a lot
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLotInput {
    #[serde(flatten)]
    pub lot: NewLot,
    /// Close the reception in the same transaction (last lot of the truck)
    #[serde(default)]
    pub close_reception: bool,
}

/// Input for registering the truck weights of a lot
#[derive(Debug, Clone, Deserialize)]
pub struct TruckWeightInput {
    pub loaded_truck_weight: Option<Decimal>,
    pub empty_truck_weight: Option<Decimal>,
}

/// Weighing result
#[derive(Debug, Clone, Serialize)]
pub struct WeightRegistration {
    pub lot: Lot,
    pub truck_weight: FullTruckWeight,
    #[serde(flatten)]
    pub computation: NetWeightComputation,
}

fn duplicate_lot_number(lot_number: i32) -> AppError {
    ValidationError::on_field(
        "lot_number",
        format!(
            "Lot {:03} already exists. Please use a different lot number.",
            lot_number
        ),
        format!(
            "El Lote {:03} ya existe. Por favor, use un Lote distinto.",
            lot_number
        ),
    )
    .into()
}

fn packaging_missing() -> AppError {
    ValidationError::on_field(
        "packaging_id",
        "The packaging type for this lot was not found.",
        "No se encontró el tipo de envase para este lote.",
    )
    .into()
}

impl LotService {
    /// Create a new LotService instance
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    // ------------------------------------------------------------------------
    // Receptions
    // ------------------------------------------------------------------------

    /// Open a reception for an arriving truck
    pub async fn open_reception(&self, input: &NewReception) -> AppResult<Reception> {
        if input.truck_plate.trim().is_empty() {
            return Err(ValidationError::on_field(
                "truck_plate",
                "The truck plate is required.",
                "Debe ingresar la patente del camión.",
            )
            .into());
        }
        if input.trucker_name.trim().is_empty() {
            return Err(ValidationError::on_field(
                "trucker_name",
                "The trucker name is required.",
                "Debe ingresar el nombre del camionero.",
            )
            .into());
        }

        let mut tx = self.ledger.begin().await?;
        let result = tx.insert_reception(input).await;
        let reception = settle(tx, result).await?;

        tracing::info!(
            reception_id = reception.id,
            waybill = reception.waybill,
            "Reception opened"
        );
        Ok(reception)
    }

    // ------------------------------------------------------------------------
    // Lots
    // ------------------------------------------------------------------------

    /// Register a lot under an open reception, optionally closing it
    pub async fn create_lot(&self, input: &CreateLotInput) -> AppResult<Lot> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::create_lot_steps(tx.as_mut(), input).await;
        settle(tx, result).await
    }

    pub async fn create_lot_in(
        &self,
        tx: &mut dyn LedgerTx,
        input: &CreateLotInput,
    ) -> AppResult<Lot> {
        let savepoint = tx.savepoint().await?;
        let result = Self::create_lot_steps(&mut *tx, input).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn create_lot_steps(tx: &mut dyn LedgerTx, input: &CreateLotInput) -> AppResult<Lot> {
        let new_lot = &input.lot;
        if new_lot.lot_number <= 0 {
            return Err(ValidationError::on_field(
                "lot_number",
                "The lot number must be greater than 0.",
                "El número de Lote debe ser mayor que 0.",
            )
            .into());
        }
        if new_lot.packagings_quantity <= 0 {
            return Err(ValidationError::on_field(
                "packagings_quantity",
                "The packaging quantity must be greater than 0.",
                "La cantidad de envases debe ser mayor que 0.",
            )
            .into());
        }

        let mut reception = tx
            .lock_reception(new_lot.reception_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reception {}", new_lot.reception_id)))?;
        if !reception.is_open {
            return Err(ValidationError::new(
                "The reception is closed and does not accept new lots.",
                "La recepción está cerrada y no admite nuevos lotes.",
            )
            .into());
        }
        if tx.find_packaging(new_lot.packaging_id).await?.is_none() {
            return Err(packaging_missing());
        }
        if tx.find_lot_by_number(new_lot.lot_number).await?.is_some() {
            return Err(duplicate_lot_number(new_lot.lot_number));
        }

        let lot = match tx.insert_lot(new_lot).await {
            Err(AppError::UniqueViolation(key)) if key == LOT_NUMBER_KEY => {
                return Err(duplicate_lot_number(new_lot.lot_number))
            }
            other => other?,
        };

        if input.close_reception {
            reception.is_open = false;
            tx.save_reception(&reception).await?;
        }

        tracing::info!(
            lot_id = lot.id,
            lot_number = lot.lot_number,
            reception_id = reception.id,
            reception_closed = input.close_reception,
            "Lot created"
        );
        Ok(lot)
    }

    pub async fn get_lot(&self, lot_id: i64) -> AppResult<Lot> {
        let mut tx = self.ledger.begin().await?;
        let result = tx.find_lot(lot_id).await;
        settle(tx, result)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lot {}", lot_id)))
    }

    /// Lot with the reception and packaging printed on its labels
    pub async fn get_lot_details(&self, lot_id: i64) -> AppResult<(Lot, Reception, Packaging)> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::details(tx.as_mut(), lot_id).await;
        settle(tx, result).await
    }

    async fn details(tx: &mut dyn LedgerTx, lot_id: i64) -> AppResult<(Lot, Reception, Packaging)> {
        let lot = tx
            .find_lot(lot_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lot {}", lot_id)))?;
        let reception = tx
            .find_reception(lot.reception_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reception {}", lot.reception_id)))?;
        let packaging = tx
            .find_packaging(lot.packaging_id)
            .await?
            .ok_or_else(packaging_missing)?;
        Ok((lot, reception, packaging))
    }

    // ------------------------------------------------------------------------
    // Weighing
    // ------------------------------------------------------------------------

    /// Upsert the truck weights of a lot and store its net weight
    pub async fn register_full_truck_weight(
        &self,
        lot_id: i64,
        input: &TruckWeightInput,
    ) -> AppResult<WeightRegistration> {
        let mut tx = self.ledger.begin().await?;
        let result = Self::register_weight_steps(tx.as_mut(), lot_id, input).await;
        settle(tx, result).await
    }

    pub async fn register_full_truck_weight_in(
        &self,
        tx: &mut dyn LedgerTx,
        lot_id: i64,
        input: &TruckWeightInput,
    ) -> AppResult<WeightRegistration> {
        let savepoint = tx.savepoint().await?;
        let result = Self::register_weight_steps(&mut *tx, lot_id, input).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn register_weight_steps(
        tx: &mut dyn LedgerTx,
        lot_id: i64,
        input: &TruckWeightInput,
    ) -> AppResult<WeightRegistration> {
        let mut lot = tx
            .lock_lots(&[lot_id])
            .await?
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("Lot {}", lot_id)))?;
        let packaging = tx
            .find_packaging(lot.packaging_id)
            .await?
            .ok_or_else(packaging_missing)?;

        // Stored weights carry two decimals; the net weight derives from them
        let (loaded, empty) =
            normalize_truck_weights(input.loaded_truck_weight, input.empty_truck_weight)?;
        let computation = compute_net_weight_for_packaging(
            loaded,
            empty,
            packaging.tare,
            lot.packagings_quantity,
        )?;
        let (Some(loaded), Some(empty)) = (loaded, empty) else {
            return Err(AppError::Internal(
                "net weight computed without both truck weights".to_string(),
            ));
        };

        let truck_weight = tx.save_truck_weight(lot.id, loaded, empty).await?;
        lot.net_weight = Some(computation.net_weight);
        let lot = tx.save_lot(&lot).await?;

        tracing::info!(
            lot_id = lot.id,
            net_weight = %computation.net_weight,
            packaging_tare = %computation.packaging_tare,
            "Net weight registered"
        );

        Ok(WeightRegistration {
            lot,
            truck_weight,
            computation,
        })
    }
}
