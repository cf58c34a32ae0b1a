//! Quality-control analyses for lots and grower samples

use std::sync::Arc;

use shared::{
    compute_qc_metrics, normalize_qc_measurements, LotQc, LotQcInput, QcImages, QcMeasurements,
    QcMetrics, SampleQc, SampleQcInput, ValidationError,
};

use crate::error::{AppError, AppResult};
use crate::ledger::{settle, settle_savepoint, Ledger, LedgerTx, LOT_QC_KEY};

/// QC service
#[derive(Clone)]
pub struct QcService {
    ledger: Arc<dyn Ledger>,
}

fn lot_already_has_qc() -> AppError {
    ValidationError::on_field(
        "lot_id",
        "The selected lot already has a QC record.",
        "El lote seleccionado ya tiene un registro QC.",
    )
    .into()
}

fn ensure_analyst(measurements: &QcMeasurements) -> Result<(), ValidationError> {
    if measurements.analyst.trim().is_empty() {
        return Err(ValidationError::on_field(
            "analyst",
            "The analyst name is required.",
            "Debe ingresar el nombre del analista.",
        ));
    }
    Ok(())
}

impl QcService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Check a payload and derive its metrics without persisting anything
    pub fn validate(measurements: &QcMeasurements) -> AppResult<QcMetrics> {
        Ok(Self::prepare(measurements)?.1)
    }

    /// Measurements as they will be stored, with the metrics derived from them
    fn prepare(measurements: &QcMeasurements) -> AppResult<(QcMeasurements, QcMetrics)> {
        ensure_analyst(measurements)?;
        let normalized = normalize_qc_measurements(measurements)?;
        let metrics = compute_qc_metrics(&normalized)?;
        Ok((normalized, metrics))
    }

    fn prepare_lot_qc(input: &LotQcInput) -> AppResult<(LotQcInput, QcMetrics)> {
        let (measurements, metrics) = Self::prepare(&input.measurements)?;
        let input = LotQcInput {
            lot_id: input.lot_id,
            measurements,
        };
        Ok((input, metrics))
    }

    // ------------------------------------------------------------------------
    // Lot QC
    // ------------------------------------------------------------------------

    /// Persist the single QC record of a lot and latch its `has_qc` flag
    pub async fn create_lot_qc(&self, input: &LotQcInput, images: &QcImages) -> AppResult<LotQc> {
        let (input, metrics) = Self::prepare_lot_qc(input)?;
        let mut tx = self.ledger.begin().await?;
        let result = Self::create_lot_qc_steps(tx.as_mut(), &input, &metrics, images).await;
        settle(tx, result).await
    }

    pub async fn create_lot_qc_in(
        &self,
        tx: &mut dyn LedgerTx,
        input: &LotQcInput,
        images: &QcImages,
    ) -> AppResult<LotQc> {
        let (input, metrics) = Self::prepare_lot_qc(input)?;
        let savepoint = tx.savepoint().await?;
        let result = Self::create_lot_qc_steps(&mut *tx, &input, &metrics, images).await;
        settle_savepoint(tx, savepoint, result).await
    }

    async fn create_lot_qc_steps(
        tx: &mut dyn LedgerTx,
        input: &LotQcInput,
        metrics: &QcMetrics,
        images: &QcImages,
    ) -> AppResult<LotQc> {
        let Some(mut lot) = tx.lock_lots(&[input.lot_id]).await?.pop() else {
            return Err(ValidationError::on_field(
                "lot_id",
                "The selected lot does not exist.",
                "El lote seleccionado no existe.",
            )
            .into());
        };
        if lot.has_qc || tx.find_lot_qc(lot.id).await?.is_some() {
            return Err(lot_already_has_qc());
        }

        let record = match tx.insert_lot_qc(input, metrics, images).await {
            Err(AppError::UniqueViolation(key)) if key == LOT_QC_KEY => {
                return Err(lot_already_has_qc())
            }
            other => other?,
        };

        lot.has_qc = true;
        tx.save_lot(&lot).await?;

        tracing::info!(
            lot_id = lot.id,
            lot_qc_id = record.id,
            yieldpercentage = %record.metrics.yieldpercentage,
            "Lot QC recorded"
        );
        Ok(record)
    }

    pub async fn find_lot_qc(&self, lot_id: i64) -> AppResult<LotQc> {
        let mut tx = self.ledger.begin().await?;
        let result = tx.find_lot_qc(lot_id).await;
        settle(tx, result)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("QC record for lot {}", lot_id)))
    }

    // ------------------------------------------------------------------------
    // Sample QC
    // ------------------------------------------------------------------------

    /// Persist a grower sample analysis; samples carry no lot latch
    pub async fn create_sample_qc(
        &self,
        input: &SampleQcInput,
        images: &QcImages,
    ) -> AppResult<SampleQc> {
        if input.grower.trim().is_empty() {
            return Err(ValidationError::on_field(
                "grower",
                "The grower name is required.",
                "Debe ingresar el nombre del productor.",
            )
            .into());
        }
        if input.brought_by.trim().is_empty() {
            return Err(ValidationError::on_field(
                "brought_by",
                "The name of who brought the sample is required.",
                "Debe ingresar quién trajo la muestra.",
            )
            .into());
        }
        let (measurements, metrics) = Self::prepare(&input.measurements)?;
        let input = SampleQcInput {
            measurements,
            ..input.clone()
        };

        let mut tx = self.ledger.begin().await?;
        let result = tx.insert_sample_qc(&input, &metrics, images).await;
        let record = settle(tx, result).await?;

        tracing::info!(
            sample_qc_id = record.id,
            grower = %record.grower,
            yieldpercentage = %record.metrics.yieldpercentage,
            "Sample QC recorded"
        );
        Ok(record)
    }

    pub async fn find_sample_qc(&self, sample_id: i64) -> AppResult<SampleQc> {
        let mut tx = self.ledger.begin().await?;
        let result = tx.find_sample_qc(sample_id).await;
        settle(tx, result)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sample QC {}", sample_id)))
    }
}
