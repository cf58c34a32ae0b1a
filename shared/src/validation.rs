//! Weight and quality-control calculators
//!
//! Both are pure: the backend runs them before persisting and the browser
//! runs the same code (via WASM) for live previews. All arithmetic is exact
//! decimal arithmetic rounded half away from zero, so a validate-then-persist
//! round trip always derives the same figures.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ValidationError;
use crate::models::{NetWeightComputation, QcMeasurements, QcMetrics};

/// Units analysed in every QC sample
pub const QC_SAMPLE_UNITS: i32 = 100;

/// Largest truck weight the ledger stores, `NUMERIC(12, 2)`
pub const MAX_TRUCK_WEIGHT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Largest sample weight the ledger stores, `NUMERIC(10, 2)`
pub const MAX_SAMPLE_WEIGHT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Largest yield percentage the ledger stores, `NUMERIC(7, 2)`
pub const MAX_YIELD_PERCENTAGE: Decimal = Decimal::from_parts(9_999_999, 0, 0, false, 2);

/// Round to two decimals, ties away from zero; the result always carries
/// exactly two decimal places
pub fn round_half_up(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

fn out_of_range(field: &str) -> ValidationError {
    ValidationError::on_field(
        field,
        format!("The value of {} is too large.", field),
        format!("El valor de {} es demasiado grande.", field),
    )
}

/// Round a weight to the two decimals it is stored with, rejecting values
/// whose rounded magnitude exceeds `max`
pub fn normalize_weight(field: &str, value: Decimal, max: Decimal) -> Result<Decimal, ValidationError> {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded.abs() > max {
        return Err(out_of_range(field));
    }
    Ok(round_half_up(rounded))
}

// ============================================================================
// Weighing
// ============================================================================

/// Loaded and empty truck weights rounded to two decimals; a missing weight
/// stays missing
pub fn normalize_truck_weights(
    loaded_truck_weight: Option<Decimal>,
    empty_truck_weight: Option<Decimal>,
) -> Result<(Option<Decimal>, Option<Decimal>), ValidationError> {
    let loaded = loaded_truck_weight
        .map(|w| normalize_weight("loaded_truck_weight", w, MAX_TRUCK_WEIGHT))
        .transpose()?;
    let empty = empty_truck_weight
        .map(|w| normalize_weight("empty_truck_weight", w, MAX_TRUCK_WEIGHT))
        .transpose()?;
    Ok((loaded, empty))
}

/// Net weight in kg: `loaded - empty - tare * quantity`
///
/// Truck weights are first rounded half-up to two decimals, so the result
/// recomputes exactly from the stored weights.
pub fn compute_net_weight(
    loaded_truck_weight: Option<Decimal>,
    empty_truck_weight: Option<Decimal>,
    packaging_tare: Decimal,
    packagings_quantity: i32,
) -> Result<Decimal, ValidationError> {
    let (loaded, empty) = match normalize_truck_weights(loaded_truck_weight, empty_truck_weight)? {
        (Some(loaded), Some(empty)) => (loaded, empty),
        _ => {
            return Err(ValidationError::new(
                "Both the loaded and the empty truck weight are required.",
                "Debe ingresar los pesos cargado y vacío.",
            ))
        }
    };
    if loaded <= Decimal::ZERO {
        return Err(ValidationError::on_field(
            "loaded_truck_weight",
            "The loaded truck weight must be greater than 0.",
            "El peso del camión cargado debe ser mayor que 0.",
        ));
    }
    if empty < Decimal::ZERO {
        return Err(ValidationError::on_field(
            "empty_truck_weight",
            "The empty truck weight cannot be negative.",
            "El peso del camión vacío no puede ser negativo.",
        ));
    }
    if loaded <= empty {
        return Err(ValidationError::on_field(
            "loaded_truck_weight",
            "The loaded weight must be greater than the empty weight.",
            "El peso cargado debe ser mayor al peso vacío.",
        ));
    }

    let computed = packaging_tare
        .checked_mul(Decimal::from(packagings_quantity))
        .and_then(|tare_total| (loaded - empty).checked_sub(tare_total))
        .ok_or_else(|| out_of_range("packaging_tare"))?;
    if computed <= Decimal::ZERO {
        return Err(ValidationError::new(
            "The computed net weight must be greater than 0.",
            "El peso neto calculado debe ser mayor que 0.",
        ));
    }

    Ok(round_half_up(computed))
}

/// Net weight together with the tare it was computed from
pub fn compute_net_weight_for_packaging(
    loaded_truck_weight: Option<Decimal>,
    empty_truck_weight: Option<Decimal>,
    packaging_tare: Decimal,
    packagings_quantity: i32,
) -> Result<NetWeightComputation, ValidationError> {
    let net_weight = compute_net_weight(
        loaded_truck_weight,
        empty_truck_weight,
        packaging_tare,
        packagings_quantity,
    )?;
    Ok(NetWeightComputation {
        net_weight,
        packaging_tare,
    })
}

// ============================================================================
// Quality control
// ============================================================================

fn ensure_non_negative_count(field: &str, value: i32) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::on_field(
            field,
            format!("The value of {} cannot be negative.", field),
            format!("El valor de {} no puede ser negativo.", field),
        ));
    }
    Ok(())
}

fn ensure_non_negative_weight(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::on_field(
            field,
            format!("The weight {} cannot be negative.", field),
            format!("El peso {} no puede ser negativo.", field),
        ));
    }
    Ok(())
}

/// Copy of the measurements with every weight rounded to the two decimals it
/// is stored with
pub fn normalize_qc_measurements(
    measurements: &QcMeasurements,
) -> Result<QcMeasurements, ValidationError> {
    let mut normalized = measurements.clone();
    normalized.inshell_weight =
        normalize_weight("inshell_weight", measurements.inshell_weight, MAX_SAMPLE_WEIGHT)?;
    let colors = &mut normalized.colors;
    for (field, weight) in [
        ("extra_light", &mut colors.extra_light),
        ("light", &mut colors.light),
        ("light_amber", &mut colors.light_amber),
        ("amber", &mut colors.amber),
        ("yellow", &mut colors.yellow),
    ] {
        *weight = normalize_weight(field, *weight, MAX_SAMPLE_WEIGHT)?;
    }
    Ok(normalized)
}

/// Derive units, shelled weight and yield from raw QC measurements
///
/// Weights are normalized first (see [`normalize_qc_measurements`]), then
/// `yieldpercentage = round(shelled_weight / inshell_weight * 100, 2)`.
pub fn compute_qc_metrics(measurements: &QcMeasurements) -> Result<QcMetrics, ValidationError> {
    let measurements = &normalize_qc_measurements(measurements)?;
    for (field, value) in measurements.sizes.fields() {
        ensure_non_negative_count(field, value)?;
    }
    let units = measurements.sizes.total();
    if units != QC_SAMPLE_UNITS {
        return Err(ValidationError::on_field(
            "units",
            format!(
                "The analysed units must add up to exactly {} (got {}).",
                QC_SAMPLE_UNITS, units
            ),
            format!(
                "Las unidades analizadas deben sumar exactamente {}.",
                QC_SAMPLE_UNITS
            ),
        ));
    }

    for (field, value) in measurements.defects.fields() {
        ensure_non_negative_count(field, value)?;
    }

    let inshell_weight = measurements.inshell_weight;
    if inshell_weight <= Decimal::ZERO {
        return Err(ValidationError::on_field(
            "inshell_weight",
            "The in-shell weight must be greater than 0.",
            "El peso con cáscara debe ser mayor que 0.",
        ));
    }

    for (field, value) in measurements.colors.fields() {
        ensure_non_negative_weight(field, value)?;
    }
    let shelled_weight = measurements
        .colors
        .checked_shelled_weight()
        .filter(|w| *w <= MAX_SAMPLE_WEIGHT)
        .ok_or_else(|| out_of_range("shelled_weight"))?;
    if shelled_weight <= Decimal::ZERO {
        return Err(ValidationError::on_field(
            "shelled_weight",
            "The computed shelled weight must be greater than 0.",
            "El peso de pulpa calculado debe ser mayor que 0.",
        ));
    }

    let yieldpercentage = shelled_weight
        .checked_div(inshell_weight)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(round_half_up)
        .filter(|y| *y <= MAX_YIELD_PERCENTAGE)
        .ok_or_else(|| out_of_range("yieldpercentage"))?;

    Ok(QcMetrics {
        units,
        shelled_weight,
        yieldpercentage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColorGrades, DefectCounts, SizeDistribution};
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn measurements() -> QcMeasurements {
        QcMeasurements {
            analyst: "Ana".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 19).unwrap(),
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
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

    // ========================================================================
    // Net weight
    // ========================================================================

    #[test]
    fn test_net_weight_subtracts_packaging_tare() {
        let net = compute_net_weight(Some(dec("1000")), Some(dec("200")), dec("2.5"), 10).unwrap();
        assert_eq!(net, dec("775.00"));
    }

    #[test]
    fn test_net_weight_rejects_loaded_below_empty() {
        let err = compute_net_weight(Some(dec("100")), Some(dec("150")), Decimal::ZERO, 1).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("loaded_truck_weight"));
        assert_eq!(err.message_es, "El peso cargado debe ser mayor al peso vacío.");
    }

    #[test]
    fn test_net_weight_rejects_equal_weights() {
        assert!(compute_net_weight(Some(dec("150")), Some(dec("150")), Decimal::ZERO, 1).is_err());
    }

    #[test]
    fn test_net_weight_requires_both_weights() {
        assert!(compute_net_weight(None, Some(dec("150")), Decimal::ZERO, 1).is_err());
        assert!(compute_net_weight(Some(dec("150")), None, Decimal::ZERO, 1).is_err());
    }

    #[test]
    fn test_net_weight_rejects_non_positive_loaded() {
        assert!(compute_net_weight(Some(Decimal::ZERO), Some(Decimal::ZERO), Decimal::ZERO, 1).is_err());
    }

    #[test]
    fn test_net_weight_rejects_negative_empty() {
        let err = compute_net_weight(Some(dec("10")), Some(dec("-1")), Decimal::ZERO, 1).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("empty_truck_weight"));
    }

    #[test]
    fn test_net_weight_rejects_tare_exceeding_load() {
        // 1000 - 200 - 80 * 10 = 0
        let err = compute_net_weight(Some(dec("1000")), Some(dec("200")), dec("80"), 10).unwrap_err();
        assert_eq!(err.message_es, "El peso neto calculado debe ser mayor que 0.");
    }

    #[test]
    fn test_net_weight_rounds_ties_away_from_zero() {
        // Banker's rounding would give 1000.12
        let net = compute_net_weight(Some(dec("1000.125")), Some(Decimal::ZERO), Decimal::ZERO, 1).unwrap();
        assert_eq!(net, dec("1000.13"));
        let net = compute_net_weight(Some(dec("500.005")), Some(Decimal::ZERO), Decimal::ZERO, 1).unwrap();
        assert_eq!(net, dec("500.01"));
    }

    #[test]
    fn test_net_weight_derives_from_rounded_truck_weights() {
        // Stored as 100.00 and 0.01
        let net = compute_net_weight(Some(dec("100.004")), Some(dec("0.006")), Decimal::ZERO, 1).unwrap();
        assert_eq!(net, dec("99.99"));
    }

    #[test]
    fn test_net_weight_rejects_unstorable_truck_weight() {
        let err = compute_net_weight(Some(dec("10000000000")), Some(dec("0")), Decimal::ZERO, 1)
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("loaded_truck_weight"));
        let err = compute_net_weight(Some(dec("100")), Some(dec("-10000000000")), Decimal::ZERO, 1)
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("empty_truck_weight"));
    }

    #[test]
    fn test_net_weight_tare_overflow_is_an_error() {
        let err = compute_net_weight(Some(dec("1000")), Some(dec("200")), Decimal::MAX, i32::MAX)
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("packaging_tare"));
    }

    #[test]
    fn test_net_weight_keeps_packaging_tare() {
        let computation =
            compute_net_weight_for_packaging(Some(dec("900")), Some(dec("100")), dec("1.5"), 4).unwrap();
        assert_eq!(computation.net_weight, dec("794.00"));
        assert_eq!(computation.packaging_tare, dec("1.5"));
    }

    // ========================================================================
    // QC metrics
    // ========================================================================

    #[test]
    fn test_qc_metrics_reference_sample() {
        let metrics = compute_qc_metrics(&measurements()).unwrap();
        assert_eq!(metrics.units, 100);
        assert_eq!(metrics.shelled_weight, dec("50"));
        assert_eq!(metrics.yieldpercentage, dec("50.00"));
    }

    #[test]
    fn test_qc_sizes_must_sum_to_100() {
        let mut m = measurements();
        m.sizes.morethan36 = 19;
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("units"));
        assert_eq!(err.message_es, "Las unidades analizadas deben sumar exactamente 100.");
    }

    #[test]
    fn test_qc_rejects_negative_size_class_even_when_sum_is_100() {
        let mut m = measurements();
        m.sizes.lessthan30 = -10;
        m.sizes.morethan36 = 50;
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("lessthan30"));
    }

    #[test]
    fn test_qc_rejects_negative_defect_count() {
        let mut m = measurements();
        m.defects.shrivel = -1;
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("shrivel"));
    }

    #[test]
    fn test_qc_rejects_non_positive_inshell_weight() {
        let mut m = measurements();
        m.inshell_weight = Decimal::ZERO;
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("inshell_weight"));
    }

    #[test]
    fn test_qc_rejects_zero_shelled_weight() {
        let mut m = measurements();
        m.colors = ColorGrades {
            yellow: dec("12"),
            ..ColorGrades::default()
        };
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("shelled_weight"));
    }

    #[test]
    fn test_qc_yellow_is_not_part_of_shelled_weight() {
        let mut m = measurements();
        m.colors.yellow = dec("30");
        let metrics = compute_qc_metrics(&m).unwrap();
        assert_eq!(metrics.shelled_weight, dec("50"));
    }

    #[test]
    fn test_qc_yield_rounds_half_up() {
        // 1 / 3 * 100 = 33.333...
        let mut m = measurements();
        m.inshell_weight = dec("3");
        m.colors = ColorGrades {
            extra_light: dec("1"),
            ..ColorGrades::default()
        };
        assert_eq!(compute_qc_metrics(&m).unwrap().yieldpercentage, dec("33.33"));

        // 1.01 / 8 * 100 = 12.625 -> 12.63
        m.inshell_weight = dec("8");
        m.colors.extra_light = dec("1.01");
        assert_eq!(compute_qc_metrics(&m).unwrap().yieldpercentage, dec("12.63"));
    }

    #[test]
    fn test_qc_weights_are_rounded_before_deriving_yield() {
        let mut m = measurements();
        m.inshell_weight = dec("100.004");
        m.colors.extra_light = dec("10.005");

        let normalized = normalize_qc_measurements(&m).unwrap();
        assert_eq!(normalized.inshell_weight, dec("100.00"));
        assert_eq!(normalized.colors.extra_light, dec("10.01"));

        // The stored measurements derive the same metrics again
        let metrics = compute_qc_metrics(&m).unwrap();
        assert_eq!(compute_qc_metrics(&normalized).unwrap(), metrics);
        assert_eq!(metrics.shelled_weight, dec("50.01"));
        assert_eq!(metrics.yieldpercentage, dec("50.01"));
    }

    #[test]
    fn test_qc_huge_grade_weight_is_rejected() {
        let mut m = measurements();
        m.inshell_weight = dec("0.0001");
        m.colors.extra_light = dec("10000000000000000000000000");
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("extra_light"));
        assert_eq!(err.message_es, "El valor de extra_light es demasiado grande.");
    }

    #[test]
    fn test_qc_inshell_weight_rounding_to_zero_is_rejected() {
        let mut m = measurements();
        m.inshell_weight = dec("0.0001");
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("inshell_weight"));
    }

    #[test]
    fn test_qc_shelled_weight_above_storable_range_is_rejected() {
        let mut m = measurements();
        m.colors = ColorGrades {
            extra_light: MAX_SAMPLE_WEIGHT,
            light: MAX_SAMPLE_WEIGHT,
            ..ColorGrades::default()
        };
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("shelled_weight"));
    }

    #[test]
    fn test_qc_yield_above_storable_range_is_rejected() {
        let mut m = measurements();
        m.inshell_weight = dec("0.01");
        m.colors = ColorGrades {
            extra_light: dec("1000"),
            ..ColorGrades::default()
        };
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("yieldpercentage"));

        // 99900 % still fits
        m.colors.extra_light = dec("9.99");
        m.inshell_weight = dec("0.01");
        assert!(compute_qc_metrics(&m).is_ok());
    }

    #[test]
    fn test_qc_size_total_does_not_overflow() {
        let mut m = measurements();
        m.sizes.lessthan30 = i32::MAX;
        m.sizes.between3032 = i32::MAX;
        let err = compute_qc_metrics(&m).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("units"));
    }

    #[test]
    fn test_storage_bounds() {
        assert_eq!(MAX_TRUCK_WEIGHT, dec("9999999999.99"));
        assert_eq!(MAX_SAMPLE_WEIGHT, dec("99999999.99"));
        assert_eq!(MAX_YIELD_PERCENTAGE, dec("99999.99"));
    }

    #[test]
    fn test_defect_total() {
        let defects = DefectCounts {
            broken_walnut: 2,
            empty: 3,
            active_fungus: 1,
            ..DefectCounts::default()
        };
        assert_eq!(defects.total(), 6);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_net_weight_matches_formula(
            loaded in 1_000i64..5_000_000,
            empty in 0i64..500_000,
            tare_cents in 0i64..500,
            quantity in 0i32..100,
        ) {
            let loaded = Decimal::new(loaded, 2);
            let empty = Decimal::new(empty, 2);
            let tare = Decimal::new(tare_cents, 2);
            let expected = loaded - empty - tare * Decimal::from(quantity);
            match compute_net_weight(Some(loaded), Some(empty), tare, quantity) {
                Ok(net) => {
                    prop_assert!(net > Decimal::ZERO);
                    prop_assert_eq!(net, expected);
                }
                Err(_) => prop_assert!(loaded <= empty || expected <= Decimal::ZERO),
            }
        }

        #[test]
        fn prop_qc_metrics_are_deterministic(
            inshell in 1i64..100_000,
            grades in prop::collection::vec(0i64..10_000, 4),
        ) {
            let mut m = measurements();
            m.inshell_weight = Decimal::new(inshell, 2);
            m.colors = ColorGrades {
                extra_light: Decimal::new(grades[0], 2),
                light: Decimal::new(grades[1], 2),
                light_amber: Decimal::new(grades[2], 2),
                amber: Decimal::new(grades[3], 2),
                yellow: Decimal::ZERO,
            };
            let first = compute_qc_metrics(&m);
            let second = compute_qc_metrics(&m);
            prop_assert_eq!(first.clone(), second);
            if let Ok(metrics) = first {
                prop_assert_eq!(metrics.units, 100);
                prop_assert!(metrics.yieldpercentage.scale() <= 2);
                let exact = metrics.shelled_weight / m.inshell_weight * Decimal::ONE_HUNDRED;
                prop_assert!((metrics.yieldpercentage - exact).abs() <= Decimal::new(5, 3));
            }
        }
    }
}
