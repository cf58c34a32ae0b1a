//! Quality-control service tests

mod common;

use common::*;
use lotline_backend::services::qc::QcService;
use lotline_backend::AppError;
use proptest::prelude::*;
use shared::{compute_qc_metrics, LotQcInput, QcImages, SampleQcInput};

fn images() -> QcImages {
    QcImages {
        inshell_image_path: Some("uploads/inshell_1.jpg".to_string()),
        shelled_image_path: None,
    }
}

#[test]
fn test_validate_reference_sample() {
    let metrics = QcService::validate(&measurements()).unwrap();
    assert_eq!(metrics.units, 100);
    assert_eq!(metrics.shelled_weight, dec("50"));
    assert_eq!(metrics.yieldpercentage, dec("50.00"));
}

#[test]
fn test_validate_rejects_sizes_summing_to_99() {
    let mut m = measurements();
    m.sizes.between3436 = 19;
    match QcService::validate(&m).unwrap_err() {
        AppError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("units")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_validate_requires_analyst() {
    let mut m = measurements();
    m.analyst = "  ".to_string();
    assert!(matches!(
        QcService::validate(&m).unwrap_err(),
        AppError::Validation { .. }
    ));
}

#[tokio::test]
async fn test_lot_qc_latches_has_qc() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);
    let qc = QcService::new(fx.ledger.clone());

    let record = qc
        .create_lot_qc(
            &LotQcInput {
                lot_id: lot.id,
                measurements: measurements(),
            },
            &images(),
        )
        .await
        .unwrap();
    assert_eq!(record.metrics.yieldpercentage, dec("50.00"));
    assert_eq!(
        record.images.inshell_image_path.as_deref(),
        Some("uploads/inshell_1.jpg")
    );

    let stored = fx.lots.get_lot(lot.id).await.unwrap();
    assert!(stored.has_qc);
    assert_eq!(qc.find_lot_qc(lot.id).await.unwrap().id, record.id);
}

#[tokio::test]
async fn test_second_lot_qc_is_rejected() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);
    let qc = QcService::new(fx.ledger.clone());
    let input = LotQcInput {
        lot_id: lot.id,
        measurements: measurements(),
    };

    qc.create_lot_qc(&input, &QcImages::default()).await.unwrap();
    match qc.create_lot_qc(&input, &QcImages::default()).await.unwrap_err() {
        AppError::Validation { message_es, .. } => {
            assert_eq!(message_es, "El lote seleccionado ya tiene un registro QC.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lot_qc_for_unknown_lot() {
    let fx = Fixture::new();
    let qc = QcService::new(fx.ledger.clone());

    let err = qc
        .create_lot_qc(
            &LotQcInput {
                lot_id: 9999,
                measurements: measurements(),
            },
            &QcImages::default(),
        )
        .await
        .unwrap_err();
    match err {
        AppError::Validation { message_es, .. } => {
            assert_eq!(message_es, "El lote seleccionado no existe.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_lot_qc_leaves_lot_unflagged() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);
    let qc = QcService::new(fx.ledger.clone());
    let mut m = measurements();
    m.inshell_weight = dec("0");

    assert!(qc
        .create_lot_qc(
            &LotQcInput {
                lot_id: lot.id,
                measurements: m,
            },
            &QcImages::default(),
        )
        .await
        .is_err());
    assert!(!fx.lots.get_lot(lot.id).await.unwrap().has_qc);
    assert!(matches!(
        qc.find_lot_qc(lot.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_samples_have_no_lot_latch() {
    let fx = Fixture::new();
    let qc = QcService::new(fx.ledger.clone());
    let input = SampleQcInput {
        grower: "Agrícola Los Nogales".to_string(),
        brought_by: "Pedro".to_string(),
        measurements: measurements(),
    };

    let first = qc.create_sample_qc(&input, &images()).await.unwrap();
    let second = qc.create_sample_qc(&input, &images()).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(qc.find_sample_qc(second.id).await.unwrap().grower, input.grower);
}

#[tokio::test]
async fn test_sample_requires_grower() {
    let fx = Fixture::new();
    let qc = QcService::new(fx.ledger.clone());
    let input = SampleQcInput {
        grower: String::new(),
        brought_by: "Pedro".to_string(),
        measurements: measurements(),
    };
    match qc.create_sample_qc(&input, &QcImages::default()).await.unwrap_err() {
        AppError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("grower")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_stored_lot_qc_recomputes_its_metrics() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);
    let qc = QcService::new(fx.ledger.clone());

    let mut m = measurements();
    m.inshell_weight = dec("100.004");
    m.colors.extra_light = dec("10.005");
    qc.create_lot_qc(
        &LotQcInput {
            lot_id: lot.id,
            measurements: m,
        },
        &images(),
    )
    .await
    .unwrap();

    let stored = qc.find_lot_qc(lot.id).await.unwrap();
    assert_eq!(stored.measurements.inshell_weight, dec("100.00"));
    assert_eq!(stored.measurements.colors.extra_light, dec("10.01"));
    assert_eq!(compute_qc_metrics(&stored.measurements).unwrap(), stored.metrics);
}

#[tokio::test]
async fn test_unstorable_weights_are_rejected_without_side_effects() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);
    let qc = QcService::new(fx.ledger.clone());

    let mut m = measurements();
    m.inshell_weight = dec("0.0001");
    m.colors.extra_light = dec("10000000000000000000000000");
    let err = qc
        .create_lot_qc(
            &LotQcInput {
                lot_id: lot.id,
                measurements: m.clone(),
            },
            &images(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert!(!fx.lots.get_lot(lot.id).await.unwrap().has_qc);

    let err = qc
        .create_sample_qc(
            &SampleQcInput {
                grower: "Agrícola Sur".to_string(),
                brought_by: "Pedro".to_string(),
                measurements: m,
            },
            &images(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Validate-then-persist derives the same figures on every call
    #[test]
    fn prop_validate_is_stable(sizes in prop::collection::vec(0i32..=25, 4)) {
        let total: i32 = sizes.iter().sum();
        let mut m = measurements();
        m.sizes.lessthan30 = sizes[0];
        m.sizes.between3032 = sizes[1];
        m.sizes.between3234 = sizes[2];
        m.sizes.between3436 = sizes[3];
        m.sizes.morethan36 = 100 - total;

        let first = QcService::validate(&m).unwrap();
        let second = QcService::validate(&m).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(first.units, 100);
    }
}
