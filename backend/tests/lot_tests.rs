//! Reception, lot registration and weighing tests

mod common;

use std::sync::Arc;

use common::*;
use lotline_backend::ledger::{Ledger, LedgerTx};
use lotline_backend::services::lot::TruckWeightInput;
use lotline_backend::AppError;
use rust_decimal::Decimal;

fn weights(loaded: &str, empty: &str) -> TruckWeightInput {
    TruckWeightInput {
        loaded_truck_weight: Some(dec(loaded)),
        empty_truck_weight: Some(dec(empty)),
    }
}

// ============================================================================
// Lot creation
// ============================================================================

#[tokio::test]
async fn test_create_lot_starts_available_without_weight() {
    let fx = Fixture::new();
    let reception = fx.reception(1).await;
    let lot = fx.lots.create_lot(&fx.new_lot(reception.id, 7, false)).await.unwrap();

    assert_eq!(lot.display_number(), "007");
    assert_eq!(lot.net_weight, None);
    assert!(!lot.has_qc);
    assert_eq!(lot.fumigation_status, shared::FumigationStatus::Available);
}

#[tokio::test]
async fn test_duplicate_lot_number_is_a_validation_error() {
    let fx = Fixture::new();
    let first = fx.reception(1).await;
    let second = fx.reception(2).await;
    fx.lots.create_lot(&fx.new_lot(first.id, 12, false)).await.unwrap();

    match fx.lots.create_lot(&fx.new_lot(second.id, 12, false)).await.unwrap_err() {
        AppError::Validation { field, message_es, .. } => {
            assert_eq!(field.as_deref(), Some("lot_number"));
            assert_eq!(message_es, "El Lote 012 ya existe. Por favor, use un Lote distinto.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_lot_numbers_create_one_row() {
    let fx = Arc::new(Fixture::new());
    let mut receptions = Vec::new();
    for waybill in 1..=4 {
        receptions.push(fx.reception(waybill).await);
    }

    let handles: Vec<_> = receptions
        .iter()
        .map(|reception| {
            let fx = fx.clone();
            let input = fx.new_lot(reception.id, 55, false);
            tokio::spawn(async move { fx.lots.create_lot(&input).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, AppError::Validation { .. }), "got {e:?}"),
        }
    }
    assert_eq!(created, 1);

    let mut tx = fx.ledger.begin().await.unwrap();
    assert!(tx.find_lot_by_number(55).await.unwrap().is_some());
}

#[tokio::test]
async fn test_closed_reception_rejects_new_lots() {
    let fx = Fixture::new();
    let reception = fx.reception(1).await;
    fx.lots.create_lot(&fx.new_lot(reception.id, 1, true)).await.unwrap();

    match fx.lots.create_lot(&fx.new_lot(reception.id, 2, false)).await.unwrap_err() {
        AppError::Validation { message_es, .. } => {
            assert_eq!(message_es, "La recepción está cerrada y no admite nuevos lotes.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_lot_creation_keeps_reception_open() {
    let fx = Fixture::new();
    let reception = fx.reception(1).await;
    fx.lots.create_lot(&fx.new_lot(reception.id, 1, false)).await.unwrap();

    // Duplicate number with close requested: neither the lot nor the close lands
    assert!(fx.lots.create_lot(&fx.new_lot(reception.id, 1, true)).await.is_err());
    fx.lots.create_lot(&fx.new_lot(reception.id, 2, false)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_last_lot_submissions_close_once() {
    let fx = Arc::new(Fixture::new());
    let reception = fx.reception(1).await;

    let handles: Vec<_> = [10, 11]
        .into_iter()
        .map(|number| {
            let fx = fx.clone();
            let input = fx.new_lot(reception.id, number, true);
            tokio::spawn(async move { fx.lots.create_lot(&input).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_lot_requires_known_packaging() {
    let fx = Fixture::new();
    let reception = fx.reception(1).await;
    let mut input = fx.new_lot(reception.id, 1, false);
    input.lot.packaging_id = 9999;

    match fx.lots.create_lot(&input).await.unwrap_err() {
        AppError::Validation { message_es, .. } => {
            assert_eq!(message_es, "No se encontró el tipo de envase para este lote.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lot_rejects_non_positive_quantity() {
    let fx = Fixture::new();
    let reception = fx.reception(1).await;
    let mut input = fx.new_lot(reception.id, 1, false);
    input.lot.packagings_quantity = 0;

    assert!(matches!(
        fx.lots.create_lot(&input).await.unwrap_err(),
        AppError::Validation { .. }
    ));
}

#[tokio::test]
async fn test_lot_for_unknown_reception_is_not_found() {
    let fx = Fixture::new();
    let input = fx.new_lot(9999, 1, false);
    assert!(matches!(
        fx.lots.create_lot(&input).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

// ============================================================================
// Weighing
// ============================================================================

#[tokio::test]
async fn test_register_weight_stores_net_weight() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    let registration = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("1000", "200"))
        .await
        .unwrap();
    assert_eq!(registration.computation.net_weight, dec("775.00"));
    assert_eq!(registration.computation.packaging_tare, dec("2.5"));
    assert_eq!(registration.lot.net_weight, Some(dec("775.00")));

    let stored = fx.lots.get_lot(lot.id).await.unwrap();
    assert_eq!(stored.net_weight, Some(dec("775.00")));
    assert!(stored.mutation_token() > lot.mutation_token());
}

#[tokio::test]
async fn test_register_weight_upserts_single_record() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    let first = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("1000", "200"))
        .await
        .unwrap();
    let second = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("1100", "200"))
        .await
        .unwrap();

    assert_eq!(first.truck_weight.id, second.truck_weight.id);
    assert_eq!(second.truck_weight.loaded_truck_weight, dec("1100"));
    assert_eq!(second.lot.net_weight, Some(dec("875.00")));
    assert!(second.lot.mutation_token() > first.lot.mutation_token());
}

#[tokio::test]
async fn test_invalid_weights_leave_lot_untouched() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    let err = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("100", "150"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = fx
        .lots
        .register_full_truck_weight(
            lot.id,
            &TruckWeightInput {
                loaded_truck_weight: Some(dec("1000")),
                empty_truck_weight: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let stored = fx.lots.get_lot(lot.id).await.unwrap();
    assert_eq!(stored.net_weight, None);
    assert_eq!(stored.updated_at, None);

    let mut tx = fx.ledger.begin().await.unwrap();
    assert!(tx.find_truck_weight(lot.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_tare_exceeding_load_is_rejected() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    // 10 packagings x 2.5 kg = 25 kg of tare over a 20 kg load
    let err = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("220", "200"))
        .await
        .unwrap_err();
    match err {
        AppError::Validation { message_es, .. } => {
            assert_eq!(message_es, "El peso neto calculado debe ser mayor que 0.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_weighing_unknown_lot_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .lots
        .register_full_truck_weight(9999, &weights("1000", "200"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_weight_rounds_half_up() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    // 1000.125 is stored as 1000.13; 1000.13 - 0 - 25 = 975.13
    let registration = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("1000.125", "0"))
        .await
        .unwrap();
    assert_eq!(registration.computation.net_weight, dec("975.13"));
    assert!(registration.computation.net_weight > Decimal::ZERO);
}

#[tokio::test]
async fn test_stored_weights_recompute_the_stored_net_weight() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    let registration = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("1000.004", "200.006"))
        .await
        .unwrap();
    assert_eq!(registration.truck_weight.loaded_truck_weight, dec("1000.00"));
    assert_eq!(registration.truck_weight.empty_truck_weight, dec("200.01"));

    let mut tx = fx.ledger.begin().await.unwrap();
    let stored_lot = tx.find_lot(lot.id).await.unwrap().unwrap();
    let stored = tx.find_truck_weight(lot.id).await.unwrap().unwrap();
    tx.rollback().await.unwrap();

    let tare_total = fx.packaging.tare * Decimal::from(stored_lot.packagings_quantity);
    let recomputed = stored.loaded_truck_weight - stored.empty_truck_weight - tare_total;
    assert_eq!(stored_lot.net_weight, Some(recomputed));
    assert_eq!(recomputed, dec("774.99"));
}

#[tokio::test]
async fn test_oversized_truck_weight_is_rejected() {
    let fx = Fixture::new();
    let lot = fx.lots(&[1]).await.remove(0);

    let err = fx
        .lots
        .register_full_truck_weight(lot.id, &weights("10000000000", "200"))
        .await
        .unwrap_err();
    match err {
        AppError::Validation { field, .. } => {
            assert_eq!(field.as_deref(), Some("loaded_truck_weight"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fx.lots.get_lot(lot.id).await.unwrap().net_weight, None);
}
