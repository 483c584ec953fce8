//! Snapshot-backed store: state survives a restart and reassignment resumes.

mod common;

use std::sync::Arc;

use common::{config, mechanic, payload, service_item, user};
use mechanic_dispatch::builders::build_service;
use mechanic_dispatch::core::LedgerKind;
use mechanic_dispatch::infra::{open_file_store, FailPoint};

#[tokio::test(start_paused = true)]
async fn test_restart_restores_bookings_and_rearms() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("store.json");
    let customer = user(5_000);
    let oil = service_item("oil change", true);

    let booking = {
        let store = Arc::new(open_file_store(&path).unwrap());
        store.set_booking_fee(1_500);
        store.insert_user(customer.clone());
        store.insert_service(oil.clone());
        store.insert_mechanic(mechanic(0xA, 4.2));
        let svc = build_service(config(), Arc::clone(&store)).unwrap();
        let booking = svc
            .create_booking(payload("2026-11-02", vec![oil.id]), customer.id)
            .await
            .unwrap();
        svc.shutdown().await;
        booking
    };
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let reopened = Arc::new(open_file_store(&path).unwrap());
    assert_eq!(reopened.booking(booking.id).unwrap(), booking);
    assert_eq!(reopened.user(customer.id).unwrap().balance, 3_500);
    assert_eq!(reopened.vehicle_count(), 1);
    let entries = reopened.ledger_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, LedgerKind::Debit);

    let svc = build_service(config(), Arc::clone(&reopened)).unwrap();
    assert_eq!(svc.booking_fee().await.unwrap(), 1_500);
    assert_eq!(svc.start_all_schedulers().await.unwrap(), 1);
    assert!(svc.scheduler().is_armed(booking.id));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_failed_commit_leaves_snapshot_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let customer = user(5_000);
    let oil = service_item("oil change", true);

    let store = Arc::new(open_file_store(&path).unwrap());
    store.set_booking_fee(1_000);
    store.insert_user(customer.clone());
    store.insert_service(oil.clone());
    store.insert_mechanic(mechanic(0xA, 4.2));
    let before = std::fs::read_to_string(&path).unwrap();

    store.fail_next(FailPoint::Commit, 1);
    let svc = build_service(config(), Arc::clone(&store)).unwrap();
    assert!(svc
        .create_booking(payload("2026-11-02", vec![oil.id]), customer.id)
        .await
        .is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

    let reopened = open_file_store(&path).unwrap();
    assert_eq!(reopened.user(customer.id).unwrap().balance, 5_000);
    assert!(reopened.ledger_entries().is_empty());
    assert_eq!(reopened.vehicle_count(), 0);
}
