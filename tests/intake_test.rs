//! Booking intake: fee debit, matching and atomic rollback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use common::{config, mechanic, mid, payload, service_item, store_with_fee, user};
use mechanic_dispatch::builders::build_service;
use mechanic_dispatch::core::{
    Account, BookingStatus, FulfillmentError, LedgerKind, LedgerStatus, StoreError,
};
use mechanic_dispatch::infra::{FailPoint, MemoryStore};
use mechanic_dispatch::runtime::FulfillmentService;
use uuid::Uuid;

fn service(store: &Arc<MemoryStore>) -> FulfillmentService<MemoryStore> {
    build_service(config(), Arc::clone(store)).unwrap()
}

#[tokio::test]
async fn test_create_booking_debits_fee_and_arms_scheduler() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    let oil = service_item("oil change", true);
    store.insert_user(customer.clone());
    store.insert_service(oil.clone());
    store.insert_mechanic(mechanic(0xA, 4.8));
    store.insert_mechanic(mechanic(0xB, 4.5));
    let svc = service(&store);

    let booking = svc
        .create_booking(payload("2026-11-02", vec![oil.id]), customer.id)
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.provisional_mechanic_id, mid(0xA));
    assert!(booking.confirmed_mechanic_id.is_none());
    assert_eq!(booking.service_ids, vec![oil.id]);
    assert_eq!(booking.fee, 1_000);
    assert!(booking.payment_ref.starts_with("REF"));
    assert_eq!(
        booking.next_execution_at,
        Some(booking.created_at + TimeDelta::hours(1))
    );
    assert!(booking.blacklisted().unwrap().is_empty());
    assert!(booking.visited().unwrap().is_empty());

    assert_eq!(store.user(customer.id).unwrap().balance, 4_000);
    assert_eq!(store.booking(booking.id).unwrap(), booking);
    assert_eq!(store.vehicle_count(), 1);

    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 1);
    let debit = &entries[0];
    assert_eq!(debit.account, Account::User(customer.id));
    assert_eq!(debit.kind, LedgerKind::Debit);
    assert_eq!(debit.status, LedgerStatus::Success);
    assert_eq!((debit.previous_balance, debit.current_balance), (5_000, 4_000));
    assert!(debit.reference.starts_with("debit_"));

    assert!(svc.scheduler().is_armed(booking.id));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_funds_mutates_nothing() {
    let store = store_with_fee(1_000);
    let customer = user(500);
    store.insert_user(customer.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    let svc = service(&store);

    let err = svc
        .create_booking(payload("2026-11-02", vec![]), customer.id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FulfillmentError::InsufficientFunds { balance: 500, fee: 1_000 }
    ));
    assert_eq!(store.user(customer.id).unwrap().balance, 500);
    assert!(store.ledger_entries().is_empty());
    assert_eq!(store.vehicle_count(), 0);
    assert_eq!(store.calls(FailPoint::Begin), 0);
    assert_eq!(svc.scheduler().armed_count(), 0);
}

#[tokio::test]
async fn test_failed_booking_insert_rolls_back_debit() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    store.insert_user(customer.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    store.fail_next(FailPoint::CreateBooking, 1);
    let svc = service(&store);

    let err = svc
        .create_booking(payload("2026-11-02", vec![]), customer.id)
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Store(StoreError::Unavailable(_))));
    assert_eq!(store.user(customer.id).unwrap().balance, 5_000);
    assert!(store.ledger_entries().is_empty());
    assert_eq!(store.vehicle_count(), 0);
    assert!(svc.user_bookings(customer.id).await.unwrap().is_empty());
    assert_eq!(svc.scheduler().armed_count(), 0);
}

#[tokio::test]
async fn test_failed_commit_applies_nothing() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    store.insert_user(customer.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    store.fail_next(FailPoint::Commit, 1);
    let svc = service(&store);

    assert!(svc
        .create_booking(payload("2026-11-02", vec![]), customer.id)
        .await
        .is_err());
    assert_eq!(store.user(customer.id).unwrap().balance, 5_000);
    assert!(store.ledger_entries().is_empty());
    assert_eq!(svc.scheduler().armed_count(), 0);
}

#[tokio::test]
async fn test_no_mechanic_rolls_back() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    store.insert_user(customer.clone());
    let svc = service(&store);

    let err = svc
        .create_booking(payload("2026-11-02", vec![]), customer.id)
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::NoMechanic));
    assert_eq!(store.user(customer.id).unwrap().balance, 5_000);
    assert!(store.ledger_entries().is_empty());
}

#[tokio::test]
async fn test_unknown_service_aborts_intake() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    store.insert_user(customer.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    let svc = service(&store);

    let err = svc
        .create_booking(payload("2026-11-02", vec![Uuid::new_v4()]), customer.id)
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::NotFound(_)));
    assert_eq!(store.user(customer.id).unwrap().balance, 5_000);
}

#[tokio::test]
async fn test_unavailable_service_is_rejected() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    let retired = service_item("carburettor tuning", false);
    store.insert_user(customer.clone());
    store.insert_service(retired.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    let svc = service(&store);

    let err = svc
        .create_booking(payload("2026-11-02", vec![retired.id]), customer.id)
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Validation(ref msg) if msg.contains("carburettor")));
    assert!(store.ledger_entries().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_rejected_before_any_read() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    store.insert_user(customer.clone());
    let svc = service(&store);

    let err = svc
        .create_booking(payload("02/11/2026", vec![]), customer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));

    let mut missing_address = payload("2026-11-02", vec![]);
    missing_address.location.address = "  ".into();
    let err = svc
        .create_booking(missing_address, customer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(ref msg) if msg.contains("address")));

    assert_eq!(store.calls(FailPoint::BookingFee), 0);
    assert_eq!(store.calls(FailPoint::GetUser), 0);
}

#[tokio::test(start_paused = true)]
async fn test_services_and_matching_run_concurrently() {
    let store = store_with_fee(1_000);
    let customer = user(5_000);
    let a = service_item("brakes", true);
    let b = service_item("tyres", true);
    store.insert_user(customer.clone());
    store.insert_service(a.clone());
    store.insert_service(b.clone());
    store.insert_mechanic(mechanic(1, 4.0));
    store.delay(FailPoint::GetService, Duration::from_millis(100));
    store.delay(FailPoint::MaxRating, Duration::from_millis(100));
    let svc = service(&store);

    let started = tokio::time::Instant::now();
    let booking = svc
        .create_booking(payload("2026-11-02", vec![a.id, b.id]), customer.id)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(booking.service_ids, vec![a.id, b.id]);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_intakes_cannot_overdraw() {
    let store = store_with_fee(1_000);
    let customer = user(1_000);
    let oil = service_item("oil change", true);
    store.insert_user(customer.clone());
    store.insert_service(oil.clone());
    store.insert_mechanic(mechanic(0xA, 4.8));
    store.delay(FailPoint::MaxRating, Duration::from_millis(100));
    let svc = service(&store);

    let (first, second) = tokio::join!(
        svc.create_booking(payload("2026-11-02", vec![oil.id]), customer.id),
        svc.create_booking(payload("2026-11-03", vec![oil.id]), customer.id),
    );

    let (ok, err): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(Result::is_ok);
    assert_eq!(ok.len(), 1);
    assert!(matches!(
        err[0],
        Err(FulfillmentError::InsufficientFunds { balance: 0, fee: 1_000 })
    ));
    assert_eq!(store.user(customer.id).unwrap().balance, 0);
    assert_eq!(store.ledger_entries().len(), 1);
    assert_eq!(store.vehicle_count(), 1);

    svc.shutdown().await;
}
