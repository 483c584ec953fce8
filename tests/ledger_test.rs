//! Wallet funding and settlement through the ledger.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, mechanic, payload, service_item, shared_sink, store_with_fee, user};
use mechanic_dispatch::builders::build_service_with_audit;
use mechanic_dispatch::core::{
    Account, AuditAction, AuditLog, FulfillmentError, Ledger, LedgerKind, LedgerStatus,
    TransactionalStore,
};
use mechanic_dispatch::infra::FailPoint;
use mechanic_dispatch::runtime::FundWallet;

#[tokio::test]
async fn test_fund_then_confirm_credits_balance() {
    let store = store_with_fee(0);
    let customer = user(2_000);
    store.insert_user(customer.clone());
    let sink = shared_sink();
    let svc = build_service_with_audit(config(), Arc::clone(&store), Box::new(Arc::clone(&sink)))
        .unwrap();

    let pending = svc
        .fund_wallet(
            customer.id,
            FundWallet {
                amount: 3_000,
                description: Some("top up".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.status, LedgerStatus::Pending);
    assert_eq!(pending.kind, LedgerKind::Credit);
    assert!(pending.reference.starts_with("credit_"));
    assert_eq!(store.user(customer.id).unwrap().balance, 2_000);

    let settled = svc
        .confirm_payment(customer.id, &pending.reference)
        .await
        .unwrap();
    assert_eq!(settled.status, LedgerStatus::Success);
    assert_eq!((settled.previous_balance, settled.current_balance), (2_000, 5_000));
    assert_eq!(store.user(customer.id).unwrap().balance, 5_000);

    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0], settled);

    let events = sink.lock().events_for(&pending.reference);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::CreditConfirmed);
}

#[tokio::test]
async fn test_second_confirmation_conflicts() {
    let store = store_with_fee(0);
    let customer = user(0);
    store.insert_user(customer.clone());
    let ledger = Ledger::new(Arc::clone(&store), AuditLog::disabled());

    let pending = ledger.initiate_credit(customer.id, 700, None).await.unwrap();
    ledger.confirm_credit(&pending.reference, None).await.unwrap();
    let err = ledger
        .confirm_credit(&pending.reference, None)
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Conflict(ref msg) if msg.contains("already confirmed")));
    assert_eq!(store.user(customer.id).unwrap().balance, 700);
}

#[tokio::test]
async fn test_confirm_unknown_or_foreign_reference_is_not_found() {
    let store = store_with_fee(0);
    let owner = user(0);
    let stranger = user(0);
    store.insert_user(owner.clone());
    store.insert_user(stranger.clone());
    let svc = mechanic_dispatch::builders::build_service(config(), Arc::clone(&store)).unwrap();

    let err = svc.confirm_payment(owner.id, "credit_missing").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::NotFound(_)));

    let pending = svc
        .fund_wallet(owner.id, FundWallet { amount: 100, description: None })
        .await
        .unwrap();
    let err = svc
        .confirm_payment(stranger.id, &pending.reference)
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::NotFound(_)));
    assert_eq!(store.user(owner.id).unwrap().balance, 0);
}

#[tokio::test]
async fn test_failed_settlement_changes_nothing() {
    let store = store_with_fee(0);
    let customer = user(50);
    store.insert_user(customer.clone());
    let ledger = Ledger::new(Arc::clone(&store), AuditLog::disabled());
    let pending = ledger.initiate_credit(customer.id, 100, None).await.unwrap();

    store.fail_next(FailPoint::SetBalance, 1);
    assert!(ledger.confirm_credit(&pending.reference, None).await.is_err());
    assert_eq!(store.user(customer.id).unwrap().balance, 50);
    assert_eq!(
        store.ledger_entries()[0].status,
        LedgerStatus::Pending
    );

    let settled = ledger
        .confirm_credit(&pending.reference, Some(80))
        .await
        .unwrap();
    assert_eq!(settled.current_balance, 130);
    assert_eq!(store.user(customer.id).unwrap().balance, 130);
}

#[tokio::test]
async fn test_debit_checks_funds_before_staging() {
    let store = store_with_fee(0);
    let customer = user(100);
    store.insert_user(customer.clone());
    let ledger = Ledger::new(Arc::clone(&store), AuditLog::disabled());

    let mut tx = store.begin().await.unwrap();
    let err = ledger
        .debit(tx.as_mut(), Account::User(customer.id), 100, 150, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::InsufficientFunds { balance: 100, fee: 150 }
    ));
    assert_eq!(store.calls(FailPoint::SetBalance), 0);

    let entry = ledger
        .debit(tx.as_mut(), Account::User(customer.id), 100, 60, None)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(entry.current_balance, 40);
    assert_eq!(store.user(customer.id).unwrap().balance, 40);
    assert_eq!(store.ledger_entries(), vec![entry]);
}

#[tokio::test]
async fn test_non_positive_credit_rejected() {
    let store = store_with_fee(0);
    let customer = user(0);
    store.insert_user(customer.clone());
    let ledger = Ledger::new(Arc::clone(&store), AuditLog::disabled());

    let err = ledger.initiate_credit(customer.id, 0, None).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));
    assert!(store.ledger_entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_confirmations_credit_once() {
    let store = store_with_fee(0);
    let customer = user(0);
    store.insert_user(customer.clone());
    let sink = shared_sink();
    let svc = build_service_with_audit(config(), Arc::clone(&store), Box::new(Arc::clone(&sink)))
        .unwrap();
    let pending = svc
        .fund_wallet(customer.id, FundWallet { amount: 500, description: None })
        .await
        .unwrap();

    store.delay(FailPoint::Begin, Duration::from_millis(50));
    let (first, second) = tokio::join!(
        svc.confirm_payment(customer.id, &pending.reference),
        svc.confirm_payment(customer.id, &pending.reference),
    );

    let (ok, err): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(Result::is_ok);
    assert_eq!(ok.len(), 1);
    assert!(matches!(err[0], Err(FulfillmentError::Conflict(_))));
    assert_eq!(store.user(customer.id).unwrap().balance, 500);
    let confirmations = sink
        .lock()
        .events_for(&pending.reference)
        .into_iter()
        .filter(|e| e.action == AuditAction::CreditConfirmed)
        .count();
    assert_eq!(confirmations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_racing_booking_fee_keeps_both() {
    let store = store_with_fee(1_000);
    let customer = user(1_000);
    let oil = service_item("oil change", true);
    store.insert_user(customer.clone());
    store.insert_service(oil.clone());
    store.insert_mechanic(mechanic(0xA, 4.5));
    let svc = mechanic_dispatch::builders::build_service(config(), Arc::clone(&store)).unwrap();
    let pending = svc
        .fund_wallet(customer.id, FundWallet { amount: 500, description: None })
        .await
        .unwrap();

    store.delay(FailPoint::Begin, Duration::from_millis(50));
    let (booking, settled) = tokio::join!(
        svc.create_booking(payload("2026-11-02", vec![oil.id]), customer.id),
        svc.confirm_payment(customer.id, &pending.reference),
    );

    booking.unwrap();
    settled.unwrap();
    assert_eq!(store.user(customer.id).unwrap().balance, 500);
    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == LedgerStatus::Success));

    svc.shutdown().await;
}
