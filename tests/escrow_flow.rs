mod common;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use common::harness;
use rentledger::api::handler::{
    create_agreement, dispute_agreement, get_agreement_status, get_payment_history,
    initiate_payment, settle_agreement,
};
use rentledger::api::models::{CreateAgreementRequest, InitiatePaymentRequest, LifecycleRequest};
use rentledger::error::AppError;
use rentledger::escrow::ContractStatus;
use rentledger::ledger::models::{AgreementStatus, PaymentDirection};
use rentledger::ledger::PaymentStore;
use rentledger::adapters::LedgerClient;

/// The full rent cycle: tenant deposits the rent, escrow holds it,
/// landlord withdraws, agreement settles.
#[tokio::test]
async fn test_rent_cycle_deposit_withdraw_settle() {
    let h = harness();
    let state = h.state();
    let landlord = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    // Create through the API: the agreement is not active until the ledger
    // confirms the initialize transaction.
    let Json(created) = create_agreement(
        State(state.clone()),
        Json(CreateAgreementRequest {
            landlord_id: landlord,
            tenant_ids: vec![tenant],
            rent_amount: 1000,
        }),
    )
    .await
    .unwrap();
    assert_eq!(created.status, "uninitialized");

    h.sweep.run_once().await.unwrap();
    let Json(activated) = get_agreement_status(State(state.clone()), Path(created.agreement_id))
        .await
        .unwrap();
    assert_eq!(activated.status, "active");

    // Tenant deposits the full rent
    let Json(deposit) = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: created.agreement_id,
            payer_id: tenant,
            direction: PaymentDirection::Deposit,
            amount: Some(1000),
        }),
    )
    .await
    .unwrap();
    assert_eq!(deposit.status, "pending");

    // pending -> submitted -> confirmed
    h.drive(2).await;
    let record = h.store.get_payment(deposit.record_id).await.unwrap().unwrap();
    assert_eq!(record.user_visible_status(), "confirmed");
    assert_eq!(
        h.ledger.query_balance(&created.contract_ref).await.unwrap(),
        1000
    );

    // Landlord withdraws; the request drains the confirmed balance
    let Json(withdrawal) = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: created.agreement_id,
            payer_id: landlord,
            direction: PaymentDirection::Withdrawal,
            amount: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(withdrawal.amount, 1000);

    h.drive(2).await;
    assert_eq!(
        h.ledger.query_balance(&created.contract_ref).await.unwrap(),
        0
    );

    let Json(history) = get_payment_history(State(state.clone()), Path(created.agreement_id))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|p| p.status == "confirmed"));

    // Escrow drained, nothing in flight: the landlord can settle
    let Json(settled) = settle_agreement(
        State(state.clone()),
        Path(created.agreement_id),
        Json(LifecycleRequest { actor_id: landlord }),
    )
    .await
    .unwrap();
    assert_eq!(settled.status, "settled");
    assert_eq!(
        h.ledger.contract_status(&created.contract_ref),
        Some(ContractStatus::Settled)
    );
}

#[tokio::test]
async fn test_payment_authorization_is_enforced() {
    let h = harness();
    let state = h.state();
    let landlord = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let agreement = h.active_agreement(landlord, vec![tenant], 1000).await;

    // Outsiders may not deposit
    let err = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: agreement.agreement_id,
            payer_id: outsider,
            direction: PaymentDirection::Deposit,
            amount: Some(500),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    // Tenants may not withdraw
    let err = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: agreement.agreement_id,
            payer_id: tenant,
            direction: PaymentDirection::Withdrawal,
            amount: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    // Non-positive deposits are rejected before anything is persisted
    let err = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: agreement.agreement_id,
            payer_id: tenant,
            direction: PaymentDirection::Deposit,
            amount: Some(0),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Escrow(_)));

    let history = h
        .store
        .payments_for_agreement(agreement.agreement_id)
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_duplicate_submission_is_debounced() {
    let h = harness();
    let state = h.state();
    let landlord = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let agreement = h.active_agreement(landlord, vec![tenant], 1000).await;

    let request = || InitiatePaymentRequest {
        agreement_id: agreement.agreement_id,
        payer_id: tenant,
        direction: PaymentDirection::Deposit,
        amount: Some(1000),
    };

    initiate_payment(State(state.clone()), Json(request()))
        .await
        .unwrap();

    // Double-click: the first record is still in flight
    let err = initiate_payment(State(state.clone()), Json(request()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Reconcile(_)));

    // Once the first record is terminal the same tuple is legitimate again
    // (next month's rent)
    h.drive(2).await;
    initiate_payment(State(state.clone()), Json(request()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dispute_freezes_agreement() {
    let h = harness();
    let state = h.state();
    let landlord = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let agreement = h.active_agreement(landlord, vec![tenant], 1000).await;

    // Only parties to the agreement may dispute
    let err = dispute_agreement(
        State(state.clone()),
        Path(agreement.agreement_id),
        Json(LifecycleRequest {
            actor_id: Uuid::new_v4(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    let Json(disputed) = dispute_agreement(
        State(state.clone()),
        Path(agreement.agreement_id),
        Json(LifecycleRequest { actor_id: tenant }),
    )
    .await
    .unwrap();
    assert_eq!(disputed.status, "disputed");
    assert_eq!(
        h.ledger.contract_status(&agreement.contract_ref),
        Some(ContractStatus::Disputed)
    );

    // A disputed agreement accepts no further payments
    let err = initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: agreement.agreement_id,
            payer_id: tenant,
            direction: PaymentDirection::Deposit,
            amount: Some(1000),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Escrow(_)));
}

#[tokio::test]
async fn test_settle_requires_drained_escrow() {
    let h = harness();
    let state = h.state();
    let landlord = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let agreement = h.active_agreement(landlord, vec![tenant], 1000).await;

    initiate_payment(
        State(state.clone()),
        Json(InitiatePaymentRequest {
            agreement_id: agreement.agreement_id,
            payer_id: tenant,
            direction: PaymentDirection::Deposit,
            amount: Some(1000),
        }),
    )
    .await
    .unwrap();
    h.drive(2).await;

    // Rent is confirmed but not withdrawn
    let err = settle_agreement(
        State(state.clone()),
        Path(agreement.agreement_id),
        Json(LifecycleRequest { actor_id: landlord }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Escrow(_)));

    let agreement_row = h
        .store
        .get_agreement(agreement.agreement_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agreement_row.status, AgreementStatus::Active);
}
