use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::*;
use crate::{
    adapters::{EscrowOp, EscrowTransaction, LedgerClient},
    config::ReconcileConfig,
    error::{AppError, AppResult, EscrowError},
    ledger::{
        models::{Agreement, AgreementStatus, AuditEventType, PaymentDirection},
        store::PaymentStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub reconcile: ReconcileConfig,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create a rent agreement and bring its escrow contract onto the ledger.
/// POST /api/v1/agreements
///
/// The agreement stays `uninitialized` until the sweep sees the initialize
/// transaction reach finality.
pub async fn create_agreement(
    State(state): State<AppState>,
    Json(request): Json<CreateAgreementRequest>,
) -> AppResult<Json<AgreementResponse>> {
    if request.rent_amount <= 0 {
        return Err(EscrowError::InvalidAmount(request.rent_amount).into());
    }
    if request.tenant_ids.is_empty() {
        return Err(AppError::InvalidInput(
            "an agreement needs at least one tenant".to_string(),
        ));
    }

    let contract_ref = format!("escrow-{}", Uuid::new_v4());
    let tx = EscrowTransaction::new(
        contract_ref.clone(),
        EscrowOp::Initialize {
            landlord_id: request.landlord_id,
            tenant_ids: request.tenant_ids.clone(),
            rent_amount: request.rent_amount,
        },
        Uuid::new_v4(),
        0,
    );
    let init_submission_ref = state.ledger.submit(&tx).await?;

    let agreement = state
        .store
        .create_agreement(
            request.landlord_id,
            request.tenant_ids,
            request.rent_amount,
            contract_ref,
            Some(init_submission_ref),
        )
        .await?;

    info!(
        "Agreement {} created, escrow contract {} initializing",
        agreement.agreement_id, agreement.contract_ref
    );
    state
        .store
        .record_audit_event(
            AuditEventType::AgreementCreated,
            Some(agreement.agreement_id),
            None,
            serde_json::json!({ "rent_amount": agreement.rent_amount }),
        )
        .await?;

    Ok(Json(AgreementResponse::from_agreement(agreement, 0)))
}

/// GET /api/v1/agreements/:id
pub async fn get_agreement_status(
    State(state): State<AppState>,
    Path(agreement_id): Path<Uuid>,
) -> AppResult<Json<AgreementResponse>> {
    let agreement = fetch_agreement(&state, agreement_id).await?;
    let (deposits, withdrawals) = state.store.confirmed_totals(agreement_id).await?;

    Ok(Json(AgreementResponse::from_agreement(
        agreement,
        deposits - withdrawals,
    )))
}

/// GET /api/v1/agreements/:id/payments
pub async fn get_payment_history(
    State(state): State<AppState>,
    Path(agreement_id): Path<Uuid>,
) -> AppResult<Json<Vec<PaymentResponse>>> {
    fetch_agreement(&state, agreement_id).await?;
    let records = state.store.payments_for_agreement(agreement_id).await?;

    Ok(Json(records.into_iter().map(PaymentResponse::from).collect()))
}

/// Start a deposit or withdrawal. The reconciliation engine picks the
/// record up from `pending` and carries it to a terminal state.
/// POST /api/v1/payments
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> AppResult<Json<PaymentResponse>> {
    let agreement = fetch_agreement(&state, request.agreement_id).await?;

    if agreement.status != AgreementStatus::Active {
        return Err(EscrowError::NotActive {
            current: agreement.status.as_str().to_string(),
        }
        .into());
    }

    let amount = match request.direction {
        PaymentDirection::Deposit => {
            if !agreement.tenant_ids.contains(&request.payer_id) {
                return Err(AppError::Unauthorized);
            }
            let amount = request
                .amount
                .ok_or_else(|| AppError::InvalidInput("deposit amount is required".to_string()))?;
            if amount <= 0 {
                return Err(EscrowError::InvalidAmount(amount).into());
            }
            amount
        }
        PaymentDirection::Withdrawal => {
            if request.payer_id != agreement.landlord_id {
                return Err(AppError::Unauthorized);
            }
            let (deposits, withdrawals) = state
                .store
                .confirmed_totals(request.agreement_id)
                .await?;
            let balance = deposits - withdrawals;
            if balance <= 0 {
                return Err(AppError::InvalidInput(
                    "escrow holds nothing to withdraw".to_string(),
                ));
            }
            balance
        }
    };

    let record = state
        .store
        .create_payment(
            request.agreement_id,
            request.payer_id,
            request.direction,
            amount,
            Duration::seconds(state.reconcile.duplicate_debounce_secs),
        )
        .await?;

    info!(
        "Payment {} initiated: {} {} on agreement {}",
        record.record_id,
        record.direction.as_str(),
        record.amount,
        record.agreement_id
    );
    state
        .store
        .record_audit_event(
            AuditEventType::PaymentCreated,
            Some(record.agreement_id),
            Some(record.record_id),
            serde_json::json!({
                "direction": record.direction,
                "amount": record.amount,
            }),
        )
        .await?;

    Ok(Json(PaymentResponse::from(record)))
}

/// GET /api/v1/payments/:id
pub async fn get_payment(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> AppResult<Json<PaymentResponse>> {
    let record = state
        .store
        .get_payment(record_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))?;

    Ok(Json(PaymentResponse::from(record)))
}

/// Freeze an agreement pending external resolution.
/// POST /api/v1/agreements/:id/dispute
pub async fn dispute_agreement(
    State(state): State<AppState>,
    Path(agreement_id): Path<Uuid>,
    Json(request): Json<LifecycleRequest>,
) -> AppResult<Json<AgreementResponse>> {
    let agreement = fetch_agreement(&state, agreement_id).await?;

    let is_party = request.actor_id == agreement.landlord_id
        || agreement.tenant_ids.contains(&request.actor_id);
    if !is_party {
        return Err(AppError::Unauthorized);
    }
    if agreement.status != AgreementStatus::Active {
        return Err(EscrowError::NotActive {
            current: agreement.status.as_str().to_string(),
        }
        .into());
    }

    // Record the dispute locally even if the ledger is briefly unreachable:
    // disputed is terminal pending human resolution either way, and the
    // sweep surfaces any disagreement with the contract.
    let tx = EscrowTransaction::new(
        agreement.contract_ref.clone(),
        EscrowOp::Dispute {
            caller_id: request.actor_id,
        },
        Uuid::new_v4(),
        0,
    );
    if let Err(e) = state.ledger.submit(&tx).await {
        warn!(
            "Dispute submission for agreement {} did not go through: {}",
            agreement_id, e
        );
    }

    state
        .store
        .set_agreement_status(agreement_id, AgreementStatus::Disputed)
        .await?;
    state
        .store
        .record_audit_event(
            AuditEventType::AgreementDisputed,
            Some(agreement_id),
            None,
            serde_json::json!({ "actor_id": request.actor_id }),
        )
        .await?;

    get_agreement_status(State(state), Path(agreement_id)).await
}

/// Close out a fully paid and fully withdrawn agreement.
/// POST /api/v1/agreements/:id/settle
pub async fn settle_agreement(
    State(state): State<AppState>,
    Path(agreement_id): Path<Uuid>,
    Json(request): Json<LifecycleRequest>,
) -> AppResult<Json<AgreementResponse>> {
    let agreement = fetch_agreement(&state, agreement_id).await?;

    if request.actor_id != agreement.landlord_id {
        return Err(AppError::Unauthorized);
    }
    if agreement.status != AgreementStatus::Active {
        return Err(EscrowError::NotActive {
            current: agreement.status.as_str().to_string(),
        }
        .into());
    }
    if state.store.has_inflight(agreement_id).await? {
        return Err(AppError::InvalidInput(
            "payments are still in flight".to_string(),
        ));
    }
    let (deposits, withdrawals) = state.store.confirmed_totals(agreement_id).await?;
    if deposits - withdrawals != 0 {
        return Err(EscrowError::BalanceOutstanding(deposits - withdrawals).into());
    }

    let tx = EscrowTransaction::new(
        agreement.contract_ref.clone(),
        EscrowOp::Settle {
            caller_id: request.actor_id,
        },
        Uuid::new_v4(),
        0,
    );
    state.ledger.submit(&tx).await?;

    state
        .store
        .set_agreement_status(agreement_id, AgreementStatus::Settled)
        .await?;
    state
        .store
        .record_audit_event(
            AuditEventType::AgreementSettled,
            Some(agreement_id),
            None,
            serde_json::json!({ "actor_id": request.actor_id }),
        )
        .await?;
    info!("Agreement {} settled", agreement_id);

    get_agreement_status(State(state), Path(agreement_id)).await
}

async fn fetch_agreement(state: &AppState, agreement_id: Uuid) -> AppResult<Agreement> {
    state
        .store
        .get_agreement(agreement_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Agreement {}", agreement_id)))
}
