use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::models::{Agreement, PaymentDirection, PaymentRecord};

#[derive(Debug, Deserialize)]
pub struct CreateAgreementRequest {
    pub landlord_id: Uuid,
    pub tenant_ids: Vec<Uuid>,
    pub rent_amount: i64,
}

#[derive(Debug, Serialize)]
pub struct AgreementResponse {
    pub agreement_id: Uuid,
    pub landlord_id: Uuid,
    pub tenant_ids: Vec<Uuid>,
    pub rent_amount: i64,
    pub contract_ref: String,
    pub status: String,
    pub needs_review: bool,
    /// Net of confirmed deposits minus confirmed withdrawals
    pub escrow_balance: i64,
    pub created_at: DateTime<Utc>,
}

impl AgreementResponse {
    pub fn from_agreement(agreement: Agreement, escrow_balance: i64) -> Self {
        Self {
            agreement_id: agreement.agreement_id,
            landlord_id: agreement.landlord_id,
            tenant_ids: agreement.tenant_ids,
            rent_amount: agreement.rent_amount,
            contract_ref: agreement.contract_ref,
            status: agreement.status.as_str().to_string(),
            needs_review: agreement.needs_review,
            escrow_balance,
            created_at: agreement.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub agreement_id: Uuid,
    pub payer_id: Uuid,
    pub direction: PaymentDirection,
    /// Required for deposits; ignored for withdrawals, which always drain
    /// the full escrow balance.
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub record_id: Uuid,
    pub agreement_id: Uuid,
    pub payer_id: Uuid,
    pub direction: String,
    pub amount: i64,
    pub status: String,
    pub submission_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        Self {
            record_id: record.record_id,
            agreement_id: record.agreement_id,
            payer_id: record.payer_id,
            direction: record.direction.as_str().to_string(),
            amount: record.amount,
            status: record.user_visible_status().to_string(),
            submission_ref: record.submission_ref.clone(),
            created_at: record.created_at,
            confirmed_at: record.confirmed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
