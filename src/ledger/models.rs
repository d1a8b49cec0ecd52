use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::ReconcileError;

/// Agreement status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "agreement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgreementStatus {
    Uninitialized,
    Active,
    Settled,
    Disputed,
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AgreementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementStatus::Uninitialized => "uninitialized",
            AgreementStatus::Active => "active",
            AgreementStatus::Settled => "settled",
            AgreementStatus::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgreementStatus::Settled | AgreementStatus::Disputed)
    }
}

/// Payment direction - a closed set, deliberately not open polymorphism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    Deposit,
    Withdrawal,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentDirection::Deposit => "deposit",
            PaymentDirection::Withdrawal => "withdrawal",
        }
    }
}

/// Payment record status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Submitted => "submitted",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Confirmed | PaymentStatus::Failed)
    }
}

/// Validate payment status state machine transitions
/// Valid transitions:
/// - Pending → Submitted, Failed
/// - Submitted → Confirmed, Failed
/// - Terminal states (Confirmed, Failed) → NO TRANSITIONS ALLOWED
///
/// A terminal record is never mutated; retries happen through a successor
/// record with an incremented attempt count.
pub fn validate_transition(
    record_id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), ReconcileError> {
    let allowed = match from {
        PaymentStatus::Pending => {
            matches!(to, PaymentStatus::Submitted | PaymentStatus::Failed)
        }
        PaymentStatus::Submitted => {
            matches!(to, PaymentStatus::Confirmed | PaymentStatus::Failed)
        }
        PaymentStatus::Confirmed | PaymentStatus::Failed => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(ReconcileError::InvalidTransition {
            record_id,
            from,
            to,
        })
    }
}

/// Evidence accompanying a status transition, persisted onto the record
#[derive(Debug, Clone)]
pub enum TransitionEvidence {
    Submitted { submission_ref: String },
    Confirmed { ledger_time: DateTime<Utc> },
    Failed { reason: String },
}

/// One rent contract instance. Owned by the landlord; tenants hold
/// read/deposit rights only. Never deleted, only archived.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agreement {
    pub agreement_id: Uuid,
    pub landlord_id: Uuid,
    pub tenant_ids: Vec<Uuid>,
    pub rent_amount: i64,
    pub contract_ref: String,
    pub status: AgreementStatus,
    pub needs_review: bool,
    pub init_submission_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempted transfer. Created by a payer action or landlord withdrawal
/// request; mutated only by the reconciliation engine; never deleted, only
/// superseded by a successor record on retry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub record_id: Uuid,
    pub agreement_id: Uuid,
    pub payer_id: Uuid,
    pub direction: PaymentDirection,
    pub amount: i64,
    pub status: PaymentStatus,
    pub submission_ref: Option<String>,
    pub attempt_count: i32,
    pub needs_review: bool,
    pub failure_reason: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The status a payer or landlord observes. Internal retry churn is
    /// never exposed as a distinct status.
    pub fn user_visible_status(&self) -> &'static str {
        if self.needs_review {
            return "needs_review";
        }
        match self.status {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Submitted => "submitted",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Ephemeral ownership token: at most one live lease per record at any
/// instant. Time-bounded rather than held, so a crashed worker self-heals.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReconciliationLease {
    pub record_id: Uuid,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PaymentCreated,
    PaymentSubmitted,
    PaymentConfirmed,
    PaymentFailed,
    RetryScheduled,
    RetrySpawned,
    RetriesExhausted,
    SubmissionStale,
    AgreementCreated,
    AgreementActivated,
    AgreementSettled,
    AgreementDisputed,
    BalanceDivergence,
}

/// Audit log entry - every reconciliation decision leaves a row here
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub agreement_id: Option<Uuid>,
    pub record_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let id = Uuid::new_v4();

        assert!(validate_transition(id, PaymentStatus::Pending, PaymentStatus::Submitted).is_ok());
        assert!(validate_transition(id, PaymentStatus::Pending, PaymentStatus::Failed).is_ok());
        assert!(validate_transition(id, PaymentStatus::Submitted, PaymentStatus::Confirmed).is_ok());
        assert!(validate_transition(id, PaymentStatus::Submitted, PaymentStatus::Failed).is_ok());

        // Skipping submission is not a legal shortcut
        assert!(validate_transition(id, PaymentStatus::Pending, PaymentStatus::Confirmed).is_err());

        // Terminal states admit no transitions, including self-transitions
        for terminal in [PaymentStatus::Confirmed, PaymentStatus::Failed] {
            for to in [
                PaymentStatus::Pending,
                PaymentStatus::Submitted,
                PaymentStatus::Confirmed,
                PaymentStatus::Failed,
            ] {
                assert!(validate_transition(id, terminal, to).is_err());
            }
        }
    }

    #[test]
    fn test_user_visible_status_masks_retry_churn() {
        let mut record = PaymentRecord {
            record_id: Uuid::new_v4(),
            agreement_id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            direction: PaymentDirection::Deposit,
            amount: 1000,
            status: PaymentStatus::Pending,
            submission_ref: None,
            attempt_count: 3,
            needs_review: false,
            failure_reason: None,
            next_attempt_at: Utc::now(),
            created_at: Utc::now(),
            last_checked_at: None,
            submitted_at: None,
            confirmed_at: None,
        };

        // attempt_count is internal; the payer still just sees "pending"
        assert_eq!(record.user_visible_status(), "pending");

        record.needs_review = true;
        assert_eq!(record.user_visible_status(), "needs_review");
    }
}
