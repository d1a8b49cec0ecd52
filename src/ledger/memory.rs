use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::models::*;
use super::store::PaymentStore;
use crate::error::{AppError, AppResult, ReconcileError};

/// In-memory PaymentLedger used in simulated mode and by the test suite.
pub struct MemoryPaymentStore {
    agreements: RwLock<HashMap<Uuid, Agreement>>,
    payments: RwLock<HashMap<Uuid, PaymentRecord>>,
    // Single mutex so check-and-take is atomic
    leases: Mutex<HashMap<Uuid, ReconciliationLease>>,
    audit: RwLock<Vec<AuditEvent>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self {
            agreements: RwLock::new(HashMap::new()),
            payments: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create_agreement(
        &self,
        landlord_id: Uuid,
        tenant_ids: Vec<Uuid>,
        rent_amount: i64,
        contract_ref: String,
        init_submission_ref: Option<String>,
    ) -> AppResult<Agreement> {
        let now = Utc::now();
        let agreement = Agreement {
            agreement_id: Uuid::new_v4(),
            landlord_id,
            tenant_ids,
            rent_amount,
            contract_ref,
            status: AgreementStatus::Uninitialized,
            needs_review: false,
            init_submission_ref,
            created_at: now,
            updated_at: now,
        };

        let mut agreements = self.agreements.write().await;
        agreements.insert(agreement.agreement_id, agreement.clone());
        Ok(agreement)
    }

    async fn get_agreement(&self, agreement_id: Uuid) -> AppResult<Option<Agreement>> {
        let agreements = self.agreements.read().await;
        Ok(agreements.get(&agreement_id).cloned())
    }

    async fn set_agreement_status(
        &self,
        agreement_id: Uuid,
        status: AgreementStatus,
    ) -> AppResult<()> {
        let mut agreements = self.agreements.write().await;
        let agreement = agreements
            .get_mut(&agreement_id)
            .ok_or_else(|| AppError::NotFound(format!("Agreement {}", agreement_id)))?;
        agreement.status = status;
        agreement.updated_at = Utc::now();
        Ok(())
    }

    async fn flag_agreement_review(&self, agreement_id: Uuid) -> AppResult<()> {
        let mut agreements = self.agreements.write().await;
        let agreement = agreements
            .get_mut(&agreement_id)
            .ok_or_else(|| AppError::NotFound(format!("Agreement {}", agreement_id)))?;
        agreement.needs_review = true;
        agreement.updated_at = Utc::now();
        Ok(())
    }

    async fn agreements_by_status(&self, status: AgreementStatus) -> AppResult<Vec<Agreement>> {
        let agreements = self.agreements.read().await;
        let mut found: Vec<Agreement> = agreements
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn create_payment(
        &self,
        agreement_id: Uuid,
        payer_id: Uuid,
        direction: PaymentDirection,
        amount: i64,
        debounce: Duration,
    ) -> AppResult<PaymentRecord> {
        let now = Utc::now();
        let mut payments = self.payments.write().await;

        let duplicate = payments.values().any(|r| {
            r.agreement_id == agreement_id
                && r.payer_id == payer_id
                && r.direction == direction
                && r.amount == amount
                && !r.is_terminal()
                && r.created_at > now - debounce
        });
        if duplicate {
            return Err(ReconcileError::DuplicateSubmission.into());
        }

        let record = PaymentRecord {
            record_id: Uuid::new_v4(),
            agreement_id,
            payer_id,
            direction,
            amount,
            status: PaymentStatus::Pending,
            submission_ref: None,
            attempt_count: 0,
            needs_review: false,
            failure_reason: None,
            next_attempt_at: now,
            created_at: now,
            last_checked_at: None,
            submitted_at: None,
            confirmed_at: None,
        };
        payments.insert(record.record_id, record.clone());
        Ok(record)
    }

    async fn spawn_retry(
        &self,
        parent: &PaymentRecord,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord> {
        let now = Utc::now();
        let record = PaymentRecord {
            record_id: Uuid::new_v4(),
            agreement_id: parent.agreement_id,
            payer_id: parent.payer_id,
            direction: parent.direction,
            amount: parent.amount,
            status: PaymentStatus::Pending,
            submission_ref: None,
            attempt_count: parent.attempt_count + 1,
            needs_review: false,
            failure_reason: None,
            next_attempt_at,
            created_at: now,
            last_checked_at: None,
            submitted_at: None,
            confirmed_at: None,
        };

        let mut payments = self.payments.write().await;
        payments.insert(record.record_id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, record_id: Uuid) -> AppResult<Option<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments.get(&record_id).cloned())
    }

    async fn payments_for_agreement(&self, agreement_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        let mut found: Vec<PaymentRecord> = payments
            .values()
            .filter(|r| r.agreement_id == agreement_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn due_payments(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        let mut due: Vec<PaymentRecord> = payments
            .values()
            .filter(|r| !r.is_terminal() && r.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn transition(
        &self,
        record_id: Uuid,
        new_status: PaymentStatus,
        evidence: TransitionEvidence,
    ) -> AppResult<PaymentRecord> {
        let now = Utc::now();
        let mut payments = self.payments.write().await;
        let record = payments
            .get_mut(&record_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))?;

        validate_transition(record_id, record.status, new_status)?;

        record.status = new_status;
        record.last_checked_at = Some(now);
        match evidence {
            TransitionEvidence::Submitted { submission_ref } => {
                record.submission_ref = Some(submission_ref);
                record.submitted_at = Some(now);
            }
            TransitionEvidence::Confirmed { ledger_time } => {
                record.confirmed_at = Some(ledger_time);
            }
            TransitionEvidence::Failed { reason } => {
                record.failure_reason = Some(reason);
            }
        }
        Ok(record.clone())
    }

    async fn record_attempt(
        &self,
        record_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord> {
        let mut payments = self.payments.write().await;
        let record = payments
            .get_mut(&record_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))?;

        record.attempt_count += 1;
        record.next_attempt_at = next_attempt_at;
        record.last_checked_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn reschedule(&self, record_id: Uuid, next_attempt_at: DateTime<Utc>) -> AppResult<()> {
        let mut payments = self.payments.write().await;
        let record = payments
            .get_mut(&record_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))?;

        record.next_attempt_at = next_attempt_at;
        record.last_checked_at = Some(Utc::now());
        Ok(())
    }

    async fn flag_record_review(&self, record_id: Uuid) -> AppResult<()> {
        let mut payments = self.payments.write().await;
        let record = payments
            .get_mut(&record_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))?;
        record.needs_review = true;
        Ok(())
    }

    async fn confirmed_totals(&self, agreement_id: Uuid) -> AppResult<(i64, i64)> {
        let payments = self.payments.read().await;
        let mut deposits = 0i64;
        let mut withdrawals = 0i64;
        for record in payments.values() {
            if record.agreement_id != agreement_id || record.status != PaymentStatus::Confirmed {
                continue;
            }
            match record.direction {
                PaymentDirection::Deposit => deposits += record.amount,
                PaymentDirection::Withdrawal => withdrawals += record.amount,
            }
        }
        Ok((deposits, withdrawals))
    }

    async fn has_inflight(&self, agreement_id: Uuid) -> AppResult<bool> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .any(|r| r.agreement_id == agreement_id && !r.is_terminal()))
    }

    async fn acquire_lease(
        &self,
        record_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let mut leases = self.leases.lock().await;

        if let Some(existing) = leases.get(&record_id) {
            if existing.expires_at > now && existing.holder_id != holder_id {
                return Ok(false);
            }
        }

        leases.insert(
            record_id,
            ReconciliationLease {
                record_id,
                holder_id: holder_id.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, record_id: Uuid, holder_id: &str) -> AppResult<()> {
        let mut leases = self.leases.lock().await;
        if leases
            .get(&record_id)
            .map(|l| l.holder_id == holder_id)
            .unwrap_or(false)
        {
            leases.remove(&record_id);
        }
        Ok(())
    }

    async fn record_audit_event(
        &self,
        event_type: AuditEventType,
        agreement_id: Option<Uuid>,
        record_id: Option<Uuid>,
        details: serde_json::Value,
    ) -> AppResult<()> {
        let mut audit = self.audit.write().await;
        audit.push(AuditEvent {
            id: Uuid::new_v4(),
            event_type,
            agreement_id,
            record_id,
            details,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn audit_events(&self, agreement_id: Uuid) -> AppResult<Vec<AuditEvent>> {
        let audit = self.audit.read().await;
        Ok(audit
            .iter()
            .filter(|e| e.agreement_id == Some(agreement_id))
            .cloned()
            .collect())
    }
}
