use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;

/// The PaymentLedger contract - THE application-side source of truth for
/// what happened to every payment.
///
/// All writes go through the monotonic-transition contract; this is the only
/// mutual-exclusion discipline the engine relies on besides the per-record
/// lease.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    // ========== AGREEMENT OPERATIONS ==========

    async fn create_agreement(
        &self,
        landlord_id: Uuid,
        tenant_ids: Vec<Uuid>,
        rent_amount: i64,
        contract_ref: String,
        init_submission_ref: Option<String>,
    ) -> AppResult<Agreement>;

    async fn get_agreement(&self, agreement_id: Uuid) -> AppResult<Option<Agreement>>;

    async fn set_agreement_status(
        &self,
        agreement_id: Uuid,
        status: AgreementStatus,
    ) -> AppResult<()>;

    /// Mark an agreement as requiring manual intervention. Sticky until an
    /// operator clears it out of band.
    async fn flag_agreement_review(&self, agreement_id: Uuid) -> AppResult<()>;

    async fn agreements_by_status(&self, status: AgreementStatus) -> AppResult<Vec<Agreement>>;

    // ========== PAYMENT OPERATIONS ==========

    /// Create a fresh payment record in `pending`.
    ///
    /// Fails with `DuplicateSubmission` when a non-terminal record for the
    /// same (agreement, payer, direction, amount) tuple was created inside
    /// the debounce window - this guards against double-clicked user
    /// submissions, not against engine retries (which use `spawn_retry`).
    async fn create_payment(
        &self,
        agreement_id: Uuid,
        payer_id: Uuid,
        direction: PaymentDirection,
        amount: i64,
        debounce: Duration,
    ) -> AppResult<PaymentRecord>;

    /// Create the successor record of a failed attempt, carrying
    /// `attempt_count + 1` as the idempotency discriminator.
    async fn spawn_retry(
        &self,
        parent: &PaymentRecord,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord>;

    async fn get_payment(&self, record_id: Uuid) -> AppResult<Option<PaymentRecord>>;

    /// Records ordered by `created_at` for audit display.
    async fn payments_for_agreement(&self, agreement_id: Uuid) -> AppResult<Vec<PaymentRecord>>;

    /// Non-terminal records whose `next_attempt_at` has passed, oldest first.
    async fn due_payments(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<PaymentRecord>>;

    /// Apply a monotonic status transition. Any attempt to move a terminal
    /// record fails with `InvalidTransition` - surfaced, never dropped.
    async fn transition(
        &self,
        record_id: Uuid,
        new_status: PaymentStatus,
        evidence: TransitionEvidence,
    ) -> AppResult<PaymentRecord>;

    /// In-place bookkeeping for a transient submit failure: bump
    /// `attempt_count`, reschedule with backoff. The record stays `pending`.
    async fn record_attempt(
        &self,
        record_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord>;

    /// Push a record's next visit into the future (poll not yet final).
    async fn reschedule(
        &self,
        record_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn flag_record_review(&self, record_id: Uuid) -> AppResult<()>;

    /// (confirmed deposit total, confirmed withdrawal total) for an
    /// agreement - the locally computed escrow balance.
    async fn confirmed_totals(&self, agreement_id: Uuid) -> AppResult<(i64, i64)>;

    /// Whether any record of the agreement is still non-terminal.
    async fn has_inflight(&self, agreement_id: Uuid) -> AppResult<bool>;

    // ========== LEASE OPERATIONS ==========

    /// Try to take the reconciliation lease for a record. Returns false on
    /// contention (an unexpired lease held by someone else).
    async fn acquire_lease(
        &self,
        record_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> AppResult<bool>;

    async fn release_lease(&self, record_id: Uuid, holder_id: &str) -> AppResult<()>;

    // ========== AUDIT LOG ==========

    async fn record_audit_event(
        &self,
        event_type: AuditEventType,
        agreement_id: Option<Uuid>,
        record_id: Option<Uuid>,
        details: serde_json::Value,
    ) -> AppResult<()>;

    async fn audit_events(&self, agreement_id: Uuid) -> AppResult<Vec<AuditEvent>>;
}
