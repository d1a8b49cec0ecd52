use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::*;
use super::store::PaymentStore;
use crate::error::{AppError, AppResult, ReconcileError};

const RECORD_COLUMNS: &str = "record_id, agreement_id, payer_id, direction, amount, status, \
     submission_ref, attempt_count, needs_review, failure_reason, next_attempt_at, \
     created_at, last_checked_at, submitted_at, confirmed_at";

const AGREEMENT_COLUMNS: &str = "agreement_id, landlord_id, tenant_ids, rent_amount, contract_ref, \
     status, needs_review, init_submission_ref, created_at, updated_at";

/// Durable PaymentLedger on Postgres.
///
/// Transitions are guarded (`WHERE status = <expected>`) so a concurrent
/// writer that got there first turns this writer's update into a detected
/// `InvalidTransition` instead of a silent overwrite.
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_payment(&self, record_id: Uuid) -> AppResult<PaymentRecord> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE record_id = $1",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment record {}", record_id)))
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_agreement(
        &self,
        landlord_id: Uuid,
        tenant_ids: Vec<Uuid>,
        rent_amount: i64,
        contract_ref: String,
        init_submission_ref: Option<String>,
    ) -> AppResult<Agreement> {
        let query = format!(
            r#"
            INSERT INTO agreements (agreement_id, landlord_id, tenant_ids, rent_amount, contract_ref, init_submission_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            AGREEMENT_COLUMNS
        );
        let agreement = sqlx::query_as::<_, Agreement>(&query)
            .bind(Uuid::new_v4())
            .bind(landlord_id)
            .bind(tenant_ids)
            .bind(rent_amount)
            .bind(contract_ref)
            .bind(init_submission_ref)
            .fetch_one(&self.pool)
            .await?;

        Ok(agreement)
    }

    async fn get_agreement(&self, agreement_id: Uuid) -> AppResult<Option<Agreement>> {
        let query = format!(
            "SELECT {} FROM agreements WHERE agreement_id = $1",
            AGREEMENT_COLUMNS
        );
        let agreement = sqlx::query_as::<_, Agreement>(&query)
            .bind(agreement_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(agreement)
    }

    async fn set_agreement_status(
        &self,
        agreement_id: Uuid,
        status: AgreementStatus,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE agreements
            SET status = $2, updated_at = NOW()
            WHERE agreement_id = $1
            "#,
        )
        .bind(agreement_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Agreement {}", agreement_id)));
        }
        Ok(())
    }

    async fn flag_agreement_review(&self, agreement_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE agreements
            SET needs_review = TRUE, updated_at = NOW()
            WHERE agreement_id = $1
            "#,
        )
        .bind(agreement_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn agreements_by_status(&self, status: AgreementStatus) -> AppResult<Vec<Agreement>> {
        let query = format!(
            "SELECT {} FROM agreements WHERE status = $1 ORDER BY created_at",
            AGREEMENT_COLUMNS
        );
        let agreements = sqlx::query_as::<_, Agreement>(&query)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        Ok(agreements)
    }

    async fn create_payment(
        &self,
        agreement_id: Uuid,
        payer_id: Uuid,
        direction: PaymentDirection,
        amount: i64,
        debounce: Duration,
    ) -> AppResult<PaymentRecord> {
        let duplicate = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payment_records
                WHERE agreement_id = $1 AND payer_id = $2 AND direction = $3 AND amount = $4
                  AND status IN ('pending', 'submitted')
                  AND created_at > $5
            )
            "#,
        )
        .bind(agreement_id)
        .bind(payer_id)
        .bind(direction)
        .bind(amount)
        .bind(Utc::now() - debounce)
        .fetch_one(&self.pool)
        .await?;

        if duplicate {
            return Err(ReconcileError::DuplicateSubmission.into());
        }

        let query = format!(
            r#"
            INSERT INTO payment_records (record_id, agreement_id, payer_id, direction, amount, next_attempt_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(agreement_id)
            .bind(payer_id)
            .bind(direction)
            .bind(amount)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn spawn_retry(
        &self,
        parent: &PaymentRecord,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord> {
        let query = format!(
            r#"
            INSERT INTO payment_records (record_id, agreement_id, payer_id, direction, amount, attempt_count, next_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(parent.agreement_id)
            .bind(parent.payer_id)
            .bind(parent.direction)
            .bind(parent.amount)
            .bind(parent.attempt_count + 1)
            .bind(next_attempt_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_payment(&self, record_id: Uuid) -> AppResult<Option<PaymentRecord>> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE record_id = $1",
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn payments_for_agreement(&self, agreement_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
        let query = format!(
            "SELECT {} FROM payment_records WHERE agreement_id = $1 ORDER BY created_at",
            RECORD_COLUMNS
        );
        let records = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(agreement_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn due_payments(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<PaymentRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM payment_records
            WHERE status IN ('pending', 'submitted') AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $2
            "#,
            RECORD_COLUMNS
        );
        let records = sqlx::query_as::<_, PaymentRecord>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn transition(
        &self,
        record_id: Uuid,
        new_status: PaymentStatus,
        evidence: TransitionEvidence,
    ) -> AppResult<PaymentRecord> {
        let current = self.fetch_payment(record_id).await?;
        validate_transition(record_id, current.status, new_status)?;

        // Guarded update: the WHERE clause re-checks the expected status so
        // a concurrent transition shows up as zero rows, not a lost write.
        let result = match &evidence {
            TransitionEvidence::Submitted { submission_ref } => {
                sqlx::query(
                    r#"
                    UPDATE payment_records
                    SET status = $3, submission_ref = $4, submitted_at = NOW(), last_checked_at = NOW()
                    WHERE record_id = $1 AND status = $2
                    "#,
                )
                .bind(record_id)
                .bind(current.status)
                .bind(new_status)
                .bind(submission_ref)
                .execute(&self.pool)
                .await?
            }
            TransitionEvidence::Confirmed { ledger_time } => {
                sqlx::query(
                    r#"
                    UPDATE payment_records
                    SET status = $3, confirmed_at = $4, last_checked_at = NOW()
                    WHERE record_id = $1 AND status = $2
                    "#,
                )
                .bind(record_id)
                .bind(current.status)
                .bind(new_status)
                .bind(ledger_time)
                .execute(&self.pool)
                .await?
            }
            TransitionEvidence::Failed { reason } => {
                sqlx::query(
                    r#"
                    UPDATE payment_records
                    SET status = $3, failure_reason = $4, last_checked_at = NOW()
                    WHERE record_id = $1 AND status = $2
                    "#,
                )
                .bind(record_id)
                .bind(current.status)
                .bind(new_status)
                .bind(reason)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(ReconcileError::InvalidTransition {
                record_id,
                from: current.status,
                to: new_status,
            }
            .into());
        }

        self.fetch_payment(record_id).await
    }

    async fn record_attempt(
        &self,
        record_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<PaymentRecord> {
        let result = sqlx::query(
            r#"
            UPDATE payment_records
            SET attempt_count = attempt_count + 1, next_attempt_at = $2, last_checked_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Payment record {}", record_id)));
        }
        self.fetch_payment(record_id).await
    }

    async fn reschedule(&self, record_id: Uuid, next_attempt_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET next_attempt_at = $2, last_checked_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn flag_record_review(&self, record_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE payment_records SET needs_review = TRUE WHERE record_id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn confirmed_totals(&self, agreement_id: Uuid) -> AppResult<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE direction = 'deposit'), 0)::BIGINT AS deposits,
                COALESCE(SUM(amount) FILTER (WHERE direction = 'withdrawal'), 0)::BIGINT AS withdrawals
            FROM payment_records
            WHERE agreement_id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(agreement_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("deposits")?, row.try_get("withdrawals")?))
    }

    async fn has_inflight(&self, agreement_id: Uuid) -> AppResult<bool> {
        let inflight = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payment_records
                WHERE agreement_id = $1 AND status IN ('pending', 'submitted')
            )
            "#,
        )
        .bind(agreement_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(inflight)
    }

    async fn acquire_lease(
        &self,
        record_id: Uuid,
        holder_id: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        // Atomic take-or-steal: only an expired lease (or our own) can be
        // replaced. Contention is the zero-row case, not an error.
        let result = sqlx::query(
            r#"
            INSERT INTO reconciliation_leases (record_id, holder_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (record_id) DO UPDATE
            SET holder_id = EXCLUDED.holder_id, expires_at = EXCLUDED.expires_at
            WHERE reconciliation_leases.expires_at < NOW()
               OR reconciliation_leases.holder_id = EXCLUDED.holder_id
            "#,
        )
        .bind(record_id)
        .bind(holder_id)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, record_id: Uuid, holder_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM reconciliation_leases WHERE record_id = $1 AND holder_id = $2")
            .bind(record_id)
            .bind(holder_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_audit_event(
        &self,
        event_type: AuditEventType,
        agreement_id: Option<Uuid>,
        record_id: Option<Uuid>,
        details: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, event_type, agreement_id, record_id, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_type)
        .bind(agreement_id)
        .bind(record_id)
        .bind(details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn audit_events(&self, agreement_id: Uuid) -> AppResult<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, event_type, agreement_id, record_id, details, created_at
            FROM audit_log
            WHERE agreement_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(agreement_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
