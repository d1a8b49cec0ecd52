use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{EscrowOp, EscrowTransaction, Finality, LedgerClient};
use crate::config::ReconcileConfig;
use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::*;
use crate::ledger::store::PaymentStore;
use crate::notifier::{EventNotifier, PaymentNotification};

/// Drives one payment record at a time through
/// pending -> submitted -> {confirmed | failed}, using ledger truth only.
///
/// Many engines run concurrently; the per-record lease guarantees at most
/// one of them advances a given record. Everything between the two network
/// suspension points (submit, poll) is synchronous.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn EventNotifier>,
    config: ReconcileConfig,
    holder_id: String,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn EventNotifier>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            config,
            holder_id: format!("engine-{}", Uuid::new_v4()),
        }
    }

    /// A copy of this engine acting as a distinct lease holder.
    pub fn for_worker(&self, index: usize) -> Self {
        let mut engine = self.clone();
        engine.holder_id = format!("{}-w{}", engine.holder_id, index);
        engine
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Process one batch of due records. Returns how many records this
    /// holder actually advanced.
    pub async fn run_once(&self) -> AppResult<usize> {
        let due = self
            .store
            .due_payments(Utc::now(), self.config.batch_size)
            .await?;

        let mut processed = 0;
        for record in due {
            match self.reconcile_record(record.record_id).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => error!("Reconciliation of record {} failed: {:?}", record.record_id, e),
            }
        }
        Ok(processed)
    }

    /// Run the lease/submit/poll cycle for a single record. Returns false
    /// when the record was skipped (lease contention or already terminal).
    #[instrument(skip(self), fields(holder = %self.holder_id))]
    pub async fn reconcile_record(&self, record_id: Uuid) -> AppResult<bool> {
        let lease_ttl = Duration::seconds(self.config.lease_ttl_secs);
        if !self
            .store
            .acquire_lease(record_id, &self.holder_id, lease_ttl)
            .await?
        {
            // Expected under concurrency: another worker owns this record
            debug!("Lease contention on record {}, skipping", record_id);
            return Ok(false);
        }

        // Re-read under the lease; the record may have advanced between the
        // due-scan and the lease grant.
        let result = match self.store.get_payment(record_id).await? {
            None => Err(AppError::NotFound(format!("Payment record {}", record_id))),
            Some(record) if record.is_terminal() => Ok(false),
            Some(record) => match record.status {
                PaymentStatus::Pending => self.submit_pending(&record).await.map(|_| true),
                PaymentStatus::Submitted => self.poll_submitted(&record).await.map(|_| true),
                _ => Ok(false),
            },
        };

        self.store.release_lease(record_id, &self.holder_id).await?;
        result
    }

    // ========== SUBMIT PHASE ==========

    async fn submit_pending(&self, record: &PaymentRecord) -> AppResult<()> {
        let agreement = self
            .store
            .get_agreement(record.agreement_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Agreement {}", record.agreement_id)))?;

        match agreement.status {
            AgreementStatus::Active => {}
            AgreementStatus::Uninitialized => {
                // Escrow not live yet; come back after the sweep activates it
                self.store
                    .reschedule(record.record_id, Utc::now() + self.poll_interval())
                    .await?;
                return Ok(());
            }
            terminal => {
                let reason = format!("agreement is {}", terminal);
                self.fail_record(record, &reason).await?;
                return Ok(());
            }
        }

        let op = match record.direction {
            PaymentDirection::Deposit => EscrowOp::Deposit {
                payer_id: record.payer_id,
                amount: record.amount,
            },
            PaymentDirection::Withdrawal => EscrowOp::Withdraw {
                caller_id: record.payer_id,
            },
        };
        let tx = EscrowTransaction::new(
            agreement.contract_ref.clone(),
            op,
            record.record_id,
            record.attempt_count,
        );

        match self.ledger.submit(&tx).await {
            Ok(submission_ref) => {
                info!(
                    "Record {} submitted to ledger as {}",
                    record.record_id, submission_ref
                );
                self.store
                    .transition(
                        record.record_id,
                        PaymentStatus::Submitted,
                        TransitionEvidence::Submitted {
                            submission_ref: submission_ref.clone(),
                        },
                    )
                    .await?;
                self.store
                    .record_audit_event(
                        AuditEventType::PaymentSubmitted,
                        Some(record.agreement_id),
                        Some(record.record_id),
                        serde_json::json!({ "submission_ref": submission_ref }),
                    )
                    .await?;
            }
            Err(LedgerError::Rejected(reason)) => {
                warn!(
                    "Ledger rejected record {} outright: {}",
                    record.record_id, reason
                );
                self.fail_record(record, &reason).await?;
            }
            Err(e) => {
                // Unknown outcome: the idempotency key makes resubmission
                // safe, so bookkeeping is all that happens here.
                self.handle_retryable_submit(record, &e).await?;
            }
        }
        Ok(())
    }

    async fn handle_retryable_submit(
        &self,
        record: &PaymentRecord,
        cause: &LedgerError,
    ) -> AppResult<()> {
        let attempts = record.attempt_count + 1;
        if attempts >= self.config.max_attempts {
            warn!(
                "Record {} exhausted {} submit attempts",
                record.record_id, attempts
            );
            self.store
                .transition(
                    record.record_id,
                    PaymentStatus::Failed,
                    TransitionEvidence::Failed {
                        reason: format!("retries exhausted: {}", cause),
                    },
                )
                .await?;
            self.escalate_exhausted(record, attempts).await?;
            return Ok(());
        }

        let delay = self.backoff(attempts);
        debug!(
            "Record {} submit failed (attempt {}), retrying in {}ms: {}",
            record.record_id,
            attempts,
            delay.num_milliseconds(),
            cause
        );
        self.store
            .record_attempt(record.record_id, Utc::now() + delay)
            .await?;
        self.store
            .record_audit_event(
                AuditEventType::RetryScheduled,
                Some(record.agreement_id),
                Some(record.record_id),
                serde_json::json!({ "attempt": attempts, "delay_ms": delay.num_milliseconds() }),
            )
            .await?;
        Ok(())
    }

    // ========== POLL PHASE ==========

    async fn poll_submitted(&self, record: &PaymentRecord) -> AppResult<()> {
        let submission_ref = match &record.submission_ref {
            Some(r) => r.clone(),
            None => {
                // A submitted record without a reference is a bookkeeping
                // bug; surface it instead of guessing.
                self.flag_stale(record, "submitted record has no submission_ref")
                    .await?;
                return Ok(());
            }
        };

        self.check_staleness(record).await?;

        match self.ledger.query_finality(&submission_ref).await {
            Ok(Finality::Pending) => {
                // Finality delay is not evidence of failure; just wait
                self.store
                    .reschedule(record.record_id, Utc::now() + self.poll_interval())
                    .await?;
            }
            Ok(Finality::Confirmed { ledger_time }) => {
                self.confirm_record(record, ledger_time).await?;
            }
            Ok(Finality::Failed { reason, transient }) => {
                self.fail_record(record, &reason).await?;
                if transient {
                    self.maybe_spawn_retry(record).await?;
                }
            }
            Err(LedgerError::Rejected(reason)) => {
                // The ledger does not know this submission at all
                self.flag_stale(record, &format!("submission unknown to ledger: {}", reason))
                    .await?;
                self.store
                    .reschedule(record.record_id, Utc::now() + self.poll_interval())
                    .await?;
            }
            Err(e) => {
                debug!(
                    "Finality query for record {} unavailable, retrying: {}",
                    record.record_id, e
                );
                self.store
                    .reschedule(record.record_id, Utc::now() + self.poll_interval())
                    .await?;
            }
        }
        Ok(())
    }

    async fn confirm_record(
        &self,
        record: &PaymentRecord,
        ledger_time: DateTime<Utc>,
    ) -> AppResult<()> {
        let confirmed = self
            .store
            .transition(
                record.record_id,
                PaymentStatus::Confirmed,
                TransitionEvidence::Confirmed { ledger_time },
            )
            .await?;
        info!(
            "Record {} confirmed at {} ({} {})",
            record.record_id,
            ledger_time,
            record.direction.as_str(),
            record.amount
        );
        self.store
            .record_audit_event(
                AuditEventType::PaymentConfirmed,
                Some(record.agreement_id),
                Some(record.record_id),
                serde_json::json!({ "ledger_time": ledger_time }),
            )
            .await?;
        self.notifier
            .notify(PaymentNotification::new(
                record.agreement_id,
                record.record_id,
                confirmed.user_visible_status(),
                record.amount,
            ))
            .await;
        Ok(())
    }

    async fn fail_record(&self, record: &PaymentRecord, reason: &str) -> AppResult<()> {
        self.store
            .transition(
                record.record_id,
                PaymentStatus::Failed,
                TransitionEvidence::Failed {
                    reason: reason.to_string(),
                },
            )
            .await?;
        self.store
            .record_audit_event(
                AuditEventType::PaymentFailed,
                Some(record.agreement_id),
                Some(record.record_id),
                serde_json::json!({ "reason": reason }),
            )
            .await?;
        self.notifier
            .notify(PaymentNotification::new(
                record.agreement_id,
                record.record_id,
                "failed",
                record.amount,
            ))
            .await;
        Ok(())
    }

    /// A final-failure with a transient cause is worth a fresh attempt:
    /// a successor record with attempt_count + 1, never a mutation of the
    /// terminal one.
    async fn maybe_spawn_retry(&self, parent: &PaymentRecord) -> AppResult<()> {
        let attempts = parent.attempt_count + 1;
        if attempts >= self.config.max_attempts {
            self.escalate_exhausted(parent, attempts).await?;
            return Ok(());
        }

        let delay = self.backoff(attempts);
        let successor = self
            .store
            .spawn_retry(parent, Utc::now() + delay)
            .await?;
        info!(
            "Spawned retry {} (attempt {}) for failed record {}",
            successor.record_id, successor.attempt_count, parent.record_id
        );
        self.store
            .record_audit_event(
                AuditEventType::RetrySpawned,
                Some(parent.agreement_id),
                Some(successor.record_id),
                serde_json::json!({
                    "parent_record_id": parent.record_id,
                    "attempt": successor.attempt_count,
                }),
            )
            .await?;
        Ok(())
    }

    async fn escalate_exhausted(&self, record: &PaymentRecord, attempts: i32) -> AppResult<()> {
        error!(
            "Record {} on agreement {} needs manual review after {} attempts",
            record.record_id, record.agreement_id, attempts
        );
        self.store.flag_record_review(record.record_id).await?;
        self.store
            .flag_agreement_review(record.agreement_id)
            .await?;
        self.store
            .record_audit_event(
                AuditEventType::RetriesExhausted,
                Some(record.agreement_id),
                Some(record.record_id),
                serde_json::json!({ "attempts": attempts }),
            )
            .await?;
        self.notifier
            .notify(PaymentNotification::new(
                record.agreement_id,
                record.record_id,
                "needs_review",
                record.amount,
            ))
            .await;
        Ok(())
    }

    async fn check_staleness(&self, record: &PaymentRecord) -> AppResult<()> {
        if record.needs_review {
            return Ok(());
        }
        let submitted_at = match record.submitted_at {
            Some(t) => t,
            None => return Ok(()),
        };
        let stale_after = Duration::seconds(self.config.submitted_stale_secs);
        if Utc::now() - submitted_at > stale_after {
            self.flag_stale(
                record,
                &format!(
                    "no finality verdict {}s after submission",
                    self.config.submitted_stale_secs
                ),
            )
            .await?;
        }
        Ok(())
    }

    async fn flag_stale(&self, record: &PaymentRecord, detail: &str) -> AppResult<()> {
        warn!("Record {} flagged for review: {}", record.record_id, detail);
        self.store.flag_record_review(record.record_id).await?;
        self.store
            .flag_agreement_review(record.agreement_id)
            .await?;
        self.store
            .record_audit_event(
                AuditEventType::SubmissionStale,
                Some(record.agreement_id),
                Some(record.record_id),
                serde_json::json!({ "detail": detail }),
            )
            .await?;
        self.notifier
            .notify(PaymentNotification::new(
                record.agreement_id,
                record.record_id,
                "needs_review",
                record.amount,
            ))
            .await;
        Ok(())
    }

    // ========== SCHEDULING POLICY ==========

    fn poll_interval(&self) -> Duration {
        Duration::milliseconds(self.config.poll_interval_ms as i64)
    }

    /// base * 2^attempt, capped, with up to 25% jitter so a burst of
    /// failures does not resubmit in lockstep.
    fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.clamp(0, 16) as u32;
        let capped = self
            .config
            .retry_base_delay_ms
            .saturating_mul(1i64 << exponent)
            .min(self.config.retry_max_delay_ms);
        let jitter = if capped > 0 {
            rand::rng().random_range(0..=capped / 4)
        } else {
            0
        };
        Duration::milliseconds(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedLedger;
    use crate::ledger::MemoryPaymentStore;
    use crate::notifier::LogNotifier;

    fn test_engine(base_delay_ms: i64) -> ReconciliationEngine {
        let config = ReconcileConfig {
            retry_base_delay_ms: base_delay_ms,
            retry_max_delay_ms: base_delay_ms * 100,
            ..ReconcileConfig::default()
        };
        ReconciliationEngine::new(
            Arc::new(MemoryPaymentStore::new()),
            Arc::new(SimulatedLedger::new()),
            Arc::new(LogNotifier),
            config,
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let engine = test_engine(100);

        let first = engine.backoff(1).num_milliseconds();
        assert!((200..=250).contains(&first));

        let second = engine.backoff(2).num_milliseconds();
        assert!((400..=500).contains(&second));

        // Deep attempt counts hit the cap instead of overflowing
        let deep = engine.backoff(60).num_milliseconds();
        assert!(deep <= 100 * 100 + 100 * 25);
    }

    #[test]
    fn test_worker_holders_are_distinct() {
        let engine = test_engine(100);
        let a = engine.for_worker(0);
        let b = engine.for_worker(1);
        assert_ne!(a.holder_id(), b.holder_id());
    }
}
