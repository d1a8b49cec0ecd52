use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{Finality, LedgerClient};
use crate::error::AppResult;
use crate::ledger::models::{AgreementStatus, AuditEventType};
use crate::ledger::store::PaymentStore;

/// Periodic agreement-level reconciliation.
///
/// Two jobs: promote agreements whose initialize transaction reached
/// finality, and compare each active agreement's locally confirmed net
/// total against the on-ledger balance. A mismatch must persist across two
/// consecutive sweeps with nothing in flight before it is reported - one
/// observation can simply mean a confirmation landed between the two reads.
/// Divergence is never auto-corrected.
pub struct AgreementSweep {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerClient>,
    // agreement -> ledger balance seen at the first mismatched observation
    suspected: Mutex<HashMap<Uuid, i64>>,
}

impl AgreementSweep {
    pub fn new(store: Arc<dyn PaymentStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            store,
            ledger,
            suspected: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_once(&self) -> AppResult<()> {
        self.activate_pending_agreements().await?;
        self.detect_divergence().await?;
        Ok(())
    }

    async fn activate_pending_agreements(&self) -> AppResult<()> {
        let waiting = self
            .store
            .agreements_by_status(AgreementStatus::Uninitialized)
            .await?;

        for agreement in waiting {
            let submission_ref = match &agreement.init_submission_ref {
                Some(r) => r.clone(),
                None => continue,
            };

            match self.ledger.query_finality(&submission_ref).await {
                Ok(Finality::Confirmed { .. }) => {
                    info!("Agreement {} escrow is live", agreement.agreement_id);
                    self.store
                        .set_agreement_status(agreement.agreement_id, AgreementStatus::Active)
                        .await?;
                    self.store
                        .record_audit_event(
                            AuditEventType::AgreementActivated,
                            Some(agreement.agreement_id),
                            None,
                            serde_json::json!({ "contract_ref": agreement.contract_ref }),
                        )
                        .await?;
                }
                Ok(Finality::Failed { reason, .. }) => {
                    warn!(
                        "Escrow initialization for agreement {} failed: {}",
                        agreement.agreement_id, reason
                    );
                    self.store
                        .flag_agreement_review(agreement.agreement_id)
                        .await?;
                    self.store
                        .record_audit_event(
                            AuditEventType::SubmissionStale,
                            Some(agreement.agreement_id),
                            None,
                            serde_json::json!({ "detail": format!("initialize failed: {}", reason) }),
                        )
                        .await?;
                }
                Ok(Finality::Pending) => {}
                Err(e) => debug!(
                    "Activation poll for agreement {} unavailable: {}",
                    agreement.agreement_id, e
                ),
            }
        }
        Ok(())
    }

    async fn detect_divergence(&self) -> AppResult<()> {
        let active = self
            .store
            .agreements_by_status(AgreementStatus::Active)
            .await?;

        for agreement in active {
            // Already under manual review; no point re-reporting every sweep
            if agreement.needs_review {
                continue;
            }

            let (deposits, withdrawals) = self
                .store
                .confirmed_totals(agreement.agreement_id)
                .await?;
            let local = deposits - withdrawals;

            let ledger_balance = match self.ledger.query_balance(&agreement.contract_ref).await {
                Ok(balance) => balance,
                Err(e) => {
                    debug!(
                        "Balance read for agreement {} unavailable: {}",
                        agreement.agreement_id, e
                    );
                    continue;
                }
            };

            if local == ledger_balance {
                self.suspected.lock().remove(&agreement.agreement_id);
                continue;
            }

            // In-flight records legitimately explain a gap; consistency is
            // eventual, not instantaneous.
            if self.store.has_inflight(agreement.agreement_id).await? {
                self.suspected.lock().remove(&agreement.agreement_id);
                continue;
            }

            let first_observation = self
                .suspected
                .lock()
                .insert(agreement.agreement_id, ledger_balance)
                .is_none();
            if first_observation {
                debug!(
                    "Agreement {} balance mismatch observed (local {} vs ledger {}), rechecking next sweep",
                    agreement.agreement_id, local, ledger_balance
                );
                continue;
            }

            error!(
                "Balance divergence on agreement {}: local {} vs ledger {} - manual resolution required",
                agreement.agreement_id, local, ledger_balance
            );
            self.store
                .flag_agreement_review(agreement.agreement_id)
                .await?;
            self.store
                .record_audit_event(
                    AuditEventType::BalanceDivergence,
                    Some(agreement.agreement_id),
                    None,
                    serde_json::json!({
                        "local_balance": local,
                        "ledger_balance": ledger_balance,
                        "observed_at": Utc::now(),
                    }),
                )
                .await?;
        }
        Ok(())
    }
}
