use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

use super::ledger_client::{EscrowOp, EscrowTransaction, Finality, LedgerClient};
use crate::error::LedgerError;
use crate::escrow::{ContractStatus, EscrowContract, EscrowEvent};

struct SimOutcome {
    finality: Finality,
    final_at: DateTime<Utc>,
}

struct SimState {
    contracts: HashMap<String, EscrowContract>,
    outcomes: HashMap<String, SimOutcome>,
    // idempotency_key -> submission_ref: the dedup the real network performs
    by_key: HashMap<String, String>,
    balance_tamper: HashMap<String, i64>,
    submit_faults: VecDeque<LedgerError>,
    verdict_overrides: VecDeque<(String, bool)>,
    events: Vec<EscrowEvent>,
    finality_delay: Duration,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            contracts: HashMap::new(),
            outcomes: HashMap::new(),
            by_key: HashMap::new(),
            balance_tamper: HashMap::new(),
            submit_faults: VecDeque::new(),
            verdict_overrides: VecDeque::new(),
            events: Vec::new(),
            finality_delay: Duration::zero(),
        }
    }
}

/// In-process ledger hosting escrow contract instances.
///
/// Used in simulated mode and by the test suite. Behaves like the real
/// network at the boundary: submissions are deduplicated by idempotency key,
/// finality arrives after a configurable delay, and faults can be injected
/// to script outages and rejections.
pub struct SimulatedLedger {
    state: Mutex<SimState>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
        }
    }

    /// Delay between submission acceptance and the finality verdict
    /// becoming visible to polls.
    pub fn set_finality_delay(&self, delay: Duration) {
        self.state.lock().finality_delay = delay;
    }

    /// Make the next `count` submits fail with a retryable transport error.
    pub fn fail_next_submits(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state
                .submit_faults
                .push_back(LedgerError::Retryable("simulated network timeout".to_string()));
        }
    }

    /// Make the next submit fail with a fatal gateway rejection.
    pub fn reject_next_submit(&self, reason: &str) {
        let mut state = self.state.lock();
        state
            .submit_faults
            .push_back(LedgerError::Rejected(reason.to_string()));
    }

    /// Force the next accepted submission to reach a failed verdict instead
    /// of executing its contract call.
    pub fn fail_next_verdict(&self, reason: &str, transient: bool) {
        self.state
            .lock()
            .verdict_overrides
            .push_back((reason.to_string(), transient));
    }

    /// Skew the reported balance of a contract without touching its state,
    /// to exercise divergence detection.
    pub fn tamper_balance(&self, contract_ref: &str, delta: i64) {
        *self
            .state
            .lock()
            .balance_tamper
            .entry(contract_ref.to_string())
            .or_insert(0) += delta;
    }

    pub fn contract_status(&self, contract_ref: &str) -> Option<ContractStatus> {
        self.state
            .lock()
            .contracts
            .get(contract_ref)
            .map(|c| c.status())
    }

    pub fn events(&self) -> Vec<EscrowEvent> {
        self.state.lock().events.clone()
    }

    fn submission_ref_for(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("sim-{}", hex::encode(&digest[..16]))
    }

    fn execute(state: &mut SimState, tx: &EscrowTransaction, ledger_time: DateTime<Utc>) -> Finality {
        let contract = state
            .contracts
            .entry(tx.contract_ref.clone())
            .or_insert_with(|| EscrowContract::new(tx.contract_ref.clone()));

        let result = match &tx.op {
            EscrowOp::Initialize {
                landlord_id,
                tenant_ids,
                rent_amount,
            } => contract.initialize(*landlord_id, tenant_ids.clone(), *rent_amount, ledger_time),
            EscrowOp::Deposit { payer_id, amount } => {
                contract.deposit(*payer_id, *amount, ledger_time)
            }
            EscrowOp::Withdraw { caller_id } => contract.withdraw(*caller_id, ledger_time),
            EscrowOp::Settle { caller_id } => contract.settle(*caller_id, ledger_time),
            EscrowOp::Dispute { caller_id } => contract.dispute(*caller_id, ledger_time),
        };

        match result {
            Ok(event) => {
                state.events.push(event);
                Finality::Confirmed { ledger_time }
            }
            Err(err) => Finality::Failed {
                reason: err.to_string(),
                transient: false,
            },
        }
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(&self, tx: &EscrowTransaction) -> Result<String, LedgerError> {
        let mut state = self.state.lock();

        if let Some(fault) = state.submit_faults.pop_front() {
            return Err(fault);
        }

        // Idempotent resubmission: the network already holds this
        // transaction, hand back the same reference.
        if let Some(existing) = state.by_key.get(&tx.idempotency_key) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let finality = if let Some((reason, transient)) = state.verdict_overrides.pop_front() {
            Finality::Failed { reason, transient }
        } else {
            Self::execute(&mut state, tx, now)
        };

        let submission_ref = Self::submission_ref_for(&tx.idempotency_key);
        let final_at = now + state.finality_delay;
        state
            .outcomes
            .insert(submission_ref.clone(), SimOutcome { finality, final_at });
        state
            .by_key
            .insert(tx.idempotency_key.clone(), submission_ref.clone());

        Ok(submission_ref)
    }

    async fn query_finality(&self, submission_ref: &str) -> Result<Finality, LedgerError> {
        let state = self.state.lock();
        let outcome = state
            .outcomes
            .get(submission_ref)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown submission {}", submission_ref)))?;

        if Utc::now() < outcome.final_at {
            return Ok(Finality::Pending);
        }
        Ok(outcome.finality.clone())
    }

    async fn query_balance(&self, contract_ref: &str) -> Result<i64, LedgerError> {
        let state = self.state.lock();
        let contract = state
            .contracts
            .get(contract_ref)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown contract {}", contract_ref)))?;

        let tamper = state.balance_tamper.get(contract_ref).copied().unwrap_or(0);
        Ok(contract.balance() + tamper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn init_tx(contract_ref: &str, landlord: Uuid, tenant: Uuid) -> EscrowTransaction {
        EscrowTransaction::new(
            contract_ref,
            EscrowOp::Initialize {
                landlord_id: landlord,
                tenant_ids: vec![tenant],
                rent_amount: 1000,
            },
            Uuid::new_v4(),
            0,
        )
    }

    #[tokio::test]
    async fn test_submission_dedup_by_idempotency_key() {
        let ledger = SimulatedLedger::new();
        let landlord = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        ledger
            .submit(&init_tx("c-1", landlord, tenant))
            .await
            .unwrap();

        let key = Uuid::new_v4();
        let deposit = EscrowTransaction::new(
            "c-1",
            EscrowOp::Deposit {
                payer_id: tenant,
                amount: 400,
            },
            key,
            0,
        );

        let first = ledger.submit(&deposit).await.unwrap();
        let second = ledger.submit(&deposit).await.unwrap();
        assert_eq!(first, second);

        // The deposit applied exactly once
        assert_eq!(ledger.query_balance("c-1").await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_contract_rejection_surfaces_at_finality() {
        let ledger = SimulatedLedger::new();
        let landlord = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        ledger
            .submit(&init_tx("c-2", landlord, tenant))
            .await
            .unwrap();

        // Landlord depositing is an authorization failure
        let bad_deposit = EscrowTransaction::new(
            "c-2",
            EscrowOp::Deposit {
                payer_id: landlord,
                amount: 400,
            },
            Uuid::new_v4(),
            0,
        );
        let submission_ref = ledger.submit(&bad_deposit).await.unwrap();

        match ledger.query_finality(&submission_ref).await.unwrap() {
            Finality::Failed { transient, .. } => assert!(!transient),
            other => panic!("expected failed verdict, got {:?}", other),
        }
        assert_eq!(ledger.query_balance("c-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_submit_faults_drain() {
        let ledger = SimulatedLedger::new();
        ledger.fail_next_submits(1);

        let tx = init_tx("c-3", Uuid::new_v4(), Uuid::new_v4());
        let err = ledger.submit(&tx).await.unwrap_err();
        assert!(err.is_retryable());

        // Fault consumed, next submit goes through
        ledger.submit(&tx).await.unwrap();
        assert_eq!(
            ledger.contract_status("c-3"),
            Some(ContractStatus::Active)
        );
    }
}
