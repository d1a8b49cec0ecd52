use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use rentledger::adapters::{EscrowOp, EscrowTransaction, LedgerClient, SimulatedLedger};
use rentledger::api::handler::AppState;
use rentledger::config::ReconcileConfig;
use rentledger::ledger::models::Agreement;
use rentledger::ledger::{MemoryPaymentStore, PaymentStore};
use rentledger::notifier::LogNotifier;
use rentledger::reconciliation::{AgreementSweep, ReconciliationEngine};

/// Everything an end-to-end scenario needs: in-memory payment ledger,
/// in-process simulated ledger, one engine, one sweep.
pub struct Harness {
    pub store: Arc<MemoryPaymentStore>,
    pub ledger: Arc<SimulatedLedger>,
    pub engine: ReconciliationEngine,
    pub sweep: AgreementSweep,
    pub config: ReconcileConfig,
}

/// Short delays so retry scenarios run in milliseconds.
pub fn test_config() -> ReconcileConfig {
    ReconcileConfig {
        worker_count: 1,
        poll_interval_ms: 5,
        batch_size: 32,
        lease_ttl_secs: 60,
        max_attempts: 5,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 50,
        submitted_stale_secs: 3_600,
        sweep_interval_secs: 30,
        duplicate_debounce_secs: 600,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: ReconcileConfig) -> Harness {
    let store = Arc::new(MemoryPaymentStore::new());
    let ledger = Arc::new(SimulatedLedger::new());

    let store_dyn: Arc<dyn PaymentStore> = store.clone();
    let ledger_dyn: Arc<dyn LedgerClient> = ledger.clone();

    let engine = ReconciliationEngine::new(
        store_dyn.clone(),
        ledger_dyn.clone(),
        Arc::new(LogNotifier),
        config.clone(),
    );
    let sweep = AgreementSweep::new(store_dyn, ledger_dyn);

    Harness {
        store,
        ledger,
        engine,
        sweep,
        config,
    }
}

impl Harness {
    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            reconcile: self.config.clone(),
        }
    }

    /// Create an agreement whose escrow contract is already live.
    pub async fn active_agreement(
        &self,
        landlord: Uuid,
        tenants: Vec<Uuid>,
        rent_amount: i64,
    ) -> Agreement {
        let contract_ref = format!("escrow-{}", Uuid::new_v4());
        let tx = EscrowTransaction::new(
            contract_ref.clone(),
            EscrowOp::Initialize {
                landlord_id: landlord,
                tenant_ids: tenants.clone(),
                rent_amount,
            },
            Uuid::new_v4(),
            0,
        );
        let submission_ref = self.ledger.submit(&tx).await.unwrap();

        let agreement = self
            .store
            .create_agreement(landlord, tenants, rent_amount, contract_ref, Some(submission_ref))
            .await
            .unwrap();

        self.sweep.run_once().await.unwrap();
        self.store
            .get_agreement(agreement.agreement_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Run engine cycles with enough breathing room for backoff delays to
    /// elapse between them.
    pub async fn drive(&self, cycles: usize) {
        for _ in 0..cycles {
            self.engine.run_once().await.unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    }
}
