use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// One escrow contract call, as submitted to the ledger network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EscrowOp {
    Initialize {
        landlord_id: Uuid,
        tenant_ids: Vec<Uuid>,
        rent_amount: i64,
    },
    Deposit {
        payer_id: Uuid,
        amount: i64,
    },
    Withdraw {
        caller_id: Uuid,
    },
    Settle {
        caller_id: Uuid,
    },
    Dispute {
        caller_id: Uuid,
    },
}

/// Transaction envelope handed to the ledger.
///
/// The ledger deduplicates by `idempotency_key`, so resubmitting the same
/// envelope after an unknown-outcome timeout can never double-spend. Retry
/// chains get a fresh key per successor record; `attempt` travels along for
/// audit and marks the successor as a deliberate new attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub contract_ref: String,
    #[serde(flatten)]
    pub op: EscrowOp,
    pub idempotency_key: String,
    pub attempt: i32,
}

impl EscrowTransaction {
    pub fn new(contract_ref: impl Into<String>, op: EscrowOp, key: Uuid, attempt: i32) -> Self {
        Self {
            contract_ref: contract_ref.into(),
            op,
            idempotency_key: key.to_string(),
            attempt,
        }
    }
}

/// Finality verdict for a submitted transaction.
///
/// `Pending` is not evidence of anything except that the network has not
/// decided yet. `transient` on `Failed` tells the engine whether a successor
/// attempt is worth spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Finality {
    Pending,
    Confirmed {
        ledger_time: DateTime<Utc>,
    },
    Failed {
        reason: String,
        #[serde(default)]
        transient: bool,
    },
}

/// The only source of ledger truth. The engine never infers finality from
/// local state alone.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a transaction. An `Err(Retryable)` is an unknown outcome:
    /// the transaction may or may not have been accepted.
    async fn submit(&self, tx: &EscrowTransaction) -> Result<String, LedgerError>;

    /// Query finality of a previously submitted transaction.
    async fn query_finality(&self, submission_ref: &str) -> Result<Finality, LedgerError>;

    /// Pure read of a contract's current balance, used by the divergence
    /// sweep.
    async fn query_balance(&self, contract_ref: &str) -> Result<i64, LedgerError>;
}
