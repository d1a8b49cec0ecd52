use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EscrowError;

/// Escrow contract lifecycle
///
/// Uninitialized -> Active -> Settled (terminal)
///                  Active -> Disputed (terminal, human resolution)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Uninitialized,
    Active,
    Settled,
    Disputed,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Uninitialized => "uninitialized",
            ContractStatus::Active => "active",
            ContractStatus::Settled => "settled",
            ContractStatus::Disputed => "disputed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEventKind {
    Initialized,
    Deposited,
    Withdrawn,
    Settled,
    Disputed,
}

/// Structured event emitted by every state-mutating contract call,
/// consumed by off-ledger observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub kind: EscrowEventKind,
    pub contract_ref: String,
    pub amount: i64,
    pub actor: Uuid,
    pub ledger_time: DateTime<Utc>,
}

/// The on-ledger program instance holding custodial funds for one
/// rent agreement.
///
/// The ledger itself deduplicates submissions by transaction identity, so
/// the contract only has to keep its balance arithmetic commutative: the
/// arrival order of concurrent deposits does not matter. Concurrent
/// withdraws are serialized by the ledger's native transaction ordering.
#[derive(Debug, Clone)]
pub struct EscrowContract {
    contract_ref: String,
    landlord: Uuid,
    tenants: Vec<Uuid>,
    rent_amount: i64,
    balance: i64,
    status: ContractStatus,
}

impl EscrowContract {
    pub fn new(contract_ref: impl Into<String>) -> Self {
        Self {
            contract_ref: contract_ref.into(),
            landlord: Uuid::nil(),
            tenants: Vec::new(),
            rent_amount: 0,
            balance: 0,
            status: ContractStatus::Uninitialized,
        }
    }

    /// Callable exactly once; a second call fails with `AlreadyInitialized`.
    pub fn initialize(
        &mut self,
        landlord: Uuid,
        tenants: Vec<Uuid>,
        rent_amount: i64,
        ledger_time: DateTime<Utc>,
    ) -> Result<EscrowEvent, EscrowError> {
        if self.status != ContractStatus::Uninitialized {
            return Err(EscrowError::AlreadyInitialized);
        }
        if rent_amount <= 0 {
            return Err(EscrowError::InvalidAmount(rent_amount));
        }
        if tenants.is_empty() {
            return Err(EscrowError::Unauthorized);
        }

        self.landlord = landlord;
        self.tenants = tenants;
        self.rent_amount = rent_amount;
        self.status = ContractStatus::Active;

        Ok(self.event(EscrowEventKind::Initialized, rent_amount, landlord, ledger_time))
    }

    /// Increase the tracked balance. Only tenants may deposit, and only
    /// while the contract is active.
    pub fn deposit(
        &mut self,
        payer: Uuid,
        amount: i64,
        ledger_time: DateTime<Utc>,
    ) -> Result<EscrowEvent, EscrowError> {
        self.require_active()?;
        if !self.tenants.contains(&payer) {
            return Err(EscrowError::Unauthorized);
        }
        if amount <= 0 {
            return Err(EscrowError::InvalidAmount(amount));
        }

        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(EscrowError::InvalidAmount(amount))?;

        Ok(self.event(EscrowEventKind::Deposited, amount, payer, ledger_time))
    }

    /// Transfer the full current balance to the landlord and reset it to
    /// zero. Landlord-only.
    pub fn withdraw(
        &mut self,
        caller: Uuid,
        ledger_time: DateTime<Utc>,
    ) -> Result<EscrowEvent, EscrowError> {
        self.require_active()?;
        if caller != self.landlord {
            return Err(EscrowError::Unauthorized);
        }

        let drained = self.balance;
        self.balance = 0;

        Ok(self.event(EscrowEventKind::Withdrawn, drained, caller, ledger_time))
    }

    /// Close out a fully paid lease. Requires the escrow to be drained.
    pub fn settle(
        &mut self,
        caller: Uuid,
        ledger_time: DateTime<Utc>,
    ) -> Result<EscrowEvent, EscrowError> {
        self.require_active()?;
        if caller != self.landlord {
            return Err(EscrowError::Unauthorized);
        }
        if self.balance != 0 {
            return Err(EscrowError::BalanceOutstanding(self.balance));
        }

        self.status = ContractStatus::Settled;
        Ok(self.event(EscrowEventKind::Settled, 0, caller, ledger_time))
    }

    /// Freeze the contract pending external resolution. Any party to the
    /// agreement may raise a dispute.
    pub fn dispute(
        &mut self,
        caller: Uuid,
        ledger_time: DateTime<Utc>,
    ) -> Result<EscrowEvent, EscrowError> {
        self.require_active()?;
        if caller != self.landlord && !self.tenants.contains(&caller) {
            return Err(EscrowError::Unauthorized);
        }

        self.status = ContractStatus::Disputed;
        Ok(self.event(EscrowEventKind::Disputed, self.balance, caller, ledger_time))
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn status(&self) -> ContractStatus {
        self.status
    }

    pub fn contract_ref(&self) -> &str {
        &self.contract_ref
    }

    fn require_active(&self) -> Result<(), EscrowError> {
        match self.status {
            ContractStatus::Active => Ok(()),
            ContractStatus::Uninitialized => Err(EscrowError::NotInitialized),
            other => Err(EscrowError::NotActive {
                current: other.as_str().to_string(),
            }),
        }
    }

    fn event(
        &self,
        kind: EscrowEventKind,
        amount: i64,
        actor: Uuid,
        ledger_time: DateTime<Utc>,
    ) -> EscrowEvent {
        EscrowEvent {
            kind,
            contract_ref: self.contract_ref.clone(),
            amount,
            actor,
            ledger_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_contract() -> (EscrowContract, Uuid, Uuid) {
        let landlord = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let mut contract = EscrowContract::new("escrow-test");
        contract
            .initialize(landlord, vec![tenant], 1000, Utc::now())
            .unwrap();
        (contract, landlord, tenant)
    }

    #[test]
    fn test_initialize_once() {
        let landlord = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let mut contract = EscrowContract::new("escrow-test");

        assert_eq!(contract.status(), ContractStatus::Uninitialized);
        contract
            .initialize(landlord, vec![tenant], 1000, Utc::now())
            .unwrap();
        assert_eq!(contract.status(), ContractStatus::Active);

        // Second call must be rejected
        let err = contract
            .initialize(landlord, vec![tenant], 1000, Utc::now())
            .unwrap_err();
        assert_eq!(err, EscrowError::AlreadyInitialized);
    }

    #[test]
    fn test_initialize_rejects_bad_terms() {
        let mut contract = EscrowContract::new("escrow-test");
        let err = contract
            .initialize(Uuid::new_v4(), vec![Uuid::new_v4()], 0, Utc::now())
            .unwrap_err();
        assert_eq!(err, EscrowError::InvalidAmount(0));

        let err = contract
            .initialize(Uuid::new_v4(), vec![], 1000, Utc::now())
            .unwrap_err();
        assert_eq!(err, EscrowError::Unauthorized);
    }

    #[test]
    fn test_deposit_authorization() {
        let (mut contract, landlord, tenant) = active_contract();

        // Landlord is not a tenant, may not deposit
        let err = contract.deposit(landlord, 500, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::Unauthorized);

        let err = contract.deposit(tenant, -5, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::InvalidAmount(-5));

        let event = contract.deposit(tenant, 500, Utc::now()).unwrap();
        assert_eq!(event.kind, EscrowEventKind::Deposited);
        assert_eq!(contract.balance(), 500);
    }

    #[test]
    fn test_deposit_order_is_commutative() {
        let landlord = Uuid::new_v4();
        let tenants: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        let mut a = EscrowContract::new("a");
        let mut b = EscrowContract::new("b");
        a.initialize(landlord, tenants.clone(), 900, Utc::now())
            .unwrap();
        b.initialize(landlord, tenants.clone(), 900, Utc::now())
            .unwrap();

        a.deposit(tenants[0], 300, Utc::now()).unwrap();
        a.deposit(tenants[1], 300, Utc::now()).unwrap();
        a.deposit(tenants[2], 300, Utc::now()).unwrap();

        b.deposit(tenants[2], 300, Utc::now()).unwrap();
        b.deposit(tenants[0], 300, Utc::now()).unwrap();
        b.deposit(tenants[1], 300, Utc::now()).unwrap();

        assert_eq!(a.balance(), b.balance());
        assert_eq!(a.balance(), 900);
    }

    #[test]
    fn test_withdraw_drains_balance() {
        let (mut contract, landlord, tenant) = active_contract();
        contract.deposit(tenant, 1000, Utc::now()).unwrap();

        // Tenant cannot withdraw
        let err = contract.withdraw(tenant, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::Unauthorized);

        let event = contract.withdraw(landlord, Utc::now()).unwrap();
        assert_eq!(event.amount, 1000);
        assert_eq!(contract.balance(), 0);
    }

    #[test]
    fn test_settle_requires_drained_escrow() {
        let (mut contract, landlord, tenant) = active_contract();
        contract.deposit(tenant, 1000, Utc::now()).unwrap();

        let err = contract.settle(landlord, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::BalanceOutstanding(1000));

        contract.withdraw(landlord, Utc::now()).unwrap();
        contract.settle(landlord, Utc::now()).unwrap();
        assert_eq!(contract.status(), ContractStatus::Settled);

        // Terminal: no further deposits
        let err = contract.deposit(tenant, 1, Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::NotActive { .. }));
    }

    #[test]
    fn test_dispute_freezes_contract() {
        let (mut contract, landlord, tenant) = active_contract();
        contract.deposit(tenant, 400, Utc::now()).unwrap();

        let outsider = Uuid::new_v4();
        let err = contract.dispute(outsider, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::Unauthorized);

        contract.dispute(tenant, Utc::now()).unwrap();
        assert_eq!(contract.status(), ContractStatus::Disputed);

        let err = contract.withdraw(landlord, Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::NotActive { .. }));
    }
}
