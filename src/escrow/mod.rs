pub mod contract;

pub use contract::{ContractStatus, EscrowContract, EscrowEvent, EscrowEventKind};
