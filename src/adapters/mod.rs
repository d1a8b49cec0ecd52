pub mod http;
pub mod ledger_client;
pub mod simulated;

pub use http::HttpLedgerClient;
pub use ledger_client::{EscrowOp, EscrowTransaction, Finality, LedgerClient};
pub use simulated::SimulatedLedger;
