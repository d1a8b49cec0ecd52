pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryPaymentStore;
pub use postgres::PgPaymentStore;
pub use store::PaymentStore;
