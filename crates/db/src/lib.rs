pub mod error;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod queries;
pub mod retry;
pub mod tokens;

pub use error::StoreError;
pub use ledger::{LedgerStore, NewLedgerEntry, PgLedgerStore};
pub use memory::MemoryLedgerStore;
pub use tokens::{MemoryTokenRegistry, PgTokenRegistry, TokenRegistry};
