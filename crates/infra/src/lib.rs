//! Infrastructure layer: stores, the sync engine and the services built on them.
//!
//! ## Components
//!
//! - [`store`]: transactional storage boundary (in-memory, Postgres behind the
//!   `postgres` feature)
//! - [`ledger`]: inventory ledger operations and balance projection
//! - [`sync_engine`]: document-to-ledger reconciliation
//! - [`documents`]: issuing numbers and the document link graph
//! - [`audit`]: cache consistency audit and repair
//! - [`config`]: configuration loading
//!
//! Every public operation runs in one store transaction and either commits
//! completely or leaves no trace.

pub mod audit;
pub mod config;
pub mod context;
pub mod documents;
pub mod error;
pub mod ledger;
pub mod store;
pub mod sync_engine;

pub use audit::{AuditReport, BalanceDiscrepancy, TotalDiscrepancy, audit_balances};
pub use config::{ConfigError, DatabaseConfig, StockbookConfig, SyncConfig};
pub use context::WriteContext;
pub use documents::DocumentService;
pub use error::SyncError;
pub use ledger::InventoryLedger;
pub use store::{InMemoryStore, Store, StoreError, StoreTx};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
pub use sync_engine::{SyncEngine, SyncResult};
