//! Transactional storage boundary for documents, ledger and balances.
//!
//! The reconciliation core never talks to a database directly. It opens a
//! [`StoreTx`], reads and writes through it, and commits. Dropping a
//! transaction without committing rolls it back, which is what makes every
//! public operation all-or-nothing.
//!
//! ## Relations
//!
//! - documents / document lines (whole snapshots, versioned)
//! - document links (target ← source edges)
//! - issued numbers (register of every number ever claimed)
//! - stock movements and stock reservations (append/retract ledgers)
//! - stock balances and article totals (recomputable caches)
//! - articles and warehouses (read-only reference data)

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockbook_core::{ArticleId, DocumentId, ExpectedVersion, LineId, MovementId, WarehouseId};
use stockbook_documents::{Document, DocumentLink, DocumentType};
use stockbook_inventory::{ArticleTotal, BalanceKey, StockBalance, StockMovement, StockReservation};

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Storage operation error.
///
/// These are **infrastructure errors** (constraints, concurrency, backend
/// failures) as opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (e.g. a document number
    /// claimed by another writer).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Optimistic concurrency or serialization failure; retrying the whole
    /// operation is safe.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// A record the operation depends on does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data cannot be mapped back into the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Backend failure (connection, IO, lock poisoning, ...).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A source of transactions.
pub trait Store: Send + Sync {
    type Tx<'a>: StoreTx
    where
        Self: 'a;

    /// Open a transaction. Bounded and synchronous; never waits on user input.
    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    type Tx<'a>
        = S::Tx<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        (**self).begin()
    }
}

/// One unit of work. Reads observe the transaction's own writes.
///
/// Ledger reads (`movements_*`, `reservations_*`) return **active** entries
/// only; retracted and released entries are kept by the store for auditing.
pub trait StoreTx {
    // Reference data (read-only to the core).
    fn article_exists(&mut self, id: ArticleId) -> Result<bool, StoreError>;
    fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError>;

    // Documents.
    fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Insert or replace a whole document snapshot (lines included).
    ///
    /// The stored version must satisfy `expected`; the snapshot is written
    /// with the next version, which is returned.
    fn save_document(
        &mut self,
        document: &Document,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError>;

    /// Remove a document, its lines and every link touching it.
    fn remove_document(&mut self, id: DocumentId) -> Result<(), StoreError>;

    /// Numbers of `document_type` starting with `prefix`, from live documents
    /// and from the issued-numbers register.
    fn observed_numbers(
        &mut self,
        document_type: DocumentType,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Record `number` as issued to `document_id`.
    ///
    /// Fails with [`StoreError::UniqueViolation`] when the number was already
    /// issued, at the latest when the transaction commits.
    fn claim_number(
        &mut self,
        document_type: DocumentType,
        number: &str,
        document_id: DocumentId,
    ) -> Result<(), StoreError>;

    // Link graph.
    /// Returns `false` when the link already existed.
    fn add_link(&mut self, link: DocumentLink) -> Result<bool, StoreError>;
    fn links_for(&mut self, target: DocumentId) -> Result<Vec<DocumentId>, StoreError>;
    fn links_from(&mut self, source: DocumentId) -> Result<Vec<DocumentId>, StoreError>;

    // Ledger.
    fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;
    fn retract_movement(&mut self, id: MovementId, at: DateTime<Utc>) -> Result<(), StoreError>;
    fn movements_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockMovement>, StoreError>;
    fn movements_for_line(&mut self, line_id: LineId) -> Result<Vec<StockMovement>, StoreError>;
    /// Entries contributing to `key`, transfers into the warehouse included.
    fn movements_for_key(&mut self, key: BalanceKey) -> Result<Vec<StockMovement>, StoreError>;

    fn insert_reservation(&mut self, reservation: &StockReservation) -> Result<(), StoreError>;
    fn release_reservation(&mut self, id: MovementId, at: DateTime<Utc>)
    -> Result<(), StoreError>;
    fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockReservation>, StoreError>;
    fn reservations_for_key(
        &mut self,
        key: BalanceKey,
    ) -> Result<Vec<StockReservation>, StoreError>;

    // Balance caches.
    fn balance(&mut self, key: BalanceKey) -> Result<Option<StockBalance>, StoreError>;
    fn balances_for_article(
        &mut self,
        article_id: ArticleId,
    ) -> Result<Vec<StockBalance>, StoreError>;
    /// Every key with a cached balance or at least one ledger entry.
    fn known_balance_keys(&mut self) -> Result<Vec<BalanceKey>, StoreError>;
    fn put_balance(&mut self, balance: &StockBalance) -> Result<(), StoreError>;
    fn article_total(&mut self, article_id: ArticleId)
    -> Result<Option<ArticleTotal>, StoreError>;
    fn put_article_total(&mut self, total: &ArticleTotal) -> Result<(), StoreError>;

    /// Make every write of this transaction visible atomically.
    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
