//! Inventory ledger model.
//!
//! This crate contains the ledger entry type and the balance folds,
//! implemented purely as deterministic domain logic (no IO, no storage). The
//! transactional ledger operations live in `stockbook-infra`.

pub mod balance;
pub mod movement;
pub mod reservation;

pub use balance::{
    ArticleTotal, BalanceKey, StockBalance, fold_committed, fold_on_hand, rebuild_article_total,
    recompute_balance,
};
pub use movement::{MovementType, StockMovement};
pub use reservation::StockReservation;
