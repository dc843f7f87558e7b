//! Commercial documents (delivery notes, invoices, orders, ...).
//!
//! Pure document snapshots plus the rules that classify their lines and
//! links. No IO, no storage: the sync engine in `stockbook-infra` decides
//! what these snapshots mean for the inventory ledger.

pub mod document;
pub mod document_type;
pub mod link;

pub use document::{Document, DocumentLine, DocumentStatus};
pub use document_type::{DocumentType, StockEffect};
pub use link::{DocumentLink, is_billing_only};
