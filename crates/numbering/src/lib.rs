//! Document numbering: `<prefix><year><sequence>` per (document type, year).
//!
//! Pure formatting/parsing plus the claim-and-retry allocation loop. Storage
//! is reached only through the [`NumberRegistry`] seam, so the same allocator
//! runs against the in-memory store in tests and Postgres in production.

pub mod allocator;
pub mod config;
pub mod error;
pub mod number;

pub use allocator::{NumberRegistry, Persisted, SequenceAllocator};
pub use config::NumberingConfig;
pub use error::{AllocationError, FormatError};
pub use number::{DocumentNumber, NumberFormat, NumberScope};
