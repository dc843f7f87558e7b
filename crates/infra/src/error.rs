//! Errors surfaced by the reconciliation services.

use thiserror::Error;

use stockbook_core::DomainError;
use stockbook_numbering::{AllocationError, FormatError, NumberScope};

use crate::store::StoreError;

/// Error returned by the sync engine, the ledger and the document service.
///
/// `AllocationConflict` and `SyncConflict` are retryable: nothing was applied
/// and re-running the same call is safe. Everything else is deterministic and
/// will fail again with the same input.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Concurrent writers kept claiming the candidate number.
    #[error("number allocation for scope {scope} gave up after {attempts} attempts")]
    AllocationConflict { scope: NumberScope, attempts: u32 },

    /// The scope ran out of sequence numbers for the configured width.
    #[error("sequence {sequence} exceeds capacity {capacity} of scope {scope}")]
    SequenceOverflow {
        scope: NumberScope,
        sequence: u64,
        capacity: u64,
    },

    /// Numbering is misconfigured (prefix, width, year out of range).
    #[error("numbering misconfigured: {0}")]
    Numbering(FormatError),

    /// The transaction lost a race with another writer.
    #[error("concurrent modification: {0}")]
    SyncConflict(String),

    /// A line cannot be reconciled against the ledger.
    #[error("invalid line {line_number}: {reason}")]
    InvalidLine { line_number: u32, reason: String },

    /// The document as a whole cannot be reconciled (or the request is invalid
    /// for its current state).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Storage failure other than a concurrency conflict.
    #[error(transparent)]
    Store(StoreError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::AllocationConflict { .. } | SyncError::SyncConflict(_)
        )
    }

    pub(crate) fn invalid_document(msg: impl Into<String>) -> Self {
        SyncError::InvalidDocument(msg.into())
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => SyncError::SyncConflict(msg),
            StoreError::NotFound(msg) => SyncError::NotFound(msg),
            other => SyncError::Store(other),
        }
    }
}

impl From<DomainError> for SyncError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidLine {
                line_number,
                reason,
            } => SyncError::InvalidLine {
                line_number,
                reason,
            },
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => SyncError::InvalidDocument(msg),
            DomainError::NotFound(msg) => SyncError::NotFound(msg),
            DomainError::Conflict(msg) => SyncError::SyncConflict(msg),
        }
    }
}

impl From<FormatError> for SyncError {
    fn from(value: FormatError) -> Self {
        match value {
            FormatError::SequenceOverflow {
                scope,
                sequence,
                capacity,
            } => SyncError::SequenceOverflow {
                scope,
                sequence,
                capacity,
            },
            other => SyncError::Numbering(other),
        }
    }
}

impl From<AllocationError<SyncError>> for SyncError {
    fn from(value: AllocationError<SyncError>) -> Self {
        match value {
            AllocationError::Conflict { scope, attempts } => {
                SyncError::AllocationConflict { scope, attempts }
            }
            AllocationError::Format(err) => err.into(),
            AllocationError::Registry(err) => err,
        }
    }
}
