use thiserror::Error;

use crate::number::NumberScope;

/// A number could not be rendered or the format itself is unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid number prefix '{0}'")]
    InvalidPrefix(String),

    #[error("invalid sequence width {0}")]
    InvalidWidth(usize),

    #[error("year {0} cannot be rendered with four digits")]
    InvalidYear(i32),

    #[error("sequence numbers start at 1")]
    ZeroSequence,

    #[error("sequence {sequence} exceeds capacity {capacity} of scope {scope}")]
    SequenceOverflow {
        scope: NumberScope,
        sequence: u64,
        capacity: u64,
    },
}

/// Number allocation failure.
///
/// `Conflict` is retryable by the caller: concurrent writers kept claiming the
/// candidate before this allocator could. It is never papered over by
/// returning a number that might already be taken.
#[derive(Debug, Error)]
pub enum AllocationError<E> {
    #[error("number allocation for scope {scope} gave up after {attempts} attempts")]
    Conflict { scope: NumberScope, attempts: u32 },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("number registry failed: {0}")]
    Registry(#[source] E),
}

impl<E> AllocationError<E> {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::Conflict { .. })
    }
}
