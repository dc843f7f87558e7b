//! Optimistic concurrency primitives for mutable records.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a versioned record.
///
/// Documents carry a version that is bumped on every saved snapshot. Writers
/// pass the version they loaded; a mismatch at commit time means somebody else
/// saved in between.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (imports, repairs, first-time inserts by trusted callers).
    Any,
    /// The record must not exist yet.
    NoRecord,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `actual` is `None` when the record does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoRecord => actual.is_none(),
            ExpectedVersion::Exact(v) => actual == Some(v),
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_requires_existing_record() {
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
    }

    #[test]
    fn no_record_rejects_existing_record() {
        assert!(ExpectedVersion::NoRecord.matches(None));
        assert!(matches!(
            ExpectedVersion::NoRecord.check(Some(1)),
            Err(DomainError::Conflict(_))
        ));
    }
}
