//! Probe-and-retry sequence allocation.
//!
//! The allocator never trusts a read-then-write: every candidate is persisted
//! under the store's uniqueness constraint on `(document type, number)`. A
//! violation means another writer won the race, so the maximum is re-scanned
//! and the next candidate tried.
//!
//! ```text
//! scan max(scope) ─► candidate = max + 1 ─► persist ──► committed
//!        ▲                                     │
//!        └────────── unique violation ◄────────┘   (bounded by max_attempts)
//! ```
//!
//! Candidates are always strictly greater than everything observed, so legacy
//! duplicates below the maximum are never revisited.

use chrono::NaiveDate;
use tracing::instrument;

use stockbook_documents::DocumentType;

use crate::config::NumberingConfig;
use crate::error::{AllocationError, FormatError};
use crate::number::{DocumentNumber, NumberFormat, NumberScope};

/// Outcome of persisting one candidate number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted<T> {
    /// The number is now durably owned by the caller.
    Committed(T),
    /// Another record already owns the number.
    NumberTaken,
}

/// Storage seam used by the allocator.
///
/// Each `persist` call must be its own unit of work: either the number lands
/// together with whatever the caller attaches to it, or nothing does.
pub trait NumberRegistry {
    type Output;
    type Error;

    /// Every number currently observable in the scope: live documents and the
    /// register of numbers issued in the past (deleted documents included).
    ///
    /// `scope_prefix` is the leading text shared by the scope's numbers and
    /// may be used to narrow the scan; non-matching entries are ignored.
    fn observed_numbers(
        &mut self,
        scope: NumberScope,
        scope_prefix: &str,
    ) -> Result<Vec<String>, Self::Error>;

    /// Persist `number` under the uniqueness constraint.
    fn persist(&mut self, number: &DocumentNumber) -> Result<Persisted<Self::Output>, Self::Error>;
}

/// Allocates `<prefix><year><sequence>` numbers per (document type, year).
#[derive(Debug, Clone, Default)]
pub struct SequenceAllocator {
    config: NumberingConfig,
}

impl SequenceAllocator {
    pub fn new(config: NumberingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NumberingConfig {
        &self.config
    }

    pub fn format_for(&self, document_type: DocumentType) -> Result<NumberFormat, FormatError> {
        self.config.format_for(document_type)
    }

    /// Next candidate given the numbers observed in `scope`.
    pub fn candidate<'a>(
        &self,
        scope: NumberScope,
        observed: impl IntoIterator<Item = &'a str>,
    ) -> Result<DocumentNumber, FormatError> {
        let format = self.format_for(scope.document_type)?;
        let max = observed
            .into_iter()
            .filter_map(|n| format.parse_sequence(scope.year, n))
            .max()
            .unwrap_or(0);
        let next = max.checked_add(1).ok_or(FormatError::SequenceOverflow {
            scope,
            sequence: max,
            capacity: format.capacity(),
        })?;
        format.format(scope, next)
    }

    /// Allocate and persist the next number for `document_type` as of `as_of`.
    ///
    /// Returns the number together with whatever the registry produced when
    /// persisting it.
    #[instrument(skip(self, registry), err(Display))]
    pub fn next_number<R>(
        &self,
        document_type: DocumentType,
        as_of: NaiveDate,
        registry: &mut R,
    ) -> Result<(DocumentNumber, R::Output), AllocationError<R::Error>>
    where
        R: NumberRegistry,
        R::Error: core::fmt::Display,
    {
        let scope = NumberScope::for_date(document_type, as_of);
        let scope_prefix = self.format_for(document_type)?.scope_prefix(scope.year)?;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let observed = registry
                .observed_numbers(scope, &scope_prefix)
                .map_err(AllocationError::Registry)?;
            let candidate = self.candidate(scope, observed.iter().map(String::as_str))?;

            match registry
                .persist(&candidate)
                .map_err(AllocationError::Registry)?
            {
                Persisted::Committed(output) => {
                    tracing::info!(%scope, number = %candidate, attempt, "document number allocated");
                    return Ok((candidate, output));
                }
                Persisted::NumberTaken => {
                    tracing::warn!(
                        %scope,
                        number = %candidate,
                        attempt,
                        "document number already taken; rescanning scope"
                    );
                }
            }
        }

        Err(AllocationError::Conflict { scope, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Registry over a plain list of numbers, with an optional rival writer
    /// that steals the next `steals` candidates right before they persist.
    #[derive(Debug, Default)]
    struct VecRegistry {
        numbers: Vec<String>,
        steals: u32,
        persists: u32,
    }

    impl NumberRegistry for VecRegistry {
        type Output = ();
        type Error = String;

        fn observed_numbers(
            &mut self,
            _scope: NumberScope,
            scope_prefix: &str,
        ) -> Result<Vec<String>, String> {
            Ok(self
                .numbers
                .iter()
                .filter(|n| n.starts_with(scope_prefix))
                .cloned()
                .collect())
        }

        fn persist(&mut self, number: &DocumentNumber) -> Result<Persisted<()>, String> {
            self.persists += 1;
            if self.steals > 0 {
                self.steals -= 1;
                self.numbers.push(number.as_str().to_string());
                return Ok(Persisted::NumberTaken);
            }
            if self.numbers.iter().any(|n| n == number.as_str()) {
                return Ok(Persisted::NumberTaken);
            }
            self.numbers.push(number.as_str().to_string());
            Ok(Persisted::Committed(()))
        }
    }

    fn date(y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, 6, 1).unwrap()
    }

    #[test]
    fn continues_after_existing_maximum() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            numbers: vec!["FAT20250001".into(), "FAT20250002".into()],
            ..Default::default()
        };

        let (first, ()) = allocator
            .next_number(DocumentType::Invoice, date(2025), &mut registry)
            .unwrap();
        let (second, ()) = allocator
            .next_number(DocumentType::Invoice, date(2025), &mut registry)
            .unwrap();

        assert_eq!(first.as_str(), "FAT20250003");
        assert_eq!(second.as_str(), "FAT20250004");
    }

    #[test]
    fn scopes_are_independent_per_type_and_year() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            numbers: vec!["FAT20250007".into(), "FAT20240099".into()],
            ..Default::default()
        };

        let (quote, ()) = allocator
            .next_number(DocumentType::Quote, date(2025), &mut registry)
            .unwrap();
        let (new_year, ()) = allocator
            .next_number(DocumentType::Invoice, date(2026), &mut registry)
            .unwrap();

        assert_eq!(quote.as_str(), "PRE20250001");
        assert_eq!(new_year.as_str(), "FAT20260001");
    }

    #[test]
    fn gaps_and_legacy_duplicates_are_skipped_not_filled() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            numbers: vec![
                "FAT20250001".into(),
                "FAT20250005".into(),
                "FAT20250005".into(),
                "fattura 12".into(),
            ],
            ..Default::default()
        };

        let (n, ()) = allocator
            .next_number(DocumentType::Invoice, date(2025), &mut registry)
            .unwrap();
        assert_eq!(n.as_str(), "FAT20250006");
    }

    #[test]
    fn lost_races_are_retried_with_a_fresh_scan() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            steals: 2,
            ..Default::default()
        };

        let (n, ()) = allocator
            .next_number(DocumentType::DeliveryNote, date(2025), &mut registry)
            .unwrap();
        assert_eq!(n.as_str(), "DDT20250003");
        assert_eq!(registry.persists, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            steals: 100,
            ..Default::default()
        };

        let err = allocator
            .next_number(DocumentType::Invoice, date(2025), &mut registry)
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            AllocationError::Conflict { attempts, scope } => {
                assert_eq!(attempts, 5);
                assert_eq!(scope, NumberScope::new(DocumentType::Invoice, 2025));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(registry.persists, 5);
    }

    #[test]
    fn width_overflow_is_reported() {
        let allocator = SequenceAllocator::default();
        let mut registry = VecRegistry {
            numbers: vec!["FAT20259999".into()],
            ..Default::default()
        };

        let err = allocator
            .next_number(DocumentType::Invoice, date(2025), &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Format(FormatError::SequenceOverflow { sequence: 10_000, .. })
        ));
        assert_eq!(registry.persists, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever legacy numbers exist (duplicates and gaps
        /// included), allocated numbers are pairwise distinct and never equal
        /// a pre-existing number.
        #[test]
        fn allocated_numbers_never_collide(
            legacy in prop::collection::vec(1u64..500, 0..40),
            steals in prop::collection::vec(0u32..3, 1..20),
        ) {
            let allocator = SequenceAllocator::default();
            let mut registry = VecRegistry {
                numbers: legacy.iter().map(|s| format!("FAT2025{s:04}")).collect(),
                ..Default::default()
            };
            let pre_existing: HashSet<String> = registry.numbers.iter().cloned().collect();

            let mut issued = HashSet::new();
            for s in steals {
                registry.steals = s;
                let (n, ()) = allocator
                    .next_number(DocumentType::Invoice, date(2025), &mut registry)
                    .unwrap();
                prop_assert!(!pre_existing.contains(n.as_str()));
                prop_assert!(issued.insert(n.into_string()));
            }
        }
    }
}
