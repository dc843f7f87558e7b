//! Document number scopes, formats and parsing.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use stockbook_core::ValueObject;
use stockbook_documents::DocumentType;

use crate::error::FormatError;

/// Numbering scope: numbers are unique per document type and year.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NumberScope {
    pub document_type: DocumentType,
    pub year: i32,
}

impl NumberScope {
    pub fn new(document_type: DocumentType, year: i32) -> Self {
        Self {
            document_type,
            year,
        }
    }

    /// Scope a document dated `as_of` falls into.
    pub fn for_date(document_type: DocumentType, as_of: NaiveDate) -> Self {
        Self::new(document_type, as_of.year())
    }
}

impl core::fmt::Display for NumberScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.document_type, self.year)
    }
}

impl ValueObject for NumberScope {}

/// A formatted document number together with the scope and sequence it encodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber {
    scope: NumberScope,
    sequence: u64,
    text: String,
}

impl DocumentNumber {
    pub fn scope(&self) -> NumberScope {
        self.scope
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for DocumentNumber {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl ValueObject for DocumentNumber {}

/// `<prefix><year:4><sequence:width>` layout for one document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberFormat {
    prefix: String,
    width: usize,
}

impl NumberFormat {
    /// Widest sequence that still fits in a `u64` capacity computation.
    pub const MAX_WIDTH: usize = 18;

    pub fn new(prefix: impl Into<String>, width: usize) -> Result<Self, FormatError> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.chars().any(|c| c.is_ascii_digit() || c.is_whitespace()) {
            return Err(FormatError::InvalidPrefix(prefix));
        }
        if width == 0 || width > Self::MAX_WIDTH {
            return Err(FormatError::InvalidWidth(width));
        }
        Ok(Self { prefix, width })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Largest sequence representable without widening the number.
    pub fn capacity(&self) -> u64 {
        10u64.pow(self.width as u32) - 1
    }

    /// Leading text shared by every number of the scope (e.g. `FAT2025`).
    pub fn scope_prefix(&self, year: i32) -> Result<String, FormatError> {
        if !(0..=9999).contains(&year) {
            return Err(FormatError::InvalidYear(year));
        }
        Ok(format!("{}{:04}", self.prefix, year))
    }

    /// Render `sequence` inside `scope`. Overflow fails instead of truncating.
    pub fn format(&self, scope: NumberScope, sequence: u64) -> Result<DocumentNumber, FormatError> {
        if sequence == 0 {
            return Err(FormatError::ZeroSequence);
        }
        if sequence > self.capacity() {
            return Err(FormatError::SequenceOverflow {
                scope,
                sequence,
                capacity: self.capacity(),
            });
        }
        let text = format!(
            "{}{:0>width$}",
            self.scope_prefix(scope.year)?,
            sequence,
            width = self.width
        );
        Ok(DocumentNumber {
            scope,
            sequence,
            text,
        })
    }

    /// Extract the sequence of an existing number belonging to `year`.
    ///
    /// Legacy numbers may be shorter or longer than the configured width, so
    /// any run of digits after the scope prefix is accepted. Anything else
    /// (foreign prefixes, suffixes, other years) yields `None`.
    pub fn parse_sequence(&self, year: i32, number: &str) -> Option<u64> {
        let scope_prefix = self.scope_prefix(year).ok()?;
        let digits = number.trim().strip_prefix(scope_prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u64>().ok()
    }
}
