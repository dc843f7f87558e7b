use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockbook_documents::DocumentType;

use crate::error::FormatError;
use crate::number::NumberFormat;

/// Numbering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingConfig {
    /// Probe-and-retry attempts before reporting a conflict.
    pub max_attempts: u32,
    /// Zero-padded width of the sequence part.
    pub sequence_width: usize,
    /// Per-type prefix overrides; types not listed use their default prefix.
    pub prefixes: BTreeMap<DocumentType, String>,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            sequence_width: 4,
            prefixes: BTreeMap::new(),
        }
    }
}

impl NumberingConfig {
    pub fn prefix_for(&self, document_type: DocumentType) -> &str {
        self.prefixes
            .get(&document_type)
            .map(String::as_str)
            .unwrap_or_else(|| document_type.default_prefix())
    }

    pub fn format_for(&self, document_type: DocumentType) -> Result<NumberFormat, FormatError> {
        NumberFormat::new(self.prefix_for(document_type), self.sequence_width)
    }

    /// Check every type's format up front so misconfiguration fails at startup.
    pub fn validate(&self) -> Result<(), FormatError> {
        for t in DocumentType::ALL {
            self.format_for(t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_observed_layout() {
        let cfg = NumberingConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.prefix_for(DocumentType::Invoice), "FAT");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn prefix_overrides_deserialize_from_json() {
        let cfg: NumberingConfig =
            serde_json::from_str(r#"{ "prefixes": { "QUOTE": "OFF" }, "sequence_width": 5 }"#)
                .unwrap();
        assert_eq!(cfg.prefix_for(DocumentType::Quote), "OFF");
        assert_eq!(cfg.prefix_for(DocumentType::Invoice), "FAT");
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.format_for(DocumentType::Quote).unwrap().width(), 5);
    }

    #[test]
    fn invalid_override_fails_validation() {
        let mut cfg = NumberingConfig::default();
        cfg.prefixes.insert(DocumentType::Order, "O1".to_string());
        assert!(matches!(cfg.validate(), Err(FormatError::InvalidPrefix(_))));
    }
}
