use serde::{Deserialize, Serialize};

use stockbook_core::{DocumentId, DomainError, DomainResult};

use crate::document_type::DocumentType;

/// Directed provenance edge: `target` aggregates or derives from `source`.
///
/// A deferred invoice listing three delivery notes has three links, all with
/// the invoice as target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentLink {
    pub target: DocumentId,
    pub source: DocumentId,
}

impl DocumentLink {
    pub fn new(target: DocumentId, source: DocumentId) -> DomainResult<Self> {
        if target == source {
            return Err(DomainError::validation(format!(
                "document {target} cannot link to itself"
            )));
        }
        Ok(Self { target, source })
    }
}

/// Decide whether a document only re-bills stock already moved by its sources.
///
/// Consolidation is all-or-nothing: as soon as one linked source moved stock
/// itself, the consolidating document produces no movements of its own.
pub fn is_billing_only(document_type: DocumentType, source_types: &[DocumentType]) -> bool {
    document_type.can_consolidate()
        && source_types
            .iter()
            .any(|t| t.stock_effect().moves_stock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_links_are_rejected() {
        assert!(DocumentLink::new(DocumentId::new(1), DocumentId::new(1)).is_err());
        assert!(DocumentLink::new(DocumentId::new(2), DocumentId::new(1)).is_ok());
    }

    #[test]
    fn deferred_invoice_over_delivery_notes_is_billing_only() {
        assert!(is_billing_only(
            DocumentType::DeferredInvoice,
            &[DocumentType::DeliveryNote, DocumentType::DeliveryNote]
        ));
        assert!(is_billing_only(DocumentType::Invoice, &[DocumentType::DeliveryNote]));
    }

    #[test]
    fn unlinked_or_order_based_invoice_still_moves_stock() {
        assert!(!is_billing_only(DocumentType::Invoice, &[]));
        assert!(!is_billing_only(DocumentType::Invoice, &[DocumentType::Order]));
        assert!(!is_billing_only(DocumentType::Invoice, &[DocumentType::Quote]));
    }

    #[test]
    fn delivery_notes_never_consolidate() {
        assert!(!is_billing_only(
            DocumentType::DeliveryNote,
            &[DocumentType::DeliveryNote]
        ));
    }
}
