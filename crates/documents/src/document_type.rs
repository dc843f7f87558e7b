use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockbook_core::DomainError;

/// Closed set of commercial document kinds handled by the core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    DeliveryNote,
    Invoice,
    InvoiceAccompanying,
    DeferredInvoice,
    Quote,
    Order,
    GoodsReceipt,
}

/// What a document's stock-affecting lines do to inventory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockEffect {
    /// Goods leave the document's warehouse (OUT movements).
    Outbound,
    /// Goods enter the document's warehouse (IN movements).
    Inbound,
    /// Goods are reserved but not moved (feeds `committed`, never the ledger).
    Commitment,
    /// No inventory effect at all.
    None,
}

impl StockEffect {
    /// True when the effect produces ledger movements.
    pub fn moves_stock(self) -> bool {
        matches!(self, StockEffect::Outbound | StockEffect::Inbound)
    }
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::DeliveryNote,
        DocumentType::Invoice,
        DocumentType::InvoiceAccompanying,
        DocumentType::DeferredInvoice,
        DocumentType::Quote,
        DocumentType::Order,
        DocumentType::GoodsReceipt,
    ];

    /// Stable storage code (matches the serde representation).
    pub fn code(self) -> &'static str {
        match self {
            DocumentType::DeliveryNote => "DELIVERY_NOTE",
            DocumentType::Invoice => "INVOICE",
            DocumentType::InvoiceAccompanying => "INVOICE_ACCOMPANYING",
            DocumentType::DeferredInvoice => "DEFERRED_INVOICE",
            DocumentType::Quote => "QUOTE",
            DocumentType::Order => "ORDER",
            DocumentType::GoodsReceipt => "GOODS_RECEIPT",
        }
    }

    /// Number prefix used unless configuration overrides it.
    pub fn default_prefix(self) -> &'static str {
        match self {
            DocumentType::DeliveryNote => "DDT",
            DocumentType::Invoice => "FAT",
            DocumentType::InvoiceAccompanying => "FAC",
            DocumentType::DeferredInvoice => "FDI",
            DocumentType::Quote => "PRE",
            DocumentType::Order => "ORD",
            DocumentType::GoodsReceipt => "CAR",
        }
    }

    pub fn stock_effect(self) -> StockEffect {
        match self {
            DocumentType::DeliveryNote
            | DocumentType::Invoice
            | DocumentType::InvoiceAccompanying
            | DocumentType::DeferredInvoice => StockEffect::Outbound,
            DocumentType::GoodsReceipt => StockEffect::Inbound,
            DocumentType::Order => StockEffect::Commitment,
            DocumentType::Quote => StockEffect::None,
        }
    }

    /// Whether documents of this type may re-bill stock already moved by
    /// linked source documents.
    pub fn can_consolidate(self) -> bool {
        matches!(self, DocumentType::Invoice | DocumentType::DeferredInvoice)
    }

    /// Invoices may carry credit/return lines with negative quantities.
    pub fn allows_negative_quantity(self) -> bool {
        matches!(
            self,
            DocumentType::Invoice | DocumentType::InvoiceAccompanying | DocumentType::DeferredInvoice
        )
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown document type '{s}'")))
    }
}
