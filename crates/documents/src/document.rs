use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    ArticleId, DocumentId, DomainError, DomainResult, Entity, LineId, UserId, WarehouseId,
};

use crate::document_type::{DocumentType, StockEffect};

/// Document lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Editable, no number assigned yet.
    Draft,
    /// Number assigned; lines may still be corrected.
    Issued,
    /// Cancelled; keeps its number, has no stock effect.
    Void,
}

impl DocumentStatus {
    pub fn code(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Issued => "issued",
            DocumentStatus::Void => "void",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "draft" => Some(DocumentStatus::Draft),
            "issued" => Some(DocumentStatus::Issued),
            "void" => Some(DocumentStatus::Void),
            _ => None,
        }
    }
}

/// One line of a commercial document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub id: LineId,
    /// Display order within the document (gaps allowed after deletions).
    pub line_number: u32,
    pub article_id: Option<ArticleId>,
    /// Signed quantity; the sign convention depends on the document type.
    pub quantity: Decimal,
    /// Descriptive lines (notes, services, pricing text) never touch stock.
    pub descriptive_only: bool,
    #[serde(default)]
    pub description: String,
}

impl DocumentLine {
    /// Line moving `quantity` of `article_id`.
    pub fn article(id: LineId, line_number: u32, article_id: ArticleId, quantity: Decimal) -> Self {
        Self {
            id,
            line_number,
            article_id: Some(article_id),
            quantity,
            descriptive_only: false,
            description: String::new(),
        }
    }

    /// Free-text line without stock effect.
    pub fn descriptive(id: LineId, line_number: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            line_number,
            article_id: None,
            quantity: Decimal::ZERO,
            descriptive_only: true,
            description: description.into(),
        }
    }

    /// Non-descriptive, has an article, non-zero quantity.
    pub fn is_stock_affecting(&self) -> bool {
        !self.descriptive_only && self.article_id.is_some() && !self.quantity.is_zero()
    }
}

/// Whole-document snapshot as handed over by the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub document_type: DocumentType,
    /// Assigned when the document is issued; legacy rows may carry anything.
    pub number: Option<String>,
    pub date: NaiveDate,
    /// Warehouse all stock effects apply to. Missing on some legacy rows.
    pub warehouse_id: Option<WarehouseId>,
    /// Document this one corrects or copies.
    pub original_document_id: Option<DocumentId>,
    pub status: DocumentStatus,
    /// Optimistic concurrency counter, bumped by every saved snapshot.
    pub version: u64,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub lines: Vec<DocumentLine>,
}

impl Document {
    /// New draft without lines.
    pub fn draft(id: DocumentId, document_type: DocumentType, date: NaiveDate) -> Self {
        Self {
            id,
            document_type,
            number: None,
            date,
            warehouse_id: None,
            original_document_id: None,
            status: DocumentStatus::Draft,
            version: 0,
            created_by: None,
            updated_by: None,
            lines: Vec::new(),
        }
    }

    pub fn with_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn with_line(mut self, line: DocumentLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self.updated_by = Some(user);
        self
    }

    pub fn stock_effect(&self) -> StockEffect {
        self.document_type.stock_effect()
    }

    pub fn is_void(&self) -> bool {
        self.status == DocumentStatus::Void
    }

    pub fn line(&self, id: LineId) -> Option<&DocumentLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    /// Lines that would carry a stock effect, in line-number order.
    pub fn stock_lines(&self) -> impl Iterator<Item = &DocumentLine> {
        let mut lines: Vec<&DocumentLine> =
            self.lines.iter().filter(|l| l.is_stock_affecting()).collect();
        lines.sort_by_key(|l| (l.line_number, l.id));
        lines.into_iter()
    }

    /// Structural validation performed before any ledger mutation.
    ///
    /// Reference-data checks (does the article exist?) need a store and are
    /// done by the sync engine.
    pub fn validate(&self) -> DomainResult<()> {
        let mut seen = HashSet::with_capacity(self.lines.len());
        for line in &self.lines {
            if !seen.insert(line.id) {
                return Err(DomainError::validation(format!(
                    "line id {} appears more than once on document {}",
                    line.id, self.id
                )));
            }
            self.validate_line(line)?;
        }

        let needs_warehouse = self.stock_effect() != StockEffect::None
            && !self.is_void()
            && self.lines.iter().any(DocumentLine::is_stock_affecting);
        if needs_warehouse && self.warehouse_id.is_none() {
            return Err(DomainError::validation(format!(
                "document {} has stock-affecting lines but no warehouse",
                self.id
            )));
        }

        Ok(())
    }

    fn validate_line(&self, line: &DocumentLine) -> DomainResult<()> {
        if line.quantity.is_zero() {
            return Ok(());
        }
        if line.descriptive_only {
            if line.article_id.is_some() {
                return Err(DomainError::invalid_line(
                    line.line_number,
                    "descriptive line carries an article with a non-zero quantity",
                ));
            }
            return Ok(());
        }
        if line.article_id.is_none() {
            return Err(DomainError::invalid_line(
                line.line_number,
                "missing article on a stock-affecting line",
            ));
        }
        if line.quantity.is_sign_negative() && !self.document_type.allows_negative_quantity() {
            return Err(DomainError::invalid_line(
                line.line_number,
                format!("negative quantity not permitted on {}", self.document_type),
            ));
        }
        Ok(())
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn delivery_note() -> Document {
        Document::draft(DocumentId::new(1), DocumentType::DeliveryNote, date())
            .with_warehouse(WarehouseId::new(1))
    }

    #[test]
    fn stock_lines_skip_descriptive_and_zero_quantity_lines() {
        let doc = delivery_note()
            .with_line(DocumentLine::article(LineId::new(3), 30, ArticleId::new(7), dec!(2)))
            .with_line(DocumentLine::descriptive(LineId::new(1), 10, "handle with care"))
            .with_line(DocumentLine::article(LineId::new(2), 20, ArticleId::new(8), dec!(0)))
            .with_line(DocumentLine::article(LineId::new(4), 5, ArticleId::new(9), dec!(1.5)));

        let ids: Vec<_> = doc.stock_lines().map(|l| l.id).collect();
        assert_eq!(ids, vec![LineId::new(4), LineId::new(3)]);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn lines_are_found_by_id_not_position() {
        let doc = delivery_note()
            .with_line(DocumentLine::article(LineId::new(3), 30, ArticleId::new(7), dec!(2)))
            .with_line(DocumentLine::descriptive(LineId::new(1), 10, "handle with care"));

        assert_eq!(doc.line(LineId::new(3)).and_then(|l| l.article_id), Some(ArticleId::new(7)));
        assert!(doc.line(LineId::new(1)).is_some_and(|l| l.descriptive_only));
        assert!(doc.line(LineId::new(2)).is_none());
    }

    #[test]
    fn status_codes_match_serde_names() {
        for s in [DocumentStatus::Draft, DocumentStatus::Issued, DocumentStatus::Void] {
            assert_eq!(DocumentStatus::from_code(s.code()), Some(s));
            assert_eq!(
                serde_json::to_string(&s).unwrap(),
                format!("\"{}\"", s.code())
            );
        }
        assert_eq!(DocumentStatus::from_code("cancelled"), None);
    }

    #[test]
    fn missing_article_on_stock_line_is_rejected() {
        let mut line = DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(2));
        line.article_id = None;
        let err = delivery_note().with_line(line).validate().unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_line(10, "missing article on a stock-affecting line")
        );
    }

    #[test]
    fn descriptive_line_with_article_and_quantity_is_rejected() {
        let mut line = DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(2));
        line.descriptive_only = true;
        let err = delivery_note().with_line(line).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidLine { line_number: 10, .. }));
    }

    #[test]
    fn descriptive_line_with_quantity_but_no_article_is_allowed() {
        let mut line = DocumentLine::descriptive(LineId::new(1), 10, "2h labour");
        line.quantity = dec!(2);
        assert!(delivery_note().with_line(line).validate().is_ok());
    }

    #[test]
    fn negative_quantity_depends_on_document_type() {
        let line = DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(-1));
        assert!(delivery_note().with_line(line.clone()).validate().is_err());

        let credit = Document::draft(DocumentId::new(2), DocumentType::Invoice, date())
            .with_warehouse(WarehouseId::new(1))
            .with_line(line);
        assert!(credit.validate().is_ok());
    }

    #[test]
    fn stock_document_without_warehouse_is_rejected() {
        let doc = Document::draft(DocumentId::new(1), DocumentType::DeliveryNote, date())
            .with_line(DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(2)));
        assert!(matches!(doc.validate(), Err(DomainError::Validation(_))));

        let quote = Document::draft(DocumentId::new(2), DocumentType::Quote, date())
            .with_line(DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(2)));
        assert!(quote.validate().is_ok());
    }

    #[test]
    fn duplicate_line_ids_are_rejected() {
        let doc = delivery_note()
            .with_line(DocumentLine::article(LineId::new(1), 10, ArticleId::new(7), dec!(2)))
            .with_line(DocumentLine::article(LineId::new(1), 20, ArticleId::new(8), dec!(1)));
        assert!(matches!(doc.validate(), Err(DomainError::Validation(_))));
    }
}
