use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    ArticleId, DocumentId, DomainError, DomainResult, Entity, LineId, MovementId, WarehouseId,
};

use crate::balance::BalanceKey;

/// Stock reserved by an open order line.
///
/// Reservations follow the same append/release discipline as movements but
/// feed `committed` instead of `on_hand`. An order's reservations are
/// released once a later document fulfils it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: MovementId,
    pub article_id: ArticleId,
    pub warehouse_id: WarehouseId,
    /// Always > 0.
    pub quantity: Decimal,
    pub source_document_id: DocumentId,
    pub source_document_line_id: LineId,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl StockReservation {
    pub fn new(
        key: BalanceKey,
        quantity: Decimal,
        source_document_id: DocumentId,
        source_document_line_id: LineId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "reserved quantity must be positive (got {quantity})"
            )));
        }
        Ok(Self {
            id: MovementId::new(),
            article_id: key.article_id,
            warehouse_id: key.warehouse_id,
            quantity,
            source_document_id,
            source_document_line_id,
            created_at,
            released_at: None,
        })
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.article_id, self.warehouse_id)
    }

    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }

    /// Quantity this reservation commits for `key`.
    pub fn committed_for(&self, key: BalanceKey) -> Decimal {
        if self.is_active() && self.key() == key {
            self.quantity
        } else {
            Decimal::ZERO
        }
    }
}

impl Entity for StockReservation {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
