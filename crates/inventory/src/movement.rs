use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    ArticleId, DocumentId, DomainError, DomainResult, Entity, LineId, MovementId, UserId,
    WarehouseId,
};

use crate::balance::BalanceKey;

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    In,
    Out,
    /// Out of `warehouse_id`, into `destination_warehouse_id`.
    Transfer,
}

impl MovementType {
    pub fn code(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Transfer => "TRANSFER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "IN" => Some(MovementType::In),
            "OUT" => Some(MovementType::Out),
            "TRANSFER" => Some(MovementType::Transfer),
            _ => None,
        }
    }
}

/// Ledger entry.
///
/// Entries are append/retract only: a change in effect is always a
/// retraction of the old entry plus a new entry. Retracted entries stay in the
/// ledger for auditing but no longer count towards any balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub article_id: ArticleId,
    pub warehouse_id: WarehouseId,
    /// Only set on transfers.
    pub destination_warehouse_id: Option<WarehouseId>,
    pub movement_type: MovementType,
    /// Unsigned magnitude, always > 0.
    pub quantity: Decimal,
    pub movement_date: NaiveDate,
    /// Document that produced the entry; `None` for manual adjustments.
    pub source_document_id: Option<DocumentId>,
    pub source_document_line_id: Option<LineId>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub retracted_at: Option<DateTime<Utc>>,
}

impl StockMovement {
    /// Build an IN or OUT entry.
    pub fn new(
        movement_type: MovementType,
        article_id: ArticleId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
        movement_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if movement_type == MovementType::Transfer {
            return Err(DomainError::validation(
                "transfers need a destination warehouse; use StockMovement::transfer",
            ));
        }
        Self::build(
            movement_type,
            article_id,
            warehouse_id,
            None,
            quantity,
            movement_date,
            created_at,
        )
    }

    pub fn transfer(
        article_id: ArticleId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: Decimal,
        movement_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if from == to {
            return Err(DomainError::validation(format!(
                "transfer source and destination are both warehouse {from}"
            )));
        }
        Self::build(
            MovementType::Transfer,
            article_id,
            from,
            Some(to),
            quantity,
            movement_date,
            created_at,
        )
    }

    fn build(
        movement_type: MovementType,
        article_id: ArticleId,
        warehouse_id: WarehouseId,
        destination_warehouse_id: Option<WarehouseId>,
        quantity: Decimal,
        movement_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "movement quantity must be positive (got {quantity})"
            )));
        }
        Ok(Self {
            id: MovementId::new(),
            article_id,
            warehouse_id,
            destination_warehouse_id,
            movement_type,
            quantity,
            movement_date,
            source_document_id: None,
            source_document_line_id: None,
            created_by: None,
            created_at,
            retracted_at: None,
        })
    }

    pub fn with_provenance(mut self, document_id: DocumentId, line_id: LineId) -> Self {
        self.source_document_id = Some(document_id);
        self.source_document_line_id = Some(line_id);
        self
    }

    pub fn with_creator(mut self, user: Option<UserId>) -> Self {
        self.created_by = user;
        self
    }

    pub fn is_active(&self) -> bool {
        self.retracted_at.is_none()
    }

    pub fn has_document_provenance(&self) -> bool {
        self.source_document_id.is_some()
    }

    /// Balance keys this entry contributes to (two for transfers).
    pub fn touched_keys(&self) -> Vec<BalanceKey> {
        let mut keys = vec![BalanceKey::new(self.article_id, self.warehouse_id)];
        if let Some(dest) = self.destination_warehouse_id {
            keys.push(BalanceKey::new(self.article_id, dest));
        }
        keys
    }

    /// Signed contribution of this entry to the on-hand quantity of `key`.
    ///
    /// Retracted entries contribute nothing.
    pub fn signed_effect(&self, key: BalanceKey) -> Decimal {
        if !self.is_active() || self.article_id != key.article_id {
            return Decimal::ZERO;
        }
        let at_source = self.warehouse_id == key.warehouse_id;
        match self.movement_type {
            MovementType::In if at_source => self.quantity,
            MovementType::Out if at_source => -self.quantity,
            MovementType::Transfer => {
                let at_dest = self.destination_warehouse_id == Some(key.warehouse_id);
                match (at_source, at_dest) {
                    (true, false) => -self.quantity,
                    (false, true) => self.quantity,
                    _ => Decimal::ZERO,
                }
            }
            _ => Decimal::ZERO,
        }
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn key(article: i64, warehouse: i64) -> BalanceKey {
        BalanceKey::new(ArticleId::new(article), WarehouseId::new(warehouse))
    }

    #[test]
    fn in_and_out_are_signed_at_their_warehouse_only() {
        let out = StockMovement::new(
            MovementType::Out,
            ArticleId::new(7),
            WarehouseId::new(1),
            dec!(2),
            day(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(out.signed_effect(key(7, 1)), dec!(-2));
        assert_eq!(out.signed_effect(key(7, 2)), dec!(0));
        assert_eq!(out.signed_effect(key(8, 1)), dec!(0));
    }

    #[test]
    fn transfer_splits_into_out_and_in() {
        let t = StockMovement::transfer(
            ArticleId::new(7),
            WarehouseId::new(1),
            WarehouseId::new(2),
            dec!(3.5),
            day(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.signed_effect(key(7, 1)), dec!(-3.5));
        assert_eq!(t.signed_effect(key(7, 2)), dec!(3.5));
        assert_eq!(t.touched_keys(), vec![key(7, 1), key(7, 2)]);
    }

    #[test]
    fn retracted_entries_have_no_effect() {
        let mut m = StockMovement::new(
            MovementType::In,
            ArticleId::new(7),
            WarehouseId::new(1),
            dec!(5),
            day(),
            Utc::now(),
        )
        .unwrap();
        m.retracted_at = Some(Utc::now());
        assert_eq!(m.signed_effect(key(7, 1)), dec!(0));
    }

    #[test]
    fn non_positive_quantities_and_degenerate_transfers_are_rejected() {
        let now = Utc::now();
        let a = ArticleId::new(1);
        let w = WarehouseId::new(1);
        assert!(StockMovement::new(MovementType::In, a, w, dec!(0), day(), now).is_err());
        assert!(StockMovement::new(MovementType::Out, a, w, dec!(-1), day(), now).is_err());
        assert!(StockMovement::new(MovementType::Transfer, a, w, dec!(1), day(), now).is_err());
        assert!(StockMovement::transfer(a, w, w, dec!(1), day(), now).is_err());
    }

    #[test]
    fn movement_type_codes_round_trip() {
        for t in [MovementType::In, MovementType::Out, MovementType::Transfer] {
            assert_eq!(MovementType::from_code(t.code()), Some(t));
        }
        assert_eq!(MovementType::from_code("ADJUST"), None);
    }
}
