//! Balance projection: pure folds over the ledger.
//!
//! Balances are a cache. Everything here recomputes from inputs alone, so a
//! balance can be rebuilt at any time from the ledger, and an article total
//! from the balance rows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{ArticleId, DomainError, DomainResult, ValueObject, WarehouseId};

use crate::movement::StockMovement;
use crate::reservation::StockReservation;

/// Key of a per-warehouse balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub article_id: ArticleId,
    pub warehouse_id: WarehouseId,
}

impl BalanceKey {
    pub fn new(article_id: ArticleId, warehouse_id: WarehouseId) -> Self {
        Self {
            article_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "article {} @ warehouse {}", self.article_id, self.warehouse_id)
    }
}

impl ValueObject for BalanceKey {}

/// Denormalized stock position of one article in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub article_id: ArticleId,
    pub warehouse_id: WarehouseId,
    /// Signed fold of every active ledger entry for the key.
    pub on_hand: Decimal,
    /// Quantity reserved by open orders.
    pub committed: Decimal,
}

impl StockBalance {
    pub fn zero(key: BalanceKey) -> Self {
        Self {
            article_id: key.article_id,
            warehouse_id: key.warehouse_id,
            on_hand: Decimal::ZERO,
            committed: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.article_id, self.warehouse_id)
    }

    pub fn available(&self) -> Decimal {
        self.on_hand - self.committed
    }
}

/// Per-article total across warehouses (list-view cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleTotal {
    pub article_id: ArticleId,
    pub total_on_hand: Decimal,
}

fn checked_sum(what: &str, quantities: impl IntoIterator<Item = Decimal>) -> DomainResult<Decimal> {
    quantities.into_iter().try_fold(Decimal::ZERO, |acc, q| {
        acc.checked_add(q)
            .ok_or_else(|| DomainError::invariant(format!("{what} overflows the decimal range")))
    })
}

/// Signed sum of the active ledger entries contributing to `key`.
///
/// Entries for other keys are ignored, so callers may pass an unfiltered
/// slice of the ledger.
pub fn fold_on_hand<'a>(
    key: BalanceKey,
    movements: impl IntoIterator<Item = &'a StockMovement>,
) -> DomainResult<Decimal> {
    checked_sum(
        &format!("on hand of {key}"),
        movements.into_iter().map(|m| m.signed_effect(key)),
    )
}

/// Sum of the active reservations for `key`.
pub fn fold_committed<'a>(
    key: BalanceKey,
    reservations: impl IntoIterator<Item = &'a StockReservation>,
) -> DomainResult<Decimal> {
    checked_sum(
        &format!("committed of {key}"),
        reservations.into_iter().map(|r| r.committed_for(key)),
    )
}

/// Rebuild the balance of `key` from the ledger and the reservations.
pub fn recompute_balance<'a, 'b>(
    key: BalanceKey,
    movements: impl IntoIterator<Item = &'a StockMovement>,
    reservations: impl IntoIterator<Item = &'b StockReservation>,
) -> DomainResult<StockBalance> {
    Ok(StockBalance {
        on_hand: fold_on_hand(key, movements)?,
        committed: fold_committed(key, reservations)?,
        ..StockBalance::zero(key)
    })
}

/// Rebuild an article total from its balance rows alone.
pub fn rebuild_article_total<'a>(
    article_id: ArticleId,
    balances: impl IntoIterator<Item = &'a StockBalance>,
) -> DomainResult<ArticleTotal> {
    let total_on_hand = checked_sum(
        &format!("total of article {article_id}"),
        balances
            .into_iter()
            .filter(|b| b.article_id == article_id)
            .map(|b| b.on_hand),
    )?;
    Ok(ArticleTotal {
        article_id,
        total_on_hand,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementType;
    use chrono::{NaiveDate, Utc};
    use stockbook_core::{DocumentId, LineId};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn key(article: i64, warehouse: i64) -> BalanceKey {
        BalanceKey::new(ArticleId::new(article), WarehouseId::new(warehouse))
    }

    fn movement(t: MovementType, article: i64, warehouse: i64, qty: Decimal) -> StockMovement {
        StockMovement::new(
            t,
            ArticleId::new(article),
            WarehouseId::new(warehouse),
            qty,
            day(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn balance_folds_in_out_and_transfers() {
        let ledger = vec![
            movement(MovementType::In, 7, 1, dec!(10)),
            movement(MovementType::Out, 7, 1, dec!(2)),
            movement(MovementType::Out, 7, 2, dec!(1)),
            StockMovement::transfer(
                ArticleId::new(7),
                WarehouseId::new(1),
                WarehouseId::new(2),
                dec!(3),
                day(),
                Utc::now(),
            )
            .unwrap(),
        ];

        let reservations = vec![
            StockReservation::new(key(7, 1), dec!(4), DocumentId::new(9), LineId::new(1), Utc::now())
                .unwrap(),
            StockReservation::new(key(7, 2), dec!(1), DocumentId::new(9), LineId::new(2), Utc::now())
                .unwrap(),
        ];
        let mut released = StockReservation::new(
            key(7, 1),
            dec!(100),
            DocumentId::new(8),
            LineId::new(3),
            Utc::now(),
        )
        .unwrap();
        released.released_at = Some(Utc::now());

        let b1 = recompute_balance(
            key(7, 1),
            &ledger,
            reservations.iter().chain(std::iter::once(&released)),
        )
        .unwrap();
        let b2 = recompute_balance(key(7, 2), &ledger, &reservations).unwrap();
        assert_eq!(b1.on_hand, dec!(5));
        assert_eq!(b1.committed, dec!(4));
        assert_eq!(b1.available(), dec!(1));
        assert_eq!(b2.on_hand, dec!(2));
        assert_eq!(b2.committed, dec!(1));

        let total = rebuild_article_total(ArticleId::new(7), [&b1, &b2]).unwrap();
        assert_eq!(total.total_on_hand, dec!(7));
    }

    #[test]
    fn empty_ledger_gives_zero_balance() {
        let b = recompute_balance(key(1, 1), &[], &[]).unwrap();
        assert_eq!(b, StockBalance::zero(key(1, 1)));
    }

    #[test]
    fn article_total_ignores_other_articles() {
        let a = StockBalance {
            on_hand: dec!(3),
            ..StockBalance::zero(key(1, 1))
        };
        let b = StockBalance {
            on_hand: dec!(9),
            ..StockBalance::zero(key(2, 1))
        };
        assert_eq!(
            rebuild_article_total(ArticleId::new(1), [&a, &b]).unwrap().total_on_hand,
            dec!(3)
        );
    }

    #[test]
    fn sums_past_the_decimal_range_are_errors() {
        let ledger = vec![
            movement(MovementType::In, 7, 1, Decimal::MAX),
            movement(MovementType::In, 7, 1, Decimal::MAX),
        ];
        assert!(matches!(
            fold_on_hand(key(7, 1), &ledger),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(recompute_balance(key(7, 1), &ledger, &[]).is_err());

        let full = StockBalance {
            on_hand: Decimal::MAX,
            ..StockBalance::zero(key(7, 1))
        };
        let more = StockBalance {
            on_hand: dec!(1),
            ..StockBalance::zero(key(7, 2))
        };
        assert!(rebuild_article_total(ArticleId::new(7), [&full, &more]).is_err());
    }

    fn arb_movement() -> impl Strategy<Value = StockMovement> {
        (0u8..3, 1i64..3, 1i64..4, 1i64..4, 1u32..1000, any::<bool>()).prop_map(
            |(kind, article, from, to, qty, retracted)| {
                let qty = Decimal::new(qty as i64, 1);
                let mut m = match kind {
                    0 => movement(MovementType::In, article, from, qty),
                    1 => movement(MovementType::Out, article, from, qty),
                    _ if from != to => StockMovement::transfer(
                        ArticleId::new(article),
                        WarehouseId::new(from),
                        WarehouseId::new(to),
                        qty,
                        day(),
                        Utc::now(),
                    )
                    .unwrap(),
                    _ => movement(MovementType::In, article, from, qty),
                };
                if retracted {
                    m.retracted_at = Some(Utc::now());
                }
                m
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the fold does not depend on ledger order.
        #[test]
        fn fold_is_order_independent(
            ledger in prop::collection::vec(arb_movement(), 0..30),
            article in 1i64..3,
            warehouse in 1i64..4,
        ) {
            let k = key(article, warehouse);
            let forward = fold_on_hand(k, &ledger).unwrap();
            let mut reversed = ledger.clone();
            reversed.reverse();
            prop_assert_eq!(forward, fold_on_hand(k, &reversed).unwrap());
        }

        /// Property: summed over all warehouses, transfers cancel out and the
        /// article total equals IN minus OUT of active entries.
        #[test]
        fn article_total_matches_net_external_flow(
            ledger in prop::collection::vec(arb_movement(), 0..30),
        ) {
            let article = ArticleId::new(1);
            let balances: Vec<StockBalance> = (1..4)
                .map(|w| recompute_balance(key(1, w), &ledger, &[]).unwrap())
                .collect();
            let expected = ledger
                .iter()
                .filter(|m| m.is_active() && m.article_id == article)
                .map(|m| match m.movement_type {
                    MovementType::In => m.quantity,
                    MovementType::Out => -m.quantity,
                    MovementType::Transfer => Decimal::ZERO,
                })
                .fold(Decimal::ZERO, |acc, q| acc + q);
            prop_assert_eq!(rebuild_article_total(article, &balances).unwrap().total_on_hand, expected);
        }
    }
}
