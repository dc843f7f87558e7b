//! Inventory ledger and balance projector over a store transaction.
//!
//! The free functions operate inside a caller-owned transaction so the sync
//! engine can batch a whole document reconciliation into one commit.
//! [`InventoryLedger`] wraps the same operations for callers that want one
//! transaction per call (manual adjustments, transfers, repairs).
//!
//! Every ledger mutation is followed, in the same transaction, by a
//! recomputation of the balances of every key it touched and of the totals of
//! the touched articles. Balances are never incremented in place.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::instrument;

use stockbook_core::{ArticleId, LineId, WarehouseId};
use stockbook_inventory::{
    ArticleTotal, BalanceKey, MovementType, StockBalance, StockMovement, rebuild_article_total,
    recompute_balance as fold_balance,
};

use crate::context::WriteContext;
use crate::error::SyncError;
use crate::store::{Store, StoreTx};

/// Append an entry to the ledger. Returns the keys whose balance it affects.
pub fn apply_movement<T: StoreTx>(
    tx: &mut T,
    movement: &StockMovement,
) -> Result<Vec<BalanceKey>, SyncError> {
    if !movement.is_active() {
        return Err(SyncError::invalid_document(format!(
            "movement {} is already retracted",
            movement.id
        )));
    }
    if movement.quantity <= Decimal::ZERO {
        return Err(SyncError::invalid_document(format!(
            "movement {} has non-positive quantity {}",
            movement.id, movement.quantity
        )));
    }
    tx.insert_movement(movement)?;
    Ok(movement.touched_keys())
}

/// Retract one active entry. Returns the keys whose balance it affected.
pub fn retract_movement<T: StoreTx>(
    tx: &mut T,
    movement: &StockMovement,
    ctx: &WriteContext,
) -> Result<Vec<BalanceKey>, SyncError> {
    tx.retract_movement(movement.id, ctx.at)?;
    Ok(movement.touched_keys())
}

/// Retract every active entry produced by `line_id`.
pub fn retract_movements_for_document_line<T: StoreTx>(
    tx: &mut T,
    line_id: LineId,
    ctx: &WriteContext,
) -> Result<Vec<StockMovement>, SyncError> {
    let movements = tx.movements_for_line(line_id)?;
    for m in &movements {
        tx.retract_movement(m.id, ctx.at)?;
    }
    Ok(movements)
}

/// Rebuild the balance of `key` from the ledger and persist it.
pub fn recompute_balance<T: StoreTx>(tx: &mut T, key: BalanceKey) -> Result<StockBalance, SyncError> {
    let movements = tx.movements_for_key(key)?;
    let reservations = tx.reservations_for_key(key)?;
    let balance = fold_balance(key, &movements, &reservations)?;
    tx.put_balance(&balance)?;
    Ok(balance)
}

/// Rebuild the total of `article_id` from its balance rows and persist it.
pub fn refresh_article_total<T: StoreTx>(
    tx: &mut T,
    article_id: ArticleId,
) -> Result<ArticleTotal, SyncError> {
    let balances = tx.balances_for_article(article_id)?;
    let total = rebuild_article_total(article_id, &balances)?;
    tx.put_article_total(&total)?;
    Ok(total)
}

/// Recompute every key in `keys`, then the totals of their articles.
pub fn refresh_balances<T: StoreTx>(
    tx: &mut T,
    keys: &BTreeSet<BalanceKey>,
) -> Result<Vec<StockBalance>, SyncError> {
    let mut balances = Vec::with_capacity(keys.len());
    for key in keys {
        balances.push(recompute_balance(tx, *key)?);
    }
    let articles: BTreeSet<ArticleId> = keys.iter().map(|k| k.article_id).collect();
    for article_id in articles {
        refresh_article_total(tx, article_id)?;
    }
    Ok(balances)
}

pub(crate) fn ensure_article<T: StoreTx>(tx: &mut T, id: ArticleId) -> Result<(), SyncError> {
    if tx.article_exists(id)? {
        Ok(())
    } else {
        Err(SyncError::NotFound(format!("article {id}")))
    }
}

pub(crate) fn ensure_warehouse<T: StoreTx>(tx: &mut T, id: WarehouseId) -> Result<(), SyncError> {
    if tx.warehouse_exists(id)? {
        Ok(())
    } else {
        Err(SyncError::NotFound(format!("warehouse {id}")))
    }
}

/// Ledger operations, one transaction per call.
#[derive(Debug, Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S: Store> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append `movement` and refresh the balances it touches.
    #[instrument(skip(self, movement), fields(movement_id = %movement.id), err(Display))]
    pub fn apply_movement(&self, movement: &StockMovement) -> Result<Vec<StockBalance>, SyncError> {
        let mut tx = self.store.begin()?;
        for key in movement.touched_keys() {
            ensure_article(&mut tx, key.article_id)?;
            ensure_warehouse(&mut tx, key.warehouse_id)?;
        }
        let keys: BTreeSet<BalanceKey> = apply_movement(&mut tx, movement)?.into_iter().collect();
        let balances = refresh_balances(&mut tx, &keys)?;
        tx.commit()?;
        tracing::info!(movement_id = %movement.id, "movement applied");
        Ok(balances)
    }

    /// Retract every active entry of `line_id`. Returns how many were retracted.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn retract_movements_for_document_line(
        &self,
        line_id: LineId,
        ctx: &WriteContext,
    ) -> Result<usize, SyncError> {
        let mut tx = self.store.begin()?;
        let retracted = retract_movements_for_document_line(&mut tx, line_id, ctx)?;
        let keys: BTreeSet<BalanceKey> =
            retracted.iter().flat_map(StockMovement::touched_keys).collect();
        refresh_balances(&mut tx, &keys)?;
        tx.commit()?;
        Ok(retracted.len())
    }

    /// Rebuild and persist the balance of one key.
    #[instrument(skip(self), err(Display))]
    pub fn recompute_balance(
        &self,
        article_id: ArticleId,
        warehouse_id: WarehouseId,
    ) -> Result<StockBalance, SyncError> {
        let key = BalanceKey::new(article_id, warehouse_id);
        let mut tx = self.store.begin()?;
        let balance = recompute_balance(&mut tx, key)?;
        refresh_article_total(&mut tx, article_id)?;
        tx.commit()?;
        Ok(balance)
    }

    /// Cached balance; zero for keys that never had a movement.
    pub fn balance(
        &self,
        article_id: ArticleId,
        warehouse_id: WarehouseId,
    ) -> Result<StockBalance, SyncError> {
        let key = BalanceKey::new(article_id, warehouse_id);
        let mut tx = self.store.begin()?;
        Ok(tx.balance(key)?.unwrap_or_else(|| StockBalance::zero(key)))
    }

    /// Cached article total; zero for unknown articles.
    pub fn article_total(&self, article_id: ArticleId) -> Result<ArticleTotal, SyncError> {
        let mut tx = self.store.begin()?;
        Ok(tx.article_total(article_id)?.unwrap_or(ArticleTotal {
            article_id,
            total_on_hand: Decimal::ZERO,
        }))
    }

    /// Manual stock correction without document provenance.
    ///
    /// A positive `delta` books an IN, a negative one an OUT.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn adjust(
        &self,
        article_id: ArticleId,
        warehouse_id: WarehouseId,
        delta: Decimal,
        date: NaiveDate,
        ctx: &WriteContext,
    ) -> Result<StockBalance, SyncError> {
        if delta.is_zero() {
            return Err(SyncError::invalid_document("stock adjustment of zero"));
        }
        let movement_type = if delta.is_sign_negative() {
            MovementType::Out
        } else {
            MovementType::In
        };
        let movement = StockMovement::new(
            movement_type,
            article_id,
            warehouse_id,
            delta.abs(),
            date,
            ctx.at,
        )?
        .with_creator(ctx.acting_user);

        let key = BalanceKey::new(article_id, warehouse_id);
        self.apply_movement(&movement)?
            .into_iter()
            .find(|b| b.key() == key)
            .ok_or_else(|| SyncError::NotFound(format!("balance {key}")))
    }

    /// Move `quantity` of an article between two warehouses.
    ///
    /// Returns the balances of the source and the destination.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn transfer(
        &self,
        article_id: ArticleId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: Decimal,
        date: NaiveDate,
        ctx: &WriteContext,
    ) -> Result<(StockBalance, StockBalance), SyncError> {
        let movement = StockMovement::transfer(article_id, from, to, quantity, date, ctx.at)?
            .with_creator(ctx.acting_user);
        let balances = self.apply_movement(&movement)?;
        let pick = |warehouse_id: WarehouseId| {
            let key = BalanceKey::new(article_id, warehouse_id);
            balances
                .iter()
                .find(|b| b.key() == key)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(format!("balance {key}")))
        };
        Ok((pick(from)?, pick(to)?))
    }
}
