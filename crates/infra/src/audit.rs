//! Consistency audit for the balance caches.
//!
//! Balances and article totals are caches over the ledger. The audit
//! recomputes them from scratch, reports every row that disagrees and
//! overwrites it, all in one transaction. It is the recovery path for caches
//! damaged outside the engine (manual SQL, crashed legacy writers).

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockbook_core::ArticleId;
use stockbook_inventory::{ArticleTotal, BalanceKey, StockBalance, rebuild_article_total};

use crate::error::SyncError;
use crate::ledger;
use crate::store::{Store, StoreTx};

/// A cached balance that did not match the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    pub key: BalanceKey,
    /// `None` when the cache had no row for a key with ledger entries.
    pub cached: Option<StockBalance>,
    pub recomputed: StockBalance,
}

/// A cached article total that did not match its balance rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalDiscrepancy {
    pub article_id: ArticleId,
    pub cached: Option<Decimal>,
    pub recomputed: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub checked_keys: usize,
    pub checked_articles: usize,
    pub balances: Vec<BalanceDiscrepancy>,
    pub totals: Vec<TotalDiscrepancy>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.balances.is_empty() && self.totals.is_empty()
    }

    pub fn discrepancy_count(&self) -> usize {
        self.balances.len() + self.totals.len()
    }
}

/// Audit every known balance key.
#[instrument(skip(store), err(Display))]
pub fn audit_balances<S: Store>(store: &S) -> Result<AuditReport, SyncError> {
    let mut tx = store.begin()?;
    let keys: BTreeSet<BalanceKey> = tx.known_balance_keys()?.into_iter().collect();
    let report = audit_in_tx(&mut tx, &keys)?;
    tx.commit()?;

    if report.is_clean() {
        tracing::info!(keys = report.checked_keys, "balance audit clean");
    } else {
        tracing::warn!(
            keys = report.checked_keys,
            discrepancies = report.discrepancy_count(),
            "balance audit repaired caches"
        );
    }
    Ok(report)
}

/// Audit a subset of keys (and the totals of their articles).
pub fn audit_keys<S: Store>(
    store: &S,
    keys: &BTreeSet<BalanceKey>,
) -> Result<AuditReport, SyncError> {
    let mut tx = store.begin()?;
    let report = audit_in_tx(&mut tx, keys)?;
    tx.commit()?;
    Ok(report)
}

fn audit_in_tx<T: StoreTx>(
    tx: &mut T,
    keys: &BTreeSet<BalanceKey>,
) -> Result<AuditReport, SyncError> {
    let mut report = AuditReport {
        checked_keys: keys.len(),
        ..AuditReport::default()
    };

    for key in keys {
        let cached = tx.balance(*key)?;
        let movements = tx.movements_for_key(*key)?;
        let reservations = tx.reservations_for_key(*key)?;
        let recomputed = stockbook_inventory::recompute_balance(*key, &movements, &reservations)?;

        let consistent = match &cached {
            Some(c) => *c == recomputed,
            None => recomputed == StockBalance::zero(*key),
        };
        if !consistent {
            tracing::warn!(
                %key,
                cached_on_hand = ?cached.as_ref().map(|c| c.on_hand),
                cached_committed = ?cached.as_ref().map(|c| c.committed),
                on_hand = %recomputed.on_hand,
                committed = %recomputed.committed,
                "cached balance disagrees with ledger"
            );
            tx.put_balance(&recomputed)?;
            report.balances.push(BalanceDiscrepancy {
                key: *key,
                cached,
                recomputed,
            });
        }
    }

    let articles: BTreeSet<ArticleId> = keys.iter().map(|k| k.article_id).collect();
    report.checked_articles = articles.len();
    for article_id in articles {
        let cached = tx.article_total(article_id)?.map(|t| t.total_on_hand);
        let balances = tx.balances_for_article(article_id)?;
        let ArticleTotal { total_on_hand, .. } = rebuild_article_total(article_id, &balances)?;

        if cached != Some(total_on_hand) {
            if cached.is_some() || !total_on_hand.is_zero() {
                tracing::warn!(
                    %article_id,
                    cached = ?cached,
                    recomputed = %total_on_hand,
                    "cached article total disagrees with balances"
                );
                report.totals.push(TotalDiscrepancy {
                    article_id,
                    cached,
                    recomputed: total_on_hand,
                });
            }
            ledger::refresh_article_total(tx, article_id)?;
        }
    }

    Ok(report)
}
