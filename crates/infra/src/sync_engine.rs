//! Document sync engine.
//!
//! Reconciles the ledger with the current snapshot of one document:
//!
//! ```text
//! load document ─► validate ─► plan desired entries ─► diff against active entries
//!                                                        │
//!        commit ◄─ refresh touched balances ◄─ retract / create
//! ```
//!
//! The plan is keyed by line id. An entry that still matches its line is kept
//! untouched, which is what makes `sync(d); sync(d)` a no-op. Anything that
//! changed is retracted and re-created; nothing is updated in place.
//!
//! Orders do not move stock. Their lines become reservations, which feed the
//! `committed` side of the balance until a later document links to the order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockbook_core::{ArticleId, DocumentId, ExpectedVersion, LineId, WarehouseId};
use stockbook_documents::{
    Document, DocumentLine, DocumentStatus, DocumentType, StockEffect, is_billing_only,
};
use stockbook_inventory::{BalanceKey, MovementType, StockMovement, StockReservation};

use crate::audit;
use crate::config::SyncConfig;
use crate::context::WriteContext;
use crate::error::SyncError;
use crate::ledger;
use crate::store::{Store, StoreTx};

/// What one reconciliation changed.
///
/// Counts cover both ledger movements and order reservations. A line whose
/// entry was replaced counts once as `updated`, not as retract + create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub retracted: usize,
    /// Balance keys recomputed by this reconciliation.
    pub touched_keys: BTreeSet<BalanceKey>,
}

impl SyncResult {
    /// True when the ledger already matched the document.
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.retracted == 0
    }

    pub fn merge(&mut self, other: SyncResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.retracted += other.retracted;
        self.touched_keys.extend(other.touched_keys);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedMovement {
    line_id: LineId,
    article_id: ArticleId,
    warehouse_id: WarehouseId,
    movement_type: MovementType,
    quantity: Decimal,
}

impl PlannedMovement {
    fn matches(&self, m: &StockMovement) -> bool {
        m.article_id == self.article_id
            && m.warehouse_id == self.warehouse_id
            && m.destination_warehouse_id.is_none()
            && m.movement_type == self.movement_type
            && m.quantity == self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedReservation {
    line_id: LineId,
    key: BalanceKey,
    quantity: Decimal,
}

impl PlannedReservation {
    fn matches(&self, r: &StockReservation) -> bool {
        r.key() == self.key && r.quantity == self.quantity
    }
}

/// Entries a document should have, one per stock-affecting line.
#[derive(Debug, Default)]
struct Plan {
    movements: Vec<PlannedMovement>,
    reservations: Vec<PlannedReservation>,
}

/// Reconciles documents with the inventory ledger.
#[derive(Debug, Clone)]
pub struct SyncEngine<S> {
    store: S,
    config: SyncConfig,
}

impl<S: Store> SyncEngine<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bring the ledger in line with the stored document. Idempotent.
    ///
    /// A document that no longer exists has all of its entries retracted.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn sync(&self, document_id: DocumentId, ctx: &WriteContext) -> Result<SyncResult, SyncError> {
        let mut tx = self.store.begin()?;
        let result = match tx.document(document_id)? {
            Some(document) => reconcile_with_sources(&mut tx, &document, ctx)?,
            None => apply_plan(
                &mut tx,
                document_id,
                ctx.at.date_naive(),
                &Plan::default(),
                ctx,
            )?,
        };
        tx.commit()?;
        self.after_commit(document_id, &result);
        Ok(result)
    }

    /// Write a whole document snapshot and reconcile it in one transaction.
    ///
    /// Numbers are assigned by issuing and the status changes through
    /// [`SyncEngine::void`], so a snapshot that alters either is rejected.
    /// Returns the new document version.
    #[instrument(skip(self, snapshot, ctx), fields(document_id = %snapshot.id), err(Display))]
    pub fn save_and_sync(
        &self,
        snapshot: &Document,
        expected: ExpectedVersion,
        ctx: &WriteContext,
    ) -> Result<(u64, SyncResult), SyncError> {
        snapshot.validate()?;

        let mut tx = self.store.begin()?;
        let stored = tx.document(snapshot.id)?;
        let (number, status) = stored
            .as_ref()
            .map(|d| (d.number.clone(), d.status))
            .unwrap_or((None, DocumentStatus::Draft));
        if snapshot.number != number {
            return Err(SyncError::invalid_document(format!(
                "document {}: numbers are assigned when issuing",
                snapshot.id
            )));
        }
        if snapshot.status != status {
            return Err(SyncError::invalid_document(format!(
                "document {}: status {:?} cannot be changed to {:?} by saving",
                snapshot.id, status, snapshot.status
            )));
        }

        let mut document = snapshot.clone();
        document.updated_by = ctx.acting_user.or(document.updated_by);
        match &stored {
            Some(previous) => document.created_by = previous.created_by,
            None => document.created_by = document.created_by.or(ctx.acting_user),
        }
        document.version = tx.save_document(&document, expected)?;

        let result = reconcile_with_sources(&mut tx, &document, ctx)?;
        tx.commit()?;
        self.after_commit(document.id, &result);
        Ok((document.version, result))
    }

    /// Mark a document void and retract everything it produced.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn void(&self, document_id: DocumentId, ctx: &WriteContext) -> Result<SyncResult, SyncError> {
        let mut tx = self.store.begin()?;
        let mut document = tx
            .document(document_id)?
            .ok_or_else(|| SyncError::NotFound(format!("document {document_id}")))?;
        if !document.is_void() {
            document.status = DocumentStatus::Void;
            document.updated_by = ctx.acting_user.or(document.updated_by);
            document.version =
                tx.save_document(&document, ExpectedVersion::Exact(document.version))?;
        }
        let result = reconcile_with_sources(&mut tx, &document, ctx)?;
        tx.commit()?;
        self.after_commit(document_id, &result);
        Ok(result)
    }

    /// Remove a document and its links, retracting everything it produced.
    ///
    /// The document's number stays in the issued register and is never
    /// handed out again.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn delete(&self, document_id: DocumentId, ctx: &WriteContext) -> Result<SyncResult, SyncError> {
        let mut tx = self.store.begin()?;
        if tx.document(document_id)?.is_none() {
            return Err(SyncError::NotFound(format!("document {document_id}")));
        }
        let sources = tx.links_for(document_id)?;
        let targets = tx.links_from(document_id)?;

        let mut result = apply_plan(
            &mut tx,
            document_id,
            ctx.at.date_naive(),
            &Plan::default(),
            ctx,
        )?;
        tx.remove_document(document_id)?;
        result.merge(reconcile_orders(&mut tx, &sources, ctx)?);
        // A consolidating target may book its own stock once this source is gone.
        for target in targets {
            if let Some(doc) = tx.document(target)? {
                result.merge(reconcile(&mut tx, &doc, ctx)?);
            }
        }

        tx.commit()?;
        self.after_commit(document_id, &result);
        Ok(result)
    }

    fn after_commit(&self, document_id: DocumentId, result: &SyncResult) {
        if result.is_empty() {
            tracing::debug!(%document_id, "document already in sync");
            return;
        }
        tracing::info!(
            %document_id,
            created = result.created,
            updated = result.updated,
            retracted = result.retracted,
            keys = result.touched_keys.len(),
            "document synced"
        );

        if self.config.audit_after_sync {
            // The sync itself is committed; audit failures are reported, not returned.
            match audit::audit_keys(&self.store, &result.touched_keys) {
                Ok(report) if !report.is_clean() => tracing::warn!(
                    %document_id,
                    discrepancies = report.discrepancy_count(),
                    "post-sync audit repaired balances"
                ),
                Ok(_) => {}
                Err(err) => tracing::warn!(%document_id, error = %err, "post-sync audit failed"),
            }
        }
    }
}

/// Reconcile `document`, then every order it draws from.
///
/// Linking to an order fulfils it, so whenever a document changes (voided,
/// re-saved) the orders among its sources may have to reserve again or stop
/// reserving.
pub(crate) fn reconcile_with_sources<T: StoreTx>(
    tx: &mut T,
    document: &Document,
    ctx: &WriteContext,
) -> Result<SyncResult, SyncError> {
    let mut result = reconcile(tx, document, ctx)?;
    let sources = tx.links_for(document.id)?;
    result.merge(reconcile_orders(tx, &sources, ctx)?);
    Ok(result)
}

pub(crate) fn reconcile_orders<T: StoreTx>(
    tx: &mut T,
    candidates: &[DocumentId],
    ctx: &WriteContext,
) -> Result<SyncResult, SyncError> {
    let mut result = SyncResult::default();
    for id in candidates {
        if let Some(source) = tx.document(*id)? {
            if source.document_type == DocumentType::Order {
                result.merge(reconcile(tx, &source, ctx)?);
            }
        }
    }
    Ok(result)
}

/// Reconcile one document inside the caller's transaction.
pub(crate) fn reconcile<T: StoreTx>(
    tx: &mut T,
    document: &Document,
    ctx: &WriteContext,
) -> Result<SyncResult, SyncError> {
    let plan = plan(tx, document)?;
    apply_plan(tx, document.id, document.date, &plan, ctx)
}

fn plan<T: StoreTx>(tx: &mut T, document: &Document) -> Result<Plan, SyncError> {
    if document.is_void() {
        return Ok(Plan::default());
    }
    document.validate()?;

    let effect = document.stock_effect();
    let lines: Vec<&DocumentLine> = document.stock_lines().collect();
    if effect == StockEffect::None || lines.is_empty() {
        return Ok(Plan::default());
    }

    let warehouse_id = document.warehouse_id.ok_or_else(|| {
        SyncError::invalid_document(format!(
            "document {} has stock-affecting lines but no warehouse",
            document.id
        ))
    })?;
    if !tx.warehouse_exists(warehouse_id)? {
        return Err(SyncError::invalid_document(format!(
            "document {} references unknown warehouse {warehouse_id}",
            document.id
        )));
    }

    let mut stock_lines = Vec::with_capacity(lines.len());
    for line in lines {
        let article_id = line.article_id.ok_or_else(|| SyncError::InvalidLine {
            line_number: line.line_number,
            reason: "missing article on a stock-affecting line".to_string(),
        })?;
        if !tx.article_exists(article_id)? {
            return Err(SyncError::InvalidLine {
                line_number: line.line_number,
                reason: format!("unknown article {article_id}"),
            });
        }
        stock_lines.push((line, article_id));
    }

    let mut plan = Plan::default();
    match effect {
        StockEffect::Outbound | StockEffect::Inbound => {
            if billing_only(tx, document)? {
                tracing::debug!(document_id = %document.id, "consolidating document; no own movements");
                return Ok(plan);
            }
            let base = if effect == StockEffect::Outbound {
                MovementType::Out
            } else {
                MovementType::In
            };
            plan.movements = stock_lines
                .into_iter()
                .map(|(line, article_id)| PlannedMovement {
                    line_id: line.id,
                    article_id,
                    warehouse_id,
                    movement_type: if line.quantity.is_sign_negative() {
                        reverse(base)
                    } else {
                        base
                    },
                    quantity: line.quantity.abs(),
                })
                .collect();
        }
        StockEffect::Commitment => {
            if is_fulfilled(tx, document.id)? {
                tracing::debug!(document_id = %document.id, "order fulfilled; no reservations");
                return Ok(plan);
            }
            plan.reservations = stock_lines
                .into_iter()
                .map(|(line, article_id)| PlannedReservation {
                    line_id: line.id,
                    key: BalanceKey::new(article_id, warehouse_id),
                    quantity: line.quantity.abs(),
                })
                .collect();
        }
        StockEffect::None => {}
    }
    Ok(plan)
}

fn reverse(movement_type: MovementType) -> MovementType {
    match movement_type {
        MovementType::In => MovementType::Out,
        MovementType::Out => MovementType::In,
        MovementType::Transfer => MovementType::Transfer,
    }
}

/// A consolidating document whose sources already moved the stock.
fn billing_only<T: StoreTx>(tx: &mut T, document: &Document) -> Result<bool, SyncError> {
    if !document.document_type.can_consolidate() {
        return Ok(false);
    }
    let mut source_types = Vec::new();
    for source in tx.links_for(document.id)? {
        // Dangling links (source deleted outside the engine) carry no effect.
        if let Some(d) = tx.document(source)? {
            source_types.push(d.document_type);
        }
    }
    Ok(is_billing_only(document.document_type, &source_types))
}

/// An order is fulfilled once any non-void document draws from it.
fn is_fulfilled<T: StoreTx>(tx: &mut T, order_id: DocumentId) -> Result<bool, SyncError> {
    for target in tx.links_from(order_id)? {
        if let Some(d) = tx.document(target)? {
            if !d.is_void() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn apply_plan<T: StoreTx>(
    tx: &mut T,
    document_id: DocumentId,
    movement_date: NaiveDate,
    plan: &Plan,
    ctx: &WriteContext,
) -> Result<SyncResult, SyncError> {
    let mut result = SyncResult::default();
    let mut touched = BTreeSet::new();

    diff_movements(tx, document_id, movement_date, &plan.movements, ctx, &mut result, &mut touched)?;
    diff_reservations(tx, document_id, &plan.reservations, ctx, &mut result, &mut touched)?;

    if !touched.is_empty() {
        ledger::refresh_balances(tx, &touched)?;
    }
    result.touched_keys = touched;
    Ok(result)
}

fn diff_movements<T: StoreTx>(
    tx: &mut T,
    document_id: DocumentId,
    movement_date: NaiveDate,
    planned: &[PlannedMovement],
    ctx: &WriteContext,
    result: &mut SyncResult,
    touched: &mut BTreeSet<BalanceKey>,
) -> Result<(), SyncError> {
    let mut by_line: BTreeMap<Option<LineId>, Vec<StockMovement>> = BTreeMap::new();
    for m in tx.movements_for_document(document_id)? {
        by_line.entry(m.source_document_line_id).or_default().push(m);
    }

    for p in planned {
        let current = by_line.remove(&Some(p.line_id)).unwrap_or_default();
        match current.iter().position(|m| p.matches(m)) {
            Some(keep) => {
                // Duplicates for one line are legacy damage; keep one.
                for (i, m) in current.iter().enumerate() {
                    if i != keep {
                        touched.extend(ledger::retract_movement(tx, m, ctx)?);
                        result.retracted += 1;
                    }
                }
            }
            None => {
                for m in &current {
                    touched.extend(ledger::retract_movement(tx, m, ctx)?);
                }
                if current.is_empty() {
                    result.created += 1;
                } else {
                    result.updated += 1;
                    result.retracted += current.len() - 1;
                }
                let movement = StockMovement::new(
                    p.movement_type,
                    p.article_id,
                    p.warehouse_id,
                    p.quantity,
                    movement_date,
                    ctx.at,
                )?
                .with_provenance(document_id, p.line_id)
                .with_creator(ctx.acting_user);
                touched.extend(ledger::apply_movement(tx, &movement)?);
            }
        }
    }

    // Lines that disappeared, stopped affecting stock, or entries without a line.
    for m in by_line.into_values().flatten() {
        touched.extend(ledger::retract_movement(tx, &m, ctx)?);
        result.retracted += 1;
    }
    Ok(())
}

fn diff_reservations<T: StoreTx>(
    tx: &mut T,
    document_id: DocumentId,
    planned: &[PlannedReservation],
    ctx: &WriteContext,
    result: &mut SyncResult,
    touched: &mut BTreeSet<BalanceKey>,
) -> Result<(), SyncError> {
    let mut by_line: BTreeMap<LineId, Vec<StockReservation>> = BTreeMap::new();
    for r in tx.reservations_for_document(document_id)? {
        by_line.entry(r.source_document_line_id).or_default().push(r);
    }

    for p in planned {
        let current = by_line.remove(&p.line_id).unwrap_or_default();
        match current.iter().position(|r| p.matches(r)) {
            Some(keep) => {
                for (i, r) in current.iter().enumerate() {
                    if i != keep {
                        touched.insert(release(tx, r, ctx)?);
                        result.retracted += 1;
                    }
                }
            }
            None => {
                for r in &current {
                    touched.insert(release(tx, r, ctx)?);
                }
                if current.is_empty() {
                    result.created += 1;
                } else {
                    result.updated += 1;
                    result.retracted += current.len() - 1;
                }
                let reservation =
                    StockReservation::new(p.key, p.quantity, document_id, p.line_id, ctx.at)?;
                tx.insert_reservation(&reservation)?;
                touched.insert(p.key);
            }
        }
    }

    for r in by_line.into_values().flatten() {
        touched.insert(release(tx, &r, ctx)?);
        result.retracted += 1;
    }
    Ok(())
}

fn release<T: StoreTx>(
    tx: &mut T,
    reservation: &StockReservation,
    ctx: &WriteContext,
) -> Result<BalanceKey, SyncError> {
    tx.release_reservation(reservation.id, ctx.at)?;
    Ok(reservation.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use stockbook_core::UserId;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    fn engine() -> SyncEngine<Arc<InMemoryStore>> {
        let store = InMemoryStore::with_reference_data(
            [ArticleId::new(7), ArticleId::new(8)],
            [WarehouseId::new(1), WarehouseId::new(2)],
        );
        SyncEngine::new(Arc::new(store), SyncConfig::default())
    }

    fn ctx() -> WriteContext {
        WriteContext::now(UserId::new(3))
    }

    fn delivery_note(id: i64, qty: Decimal) -> Document {
        Document::draft(DocumentId::new(id), DocumentType::DeliveryNote, day())
            .with_warehouse(WarehouseId::new(1))
            .with_line(DocumentLine::article(LineId::new(id * 10), 1, ArticleId::new(7), qty))
    }

    fn on_hand(engine: &SyncEngine<Arc<InMemoryStore>>, article: i64, warehouse: i64) -> Decimal {
        let key = BalanceKey::new(ArticleId::new(article), WarehouseId::new(warehouse));
        let mut tx = engine.store().begin().unwrap();
        tx.balance(key).unwrap().map(|b| b.on_hand).unwrap_or_default()
    }

    #[test]
    fn new_line_creates_one_out_movement() {
        let engine = engine();
        let (version, result) = engine
            .save_and_sync(&delivery_note(1, dec!(2)), ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(result.created, 1);
        assert_eq!(on_hand(&engine, 7, 1), dec!(-2));

        let mut tx = engine.store().begin().unwrap();
        let movements = tx.movements_for_document(DocumentId::new(1)).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        assert_eq!(movements[0].quantity, dec!(2));
        assert_eq!(movements[0].created_by, Some(UserId::new(3)));
    }

    #[test]
    fn second_sync_is_a_no_op() {
        let engine = engine();
        engine
            .save_and_sync(&delivery_note(1, dec!(2)), ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        let again = engine.sync(DocumentId::new(1), &ctx()).unwrap();
        assert!(again.is_empty());
        assert!(again.touched_keys.is_empty());
    }

    #[test]
    fn negative_invoice_line_books_a_return() {
        let engine = engine();
        let invoice = Document::draft(DocumentId::new(5), DocumentType::Invoice, day())
            .with_warehouse(WarehouseId::new(1))
            .with_line(DocumentLine::article(LineId::new(50), 1, ArticleId::new(7), dec!(-3)));
        engine
            .save_and_sync(&invoice, ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        assert_eq!(on_hand(&engine, 7, 1), dec!(3));
    }

    #[test]
    fn goods_receipt_books_in() {
        let engine = engine();
        let receipt = Document::draft(DocumentId::new(6), DocumentType::GoodsReceipt, day())
            .with_warehouse(WarehouseId::new(2))
            .with_line(DocumentLine::article(LineId::new(60), 1, ArticleId::new(8), dec!(12)));
        engine
            .save_and_sync(&receipt, ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        assert_eq!(on_hand(&engine, 8, 2), dec!(12));
    }

    #[test]
    fn quotes_and_descriptive_lines_produce_nothing() {
        let engine = engine();
        let quote = Document::draft(DocumentId::new(2), DocumentType::Quote, day())
            .with_line(DocumentLine::article(LineId::new(20), 1, ArticleId::new(7), dec!(9)));
        let (_, result) = engine
            .save_and_sync(&quote, ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        assert!(result.is_empty());

        let note = Document::draft(DocumentId::new(3), DocumentType::DeliveryNote, day())
            .with_line(DocumentLine::descriptive(LineId::new(30), 1, "Transport"));
        let (_, result) = engine
            .save_and_sync(&note, ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn unknown_article_is_rejected_before_any_write() {
        let engine = engine();
        let note = Document::draft(DocumentId::new(1), DocumentType::DeliveryNote, day())
            .with_warehouse(WarehouseId::new(1))
            .with_line(DocumentLine::article(LineId::new(10), 4, ArticleId::new(99), dec!(1)));
        let err = engine
            .save_and_sync(&note, ExpectedVersion::NoRecord, &ctx())
            .unwrap_err();
        match err {
            SyncError::InvalidLine { line_number, .. } => assert_eq!(line_number, 4),
            other => panic!("expected invalid line, got {other:?}"),
        }
        let mut tx = engine.store().begin().unwrap();
        assert!(tx.document(DocumentId::new(1)).unwrap().is_none());
    }

    #[test]
    fn missing_or_unknown_warehouse_is_rejected() {
        let engine = engine();
        let mut note = delivery_note(1, dec!(1));
        note.warehouse_id = None;
        assert!(matches!(
            engine.save_and_sync(&note, ExpectedVersion::NoRecord, &ctx()),
            Err(SyncError::InvalidDocument(_))
        ));
        note.warehouse_id = Some(WarehouseId::new(42));
        assert!(matches!(
            engine.save_and_sync(&note, ExpectedVersion::NoRecord, &ctx()),
            Err(SyncError::InvalidDocument(_))
        ));
    }

    #[test]
    fn stale_snapshot_is_a_sync_conflict() {
        let engine = engine();
        let note = delivery_note(1, dec!(1));
        engine
            .save_and_sync(&note, ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        engine
            .save_and_sync(&note, ExpectedVersion::Exact(1), &ctx())
            .unwrap();
        let err = engine
            .save_and_sync(&note, ExpectedVersion::Exact(1), &ctx())
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncConflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn saving_cannot_assign_numbers_or_change_status() {
        let engine = engine();
        let mut note = delivery_note(1, dec!(1));
        note.number = Some("DDT20250001".into());
        assert!(matches!(
            engine.save_and_sync(&note, ExpectedVersion::NoRecord, &ctx()),
            Err(SyncError::InvalidDocument(_))
        ));
        note.number = None;
        note.status = DocumentStatus::Void;
        assert!(matches!(
            engine.save_and_sync(&note, ExpectedVersion::NoRecord, &ctx()),
            Err(SyncError::InvalidDocument(_))
        ));
    }

    #[test]
    fn voiding_retracts_and_is_idempotent() {
        let engine = engine();
        engine
            .save_and_sync(&delivery_note(1, dec!(4)), ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        let result = engine.void(DocumentId::new(1), &ctx()).unwrap();
        assert_eq!(result.retracted, 1);
        assert_eq!(on_hand(&engine, 7, 1), dec!(0));
        assert!(engine.void(DocumentId::new(1), &ctx()).unwrap().is_empty());
    }

    #[test]
    fn syncing_a_vanished_document_retracts_its_entries() {
        let engine = engine();
        let movement = StockMovement::new(
            MovementType::Out,
            ArticleId::new(7),
            WarehouseId::new(1),
            dec!(2),
            day(),
            ctx().at,
        )
        .unwrap()
        .with_provenance(DocumentId::new(77), LineId::new(1));
        let mut tx = engine.store().begin().unwrap();
        ledger::apply_movement(&mut tx, &movement).unwrap();
        tx.commit().unwrap();

        let result = engine.sync(DocumentId::new(77), &ctx()).unwrap();
        assert_eq!(result.retracted, 1);
        assert_eq!(on_hand(&engine, 7, 1), dec!(0));
    }

    #[test]
    fn duplicate_movements_for_one_line_are_collapsed() {
        let engine = engine();
        engine
            .save_and_sync(&delivery_note(1, dec!(2)), ExpectedVersion::NoRecord, &ctx())
            .unwrap();
        let duplicate = StockMovement::new(
            MovementType::Out,
            ArticleId::new(7),
            WarehouseId::new(1),
            dec!(2),
            day(),
            ctx().at,
        )
        .unwrap()
        .with_provenance(DocumentId::new(1), LineId::new(10));
        let mut tx = engine.store().begin().unwrap();
        ledger::apply_movement(&mut tx, &duplicate).unwrap();
        tx.commit().unwrap();

        let result = engine.sync(DocumentId::new(1), &ctx()).unwrap();
        assert_eq!(result.retracted, 1);
        assert_eq!(on_hand(&engine, 7, 1), dec!(-2));
    }
}
