use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use stockbook_core::{
    ArticleId, DocumentId, Entity, ExpectedVersion, LineId, MovementId, WarehouseId,
};
use stockbook_documents::{Document, DocumentLink, DocumentType};
use stockbook_inventory::{ArticleTotal, BalanceKey, StockBalance, StockMovement, StockReservation};

use super::{Store, StoreError, StoreTx};

/// Unit of optimistic concurrency control.
///
/// Every committed write bumps the revision of the resources it touches; a
/// transaction that read a resource fails to commit if the revision moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum Resource {
    Document(DocumentId),
    DocumentLedger(DocumentId),
    LineLedger(LineId),
    Key(BalanceKey),
    /// Balance rows and total of one article; guards the total rebuild.
    Article(ArticleId),
    Links(DocumentId),
}

#[derive(Debug, Clone)]
enum Write {
    SaveDocument {
        document: Document,
        expected: ExpectedVersion,
    },
    RemoveDocument(DocumentId),
    ClaimNumber {
        document_type: DocumentType,
        number: String,
        document_id: DocumentId,
    },
    AddLink(DocumentLink),
    InsertMovement(StockMovement),
    RetractMovement {
        id: MovementId,
        at: DateTime<Utc>,
    },
    InsertReservation(StockReservation),
    ReleaseReservation {
        id: MovementId,
        at: DateTime<Utc>,
    },
    PutBalance(StockBalance),
    PutArticleTotal(ArticleTotal),
}

#[derive(Debug, Clone, Default)]
struct State {
    articles: HashSet<ArticleId>,
    warehouses: HashSet<WarehouseId>,
    documents: BTreeMap<DocumentId, Document>,
    links: BTreeSet<DocumentLink>,
    issued_numbers: BTreeMap<(DocumentType, String), DocumentId>,
    movements: BTreeMap<MovementId, StockMovement>,
    reservations: BTreeMap<MovementId, StockReservation>,
    balances: BTreeMap<BalanceKey, StockBalance>,
    totals: BTreeMap<ArticleId, ArticleTotal>,
    revisions: HashMap<Resource, u64>,
}

fn movement_resources(m: &StockMovement) -> Vec<Resource> {
    let mut out: Vec<Resource> = m.touched_keys().into_iter().map(Resource::Key).collect();
    if let Some(doc) = m.source_document_id {
        out.push(Resource::DocumentLedger(doc));
    }
    if let Some(line) = m.source_document_line_id {
        out.push(Resource::LineLedger(line));
    }
    out
}

fn reservation_resources(r: &StockReservation) -> Vec<Resource> {
    vec![
        Resource::Key(r.key()),
        Resource::DocumentLedger(r.source_document_id),
        Resource::LineLedger(r.source_document_line_id),
    ]
}

/// Ledger entries are append-only: an id is never reused.
fn insert_entry<E>(
    entries: &mut BTreeMap<E::Id, E>,
    entry: &E,
    what: &str,
) -> Result<(), StoreError>
where
    E: Entity + Clone,
    E::Id: Ord + core::fmt::Display,
{
    let id = entry.id().clone();
    if entries.contains_key(&id) {
        return Err(StoreError::UniqueViolation(format!("{what} {id}")));
    }
    entries.insert(id, entry.clone());
    Ok(())
}

impl State {
    fn revision(&self, resource: &Resource) -> u64 {
        self.revisions.get(resource).copied().unwrap_or(0)
    }

    /// Apply one write, enforcing constraints against this state.
    ///
    /// `track` bumps resource revisions; it is only set when applying to the
    /// shared state at commit time.
    fn apply(&mut self, write: &Write, track: bool) -> Result<(), StoreError> {
        let mut touched = Vec::new();

        match write {
            Write::SaveDocument { document, expected } => {
                let current = self.documents.get(&document.id).map(|d| d.version);
                expected.check(current).map_err(|e| {
                    StoreError::Conflict(format!("document {}: {e}", document.id))
                })?;
                let mut stored = document.clone();
                stored.version = current.map_or(1, |v| v + 1);
                self.documents.insert(stored.id, stored);
                touched.push(Resource::Document(document.id));
            }
            Write::RemoveDocument(id) => {
                if self.documents.remove(id).is_none() {
                    return Err(StoreError::NotFound(format!("document {id}")));
                }
                let linked: Vec<DocumentLink> = self
                    .links
                    .iter()
                    .filter(|l| l.target == *id || l.source == *id)
                    .copied()
                    .collect();
                for link in linked {
                    self.links.remove(&link);
                    touched.push(Resource::Links(link.target));
                    touched.push(Resource::Links(link.source));
                }
                touched.push(Resource::Document(*id));
            }
            Write::ClaimNumber {
                document_type,
                number,
                document_id,
            } => {
                let key = (*document_type, number.clone());
                if let Some(owner) = self.issued_numbers.get(&key) {
                    return Err(StoreError::UniqueViolation(format!(
                        "{document_type} number {number} already issued to document {owner}"
                    )));
                }
                self.issued_numbers.insert(key, *document_id);
            }
            Write::AddLink(link) => {
                if self.links.insert(*link) {
                    touched.push(Resource::Links(link.target));
                    touched.push(Resource::Links(link.source));
                }
            }
            Write::InsertMovement(m) => {
                insert_entry(&mut self.movements, m, "movement")?;
                touched.extend(movement_resources(m));
            }
            Write::RetractMovement { id, at } => {
                let m = self
                    .movements
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound(format!("movement {id}")))?;
                if m.retracted_at.is_some() {
                    return Err(StoreError::Conflict(format!("movement {id} already retracted")));
                }
                m.retracted_at = Some(*at);
                touched.extend(movement_resources(m));
            }
            Write::InsertReservation(r) => {
                insert_entry(&mut self.reservations, r, "reservation")?;
                touched.extend(reservation_resources(r));
            }
            Write::ReleaseReservation { id, at } => {
                let r = self
                    .reservations
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;
                if r.released_at.is_some() {
                    return Err(StoreError::Conflict(format!("reservation {id} already released")));
                }
                r.released_at = Some(*at);
                touched.extend(reservation_resources(r));
            }
            Write::PutBalance(b) => {
                self.balances.insert(b.key(), b.clone());
                touched.push(Resource::Article(b.article_id));
            }
            Write::PutArticleTotal(t) => {
                self.totals.insert(t.article_id, t.clone());
                touched.push(Resource::Article(t.article_id));
            }
        }

        if track {
            for resource in touched {
                *self.revisions.entry(resource).or_insert(0) += 1;
            }
        }
        Ok(())
    }
}

/// In-memory store with optimistic transactions.
///
/// Intended for tests/dev and for embedding in single-process deployments.
/// Not optimized for performance: every transaction works on a full copy of
/// the state.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with article and warehouse reference data.
    pub fn with_reference_data(
        articles: impl IntoIterator<Item = ArticleId>,
        warehouses: impl IntoIterator<Item = WarehouseId>,
    ) -> Self {
        let state = State {
            articles: articles.into_iter().collect(),
            warehouses: warehouses.into_iter().collect(),
            ..State::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn register_article(&self, id: ArticleId) -> Result<(), StoreError> {
        self.state_mut()?.articles.insert(id);
        Ok(())
    }

    pub fn register_warehouse(&self, id: WarehouseId) -> Result<(), StoreError> {
        self.state_mut()?.warehouses.insert(id);
        Ok(())
    }

    /// Insert a document exactly as found in a legacy database.
    ///
    /// No validation and no number claim: legacy data may carry duplicate or
    /// malformed numbers, which is precisely what the allocator must tolerate.
    pub fn import_legacy_document(&self, mut document: Document) -> Result<(), StoreError> {
        document.version = document.version.max(1);
        self.state_mut()?.documents.insert(document.id, document);
        Ok(())
    }

    fn state_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

impl Store for InMemoryStore {
    type Tx<'a> = InMemoryTx<'a>;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let view = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .clone();
        Ok(InMemoryTx {
            store: self,
            view,
            read_set: HashMap::new(),
            writes: Vec::new(),
        })
    }
}

/// Transaction over a private copy of the store.
///
/// Reads see the snapshot plus this transaction's own writes. Writes are
/// buffered and replayed against the shared state at commit, after checking
/// that nothing this transaction read has changed in the meantime.
#[derive(Debug)]
pub struct InMemoryTx<'a> {
    store: &'a InMemoryStore,
    view: State,
    read_set: HashMap<Resource, u64>,
    writes: Vec<Write>,
}

impl InMemoryTx<'_> {
    fn observe(&mut self, resource: Resource) {
        // Own writes never bump `view` revisions, so this is the snapshot revision.
        let revision = self.view.revision(&resource);
        self.read_set.entry(resource).or_insert(revision);
    }

    fn stage(&mut self, write: Write) -> Result<(), StoreError> {
        self.view.apply(&write, false)?;
        self.writes.push(write);
        Ok(())
    }
}

impl StoreTx for InMemoryTx<'_> {
    fn article_exists(&mut self, id: ArticleId) -> Result<bool, StoreError> {
        Ok(self.view.articles.contains(&id))
    }

    fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError> {
        Ok(self.view.warehouses.contains(&id))
    }

    fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.observe(Resource::Document(id));
        Ok(self.view.documents.get(&id).cloned())
    }

    fn save_document(
        &mut self,
        document: &Document,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        self.observe(Resource::Document(document.id));
        self.stage(Write::SaveDocument {
            document: document.clone(),
            expected,
        })?;
        self.view
            .documents
            .get(&document.id)
            .map(|d| d.version)
            .ok_or_else(|| StoreError::Backend(format!("document {} vanished", document.id)))
    }

    fn remove_document(&mut self, id: DocumentId) -> Result<(), StoreError> {
        self.observe(Resource::Document(id));
        self.observe(Resource::Links(id));
        self.stage(Write::RemoveDocument(id))
    }

    fn observed_numbers(
        &mut self,
        document_type: DocumentType,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let live = self
            .view
            .documents
            .values()
            .filter(|d| d.document_type == document_type)
            .filter_map(|d| d.number.as_deref())
            .filter(|n| n.trim().starts_with(prefix))
            .map(str::to_string);
        let issued = self
            .view
            .issued_numbers
            .keys()
            .filter(|(t, n)| *t == document_type && n.starts_with(prefix))
            .map(|(_, n)| n.clone());
        Ok(live.chain(issued).collect())
    }

    fn claim_number(
        &mut self,
        document_type: DocumentType,
        number: &str,
        document_id: DocumentId,
    ) -> Result<(), StoreError> {
        self.stage(Write::ClaimNumber {
            document_type,
            number: number.to_string(),
            document_id,
        })
    }

    fn add_link(&mut self, link: DocumentLink) -> Result<bool, StoreError> {
        self.observe(Resource::Links(link.target));
        self.observe(Resource::Links(link.source));
        if self.view.links.contains(&link) {
            return Ok(false);
        }
        self.stage(Write::AddLink(link))?;
        Ok(true)
    }

    fn links_for(&mut self, target: DocumentId) -> Result<Vec<DocumentId>, StoreError> {
        self.observe(Resource::Links(target));
        Ok(self
            .view
            .links
            .iter()
            .filter(|l| l.target == target)
            .map(|l| l.source)
            .collect())
    }

    fn links_from(&mut self, source: DocumentId) -> Result<Vec<DocumentId>, StoreError> {
        self.observe(Resource::Links(source));
        Ok(self
            .view
            .links
            .iter()
            .filter(|l| l.source == source)
            .map(|l| l.target)
            .collect())
    }

    fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.stage(Write::InsertMovement(movement.clone()))
    }

    fn retract_movement(&mut self, id: MovementId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.stage(Write::RetractMovement { id, at })
    }

    fn movements_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.observe(Resource::DocumentLedger(document_id));
        Ok(self
            .view
            .movements
            .values()
            .filter(|m| m.is_active() && m.source_document_id == Some(document_id))
            .cloned()
            .collect())
    }

    fn movements_for_line(&mut self, line_id: LineId) -> Result<Vec<StockMovement>, StoreError> {
        self.observe(Resource::LineLedger(line_id));
        Ok(self
            .view
            .movements
            .values()
            .filter(|m| m.is_active() && m.source_document_line_id == Some(line_id))
            .cloned()
            .collect())
    }

    fn movements_for_key(&mut self, key: BalanceKey) -> Result<Vec<StockMovement>, StoreError> {
        self.observe(Resource::Key(key));
        Ok(self
            .view
            .movements
            .values()
            .filter(|m| m.is_active() && m.touched_keys().contains(&key))
            .cloned()
            .collect())
    }

    fn insert_reservation(&mut self, reservation: &StockReservation) -> Result<(), StoreError> {
        self.stage(Write::InsertReservation(reservation.clone()))
    }

    fn release_reservation(
        &mut self,
        id: MovementId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.stage(Write::ReleaseReservation { id, at })
    }

    fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockReservation>, StoreError> {
        self.observe(Resource::DocumentLedger(document_id));
        Ok(self
            .view
            .reservations
            .values()
            .filter(|r| r.is_active() && r.source_document_id == document_id)
            .cloned()
            .collect())
    }

    fn reservations_for_key(
        &mut self,
        key: BalanceKey,
    ) -> Result<Vec<StockReservation>, StoreError> {
        self.observe(Resource::Key(key));
        Ok(self
            .view
            .reservations
            .values()
            .filter(|r| r.is_active() && r.key() == key)
            .cloned()
            .collect())
    }

    fn balance(&mut self, key: BalanceKey) -> Result<Option<StockBalance>, StoreError> {
        Ok(self.view.balances.get(&key).cloned())
    }

    fn balances_for_article(
        &mut self,
        article_id: ArticleId,
    ) -> Result<Vec<StockBalance>, StoreError> {
        self.observe(Resource::Article(article_id));
        Ok(self
            .view
            .balances
            .values()
            .filter(|b| b.article_id == article_id)
            .cloned()
            .collect())
    }

    fn known_balance_keys(&mut self) -> Result<Vec<BalanceKey>, StoreError> {
        let mut keys: BTreeSet<BalanceKey> = self.view.balances.keys().copied().collect();
        keys.extend(self.view.movements.values().flat_map(|m| m.touched_keys()));
        keys.extend(self.view.reservations.values().map(|r| r.key()));
        Ok(keys.into_iter().collect())
    }

    fn put_balance(&mut self, balance: &StockBalance) -> Result<(), StoreError> {
        self.stage(Write::PutBalance(balance.clone()))
    }

    fn article_total(
        &mut self,
        article_id: ArticleId,
    ) -> Result<Option<ArticleTotal>, StoreError> {
        self.observe(Resource::Article(article_id));
        Ok(self.view.totals.get(&article_id).cloned())
    }

    fn put_article_total(&mut self, total: &ArticleTotal) -> Result<(), StoreError> {
        self.stage(Write::PutArticleTotal(total.clone()))
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut live = self.store.state_mut()?;

        for (resource, seen) in &self.read_set {
            let current = live.revision(resource);
            if current != *seen {
                return Err(StoreError::Conflict(format!(
                    "{resource:?} changed since it was read (revision {seen} -> {current})"
                )));
            }
        }

        // Replay on a copy so a constraint failure half-way leaves nothing behind.
        let mut next = live.clone();
        for write in &self.writes {
            next.apply(write, true)?;
        }
        *live = next;

        Ok(())
    }
}
