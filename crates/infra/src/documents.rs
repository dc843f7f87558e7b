//! Document lifecycle: issuing numbers and maintaining the link graph.

use chrono::NaiveDate;
use tracing::instrument;

use stockbook_core::{DocumentId, ExpectedVersion};
use stockbook_documents::{Document, DocumentLink, DocumentStatus};
use stockbook_numbering::{
    DocumentNumber, NumberRegistry, NumberScope, NumberingConfig, Persisted, SequenceAllocator,
};

use crate::context::WriteContext;
use crate::error::SyncError;
use crate::store::{Store, StoreError, StoreTx};
use crate::sync_engine::{SyncResult, reconcile_with_sources};

/// Application entry points around a document that are not line edits.
#[derive(Debug, Clone)]
pub struct DocumentService<S> {
    store: S,
    allocator: SequenceAllocator,
}

impl<S: Store> DocumentService<S> {
    pub fn new(store: S, numbering: NumberingConfig) -> Self {
        Self {
            store,
            allocator: SequenceAllocator::new(numbering),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Assign the next number of the document's scope and mark it issued.
    ///
    /// Each allocation attempt claims the number and stamps the document in
    /// one transaction, so a number is never visible without its document.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn issue(
        &self,
        document_id: DocumentId,
        as_of: NaiveDate,
        ctx: &WriteContext,
    ) -> Result<DocumentNumber, SyncError> {
        let document_type = {
            let mut tx = self.store.begin()?;
            load_draft(&mut tx, document_id)?.document_type
        };

        let mut registry = IssueRegistry {
            store: &self.store,
            document_id,
            ctx,
        };
        let (number, _document) = self
            .allocator
            .next_number(document_type, as_of, &mut registry)?;
        Ok(number)
    }

    /// Record that `target` draws from `source`.
    ///
    /// Duplicate links are accepted and change nothing. The target and any
    /// order among its sources are reconciled in the same transaction: the
    /// target may become a consolidating document and a linked order stops
    /// reserving stock.
    #[instrument(skip(self, ctx), err(Display))]
    pub fn add_link(
        &self,
        target: DocumentId,
        source: DocumentId,
        ctx: &WriteContext,
    ) -> Result<SyncResult, SyncError> {
        let link = DocumentLink::new(target, source)?;

        let mut tx = self.store.begin()?;
        let target_doc = tx
            .document(target)?
            .ok_or_else(|| SyncError::NotFound(format!("document {target}")))?;
        if tx.document(source)?.is_none() {
            return Err(SyncError::NotFound(format!("document {source}")));
        }

        if !tx.add_link(link)? {
            tracing::debug!(%target, %source, "link already present");
        }
        let result = reconcile_with_sources(&mut tx, &target_doc, ctx)?;
        tx.commit()?;

        tracing::info!(%target, %source, retracted = result.retracted, "documents linked");
        Ok(result)
    }

    /// Sources `target` draws from.
    pub fn links_for(&self, target: DocumentId) -> Result<Vec<DocumentId>, SyncError> {
        let mut tx = self.store.begin()?;
        Ok(tx.links_for(target)?)
    }

    /// Documents drawing from `source`.
    pub fn links_from(&self, source: DocumentId) -> Result<Vec<DocumentId>, SyncError> {
        let mut tx = self.store.begin()?;
        Ok(tx.links_from(source)?)
    }

    pub fn document(&self, id: DocumentId) -> Result<Document, SyncError> {
        let mut tx = self.store.begin()?;
        tx.document(id)?
            .ok_or_else(|| SyncError::NotFound(format!("document {id}")))
    }
}

fn load_draft<T: StoreTx>(tx: &mut T, id: DocumentId) -> Result<Document, SyncError> {
    let document = tx
        .document(id)?
        .ok_or_else(|| SyncError::NotFound(format!("document {id}")))?;
    match document.status {
        DocumentStatus::Draft => Ok(document),
        DocumentStatus::Issued => Err(SyncError::invalid_document(format!(
            "document {id} is already issued as {}",
            document.number.as_deref().unwrap_or("?")
        ))),
        DocumentStatus::Void => Err(SyncError::invalid_document(format!(
            "document {id} is void and cannot be issued"
        ))),
    }
}

/// Allocator seam: one store transaction per persisted candidate.
struct IssueRegistry<'a, S> {
    store: &'a S,
    document_id: DocumentId,
    ctx: &'a WriteContext,
}

impl<S: Store> NumberRegistry for IssueRegistry<'_, S> {
    type Output = Document;
    type Error = SyncError;

    fn observed_numbers(
        &mut self,
        scope: NumberScope,
        scope_prefix: &str,
    ) -> Result<Vec<String>, SyncError> {
        let mut tx = self.store.begin()?;
        Ok(tx.observed_numbers(scope.document_type, scope_prefix)?)
    }

    fn persist(&mut self, number: &DocumentNumber) -> Result<Persisted<Document>, SyncError> {
        match self.claim_and_stamp(number) {
            Ok(document) => Ok(Persisted::Committed(document)),
            // Lost the race for the number, or the claim collided with another
            // transaction; either way the allocator rescans and tries again.
            Err(SyncError::Store(StoreError::UniqueViolation(_)) | SyncError::SyncConflict(_)) => {
                Ok(Persisted::NumberTaken)
            }
            Err(err) => Err(err),
        }
    }
}

impl<S: Store> IssueRegistry<'_, S> {
    fn claim_and_stamp(&self, number: &DocumentNumber) -> Result<Document, SyncError> {
        let mut tx = self.store.begin()?;
        let mut document = load_draft(&mut tx, self.document_id)?;

        tx.claim_number(document.document_type, number.as_str(), document.id)?;
        document.number = Some(number.as_str().to_string());
        document.status = DocumentStatus::Issued;
        document.updated_by = self.ctx.acting_user.or(document.updated_by);
        document.version = tx.save_document(&document, ExpectedVersion::Exact(document.version))?;

        tx.commit()?;
        Ok(document)
    }
}
