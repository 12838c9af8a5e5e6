//! Documents and forensic report versions.
//!
//! [`DocumentStore`] owns every uploaded document. Writes go through an
//! optimistic version check so that two concurrent attempts to move the
//! same document cannot both succeed; the loser gets
//! [`DocVerifyError::StaleState`] and must re-read.
//!
//! [`ReportStore`] keeps every report version per fingerprint. Reports are
//! append-only.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::DocVerifyError;
use crate::fingerprint::ContentFingerprint;
use crate::scoring::ForensicReport;
use crate::types::{DocumentClass, IssuanceKind, LifecycleStatus};

/// One uploaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque unique id (`doc_…`).
    pub id: String,
    /// Owner identity.
    pub owner_id: String,
    /// Title given at submission.
    pub title: String,
    /// SHA-256 of the uploaded bytes. Never changes.
    pub fingerprint: ContentFingerprint,
    /// Declared document class.
    pub class: DocumentClass,
    /// MIME type of the upload.
    pub mime_type: String,
    /// Upload size in bytes.
    pub byte_size: u64,
    /// Lifecycle state.
    pub status: LifecycleStatus,
    /// Attestation reference (non-transferable issuance).
    pub attestation_ref: Option<String>,
    /// Token reference (transferable issuance).
    pub token_ref: Option<String>,
    /// Archive locator of the encrypted copy.
    pub archive_locator: Option<String>,
    /// A ledger write was started and its outcome is not yet recorded.
    ///
    /// While set, issuance looks the document up on the ledger before
    /// writing again.
    #[serde(default)]
    pub ledger_pending: bool,
    /// Report version the current decision was made on.
    pub report_version: Option<u32>,
    /// Logically deleted by the owner.
    pub tombstoned: bool,
    /// Optimistic concurrency version, bumped on every write.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// How this document is issued.
    pub fn issuance_kind(&self) -> IssuanceKind {
        self.class.issuance_kind()
    }

    /// Ledger reference, whichever kind it is.
    pub fn ledger_ref(&self) -> Option<&str> {
        self.attestation_ref
            .as_deref()
            .or(self.token_ref.as_deref())
    }

    /// Issued on the ledger but the archive copy is still missing.
    pub fn archive_pending(&self) -> bool {
        self.status == LifecycleStatus::Issued && self.archive_locator.is_none()
    }

    /// Move to `next`, enforcing the lifecycle graph.
    pub(crate) fn transition(&mut self, next: LifecycleStatus) -> Result<(), DocVerifyError> {
        if !self.status.can_transition_to(next) {
            error!(
                document_id = %self.id,
                current = %self.status,
                requested = %next,
                "Document: invalid lifecycle transition"
            );
            return Err(DocVerifyError::InvalidTransition {
                subject: self.id.clone(),
                current: self.status.to_string(),
                requested: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a successful ledger write and move to ISSUED.
    ///
    /// Sets exactly one of `attestation_ref`/`token_ref`.
    pub(crate) fn record_issuance(&mut self, reference: String) -> Result<(), DocVerifyError> {
        if self.ledger_ref().is_some() {
            return Err(DocVerifyError::InvalidTransition {
                subject: self.id.clone(),
                current: format!("{} (already issued)", self.status),
                requested: LifecycleStatus::Issued.to_string(),
            });
        }
        self.transition(LifecycleStatus::Issued)?;
        match self.issuance_kind() {
            IssuanceKind::NonTransferable => self.attestation_ref = Some(reference),
            IssuanceKind::Transferable => self.token_ref = Some(reference),
        }
        self.ledger_pending = false;
        Ok(())
    }
}

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Owner identity.
    pub owner_id: String,
    /// Title.
    pub title: String,
    /// Declared class.
    pub class: DocumentClass,
    /// MIME type.
    pub mime_type: String,
    /// Raw bytes.
    pub content: Arc<Vec<u8>>,
}

#[derive(Debug, Default)]
struct StoreState {
    documents: HashMap<String, Document>,
    by_owner_fingerprint: HashMap<(String, ContentFingerprint), String>,
    contents: HashMap<String, Arc<Vec<u8>>>,
}

/// In-memory document store with optimistic versioning.
#[derive(Debug, Default)]
pub struct DocumentStore {
    state: RwLock<StoreState>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document, or return the owner's existing live document
    /// with the same fingerprint.
    ///
    /// Returns the document and whether it was newly created.
    pub fn insert_or_get(&self, new: NewDocument) -> Result<(Document, bool), DocVerifyError> {
        let fingerprint = ContentFingerprint::of(&new.content);
        let mut state = self
            .state
            .write()
            .map_err(|_| DocVerifyError::poisoned("document store"))?;

        let key = (new.owner_id.clone(), fingerprint);
        let existing = state
            .by_owner_fingerprint
            .get(&key)
            .and_then(|id| state.documents.get(id))
            .filter(|d| !d.tombstoned)
            .cloned();
        if let Some(existing) = existing {
            debug!(document_id = %existing.id, "Documents: resolved re-upload to existing document");
            if existing.archive_locator.is_none() {
                state.contents.entry(existing.id.clone()).or_insert(new.content);
            }
            return Ok((existing, false));
        }

        let now = Utc::now();
        let doc = Document {
            id: format!("doc_{}", uuid::Uuid::new_v4().simple()),
            owner_id: new.owner_id,
            title: new.title,
            fingerprint,
            class: new.class,
            mime_type: new.mime_type,
            byte_size: new.content.len() as u64,
            status: LifecycleStatus::Pending,
            attestation_ref: None,
            token_ref: None,
            archive_locator: None,
            ledger_pending: false,
            report_version: None,
            tombstoned: false,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.by_owner_fingerprint.insert(key, doc.id.clone());
        state.contents.insert(doc.id.clone(), new.content);
        state.documents.insert(doc.id.clone(), doc.clone());
        Ok((doc, true))
    }

    /// Get a document.
    pub fn get(&self, id: &str) -> Result<Document, DocVerifyError> {
        self.state
            .read()
            .map_err(|_| DocVerifyError::poisoned("document store"))?
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| DocVerifyError::not_found("document", id))
    }

    /// Get a document, checking that `requester_id` owns it.
    pub fn get_owned(&self, id: &str, requester_id: &str) -> Result<Document, DocVerifyError> {
        let doc = self.get(id)?;
        if doc.owner_id != requester_id {
            return Err(DocVerifyError::NotOwner {
                document_id: id.to_string(),
                requester_id: requester_id.to_string(),
            });
        }
        Ok(doc)
    }

    /// Live documents owned by `owner_id`, newest first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Document> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.owner_id == owner_id && !d.tombstoned)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        docs
    }

    /// Raw bytes retained for analysis and archiving.
    pub fn content(&self, id: &str) -> Option<Arc<Vec<u8>>> {
        self.state.read().ok()?.contents.get(id).cloned()
    }

    /// Drop retained bytes once the archive holds the encrypted copy.
    ///
    /// Later reads go through the archive.
    pub fn release_content(&self, id: &str) {
        if let Ok(mut state) = self.state.write() {
            state.contents.remove(id);
        }
    }

    /// Apply `f` to a document if its version is still `expected_version`.
    ///
    /// On success the version is bumped and the updated document returned.
    /// If `f` fails, nothing is written.
    pub fn update<F>(
        &self,
        id: &str,
        expected_version: u64,
        f: F,
    ) -> Result<Document, DocVerifyError>
    where
        F: FnOnce(&mut Document) -> Result<(), DocVerifyError>,
    {
        let mut state = self
            .state
            .write()
            .map_err(|_| DocVerifyError::poisoned("document store"))?;
        let stored = state
            .documents
            .get_mut(id)
            .ok_or_else(|| DocVerifyError::not_found("document", id))?;

        if stored.version != expected_version {
            debug!(
                document_id = %id,
                expected = expected_version,
                actual = stored.version,
                "Documents: stale write rejected"
            );
            return Err(DocVerifyError::StaleState {
                document_id: id.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        let mut draft = stored.clone();
        f(&mut draft)?;
        draft.version = stored.version + 1;
        draft.updated_at = Utc::now();
        *stored = draft.clone();
        Ok(draft)
    }

    /// Move a document to `next` with an optimistic version check.
    pub fn transition(
        &self,
        id: &str,
        expected_version: u64,
        next: LifecycleStatus,
    ) -> Result<Document, DocVerifyError> {
        self.update(id, expected_version, |doc| doc.transition(next))
    }

    /// Logically delete a document. Only the owner may do this.
    ///
    /// The document leaves the owner's listing and dedup index; its bytes
    /// and reports stay available.
    pub fn tombstone(&self, id: &str, requester_id: &str) -> Result<Document, DocVerifyError> {
        let doc = self.get_owned(id, requester_id)?;
        if doc.tombstoned {
            return Ok(doc);
        }
        self.update(id, doc.version, |d| {
            d.tombstoned = true;
            Ok(())
        })
    }
}

/// Append-only store of report versions, keyed by fingerprint.
#[derive(Debug, Default)]
pub struct ReportStore {
    versions: RwLock<HashMap<ContentFingerprint, Vec<Arc<ForensicReport>>>>,
}

impl ReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and append the next version for `fingerprint`.
    ///
    /// `build` receives the version number to stamp on the report.
    pub fn append<F>(
        &self,
        fingerprint: ContentFingerprint,
        build: F,
    ) -> Result<Arc<ForensicReport>, DocVerifyError>
    where
        F: FnOnce(u32) -> ForensicReport,
    {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| DocVerifyError::poisoned("report store"))?;
        let list = versions.entry(fingerprint).or_default();
        let next = u32::try_from(list.len()).unwrap_or(u32::MAX).saturating_add(1);
        let report = Arc::new(build(next));
        list.push(report.clone());
        Ok(report)
    }

    /// Latest report version.
    pub fn latest(&self, fingerprint: &ContentFingerprint) -> Option<Arc<ForensicReport>> {
        self.versions.read().ok()?.get(fingerprint)?.last().cloned()
    }

    /// A specific report version.
    pub fn version(
        &self,
        fingerprint: &ContentFingerprint,
        version: u32,
    ) -> Option<Arc<ForensicReport>> {
        let index = usize::try_from(version.checked_sub(1)?).ok()?;
        self.versions.read().ok()?.get(fingerprint)?.get(index).cloned()
    }

    /// All versions, oldest first.
    pub fn history(&self, fingerprint: &ContentFingerprint) -> Vec<Arc<ForensicReport>> {
        self.versions
            .read()
            .ok()
            .and_then(|v| v.get(fingerprint).cloned())
            .unwrap_or_default()
    }
}
