//! Issuance: ledger proof plus encrypted archive copy.
//!
//! For an approved document the pipeline
//! 1. classifies it as non-transferable (attestation) or transferable (token),
//! 2. writes the proof to the ledger,
//! 3. seals the original bytes and puts them in the archive,
//! 4. records the references on the document.
//!
//! The ledger step is never repeated once it succeeded. If the archive step
//! fails afterwards the document is ISSUED without a locator and only the
//! archive step is retried. If the ledger step fails the document stays
//! VERIFIED and the caller gets [`IssuanceStatus::LedgerFailed`].
//!
//! A ledger call that times out may still have landed. Before each write
//! the document is marked `ledger_pending`; while the mark is set, a retry
//! first asks the ledger for a record keyed by the document id and adopts
//! it instead of writing a second one.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docverify_crypto::{DocumentSealer, IssuerSignature, IssuerSigner, IssuerVerifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEventKind, AuditRecord, AuditTrail};
use crate::document::{Document, DocumentStore};
use crate::error::{DocVerifyError, ExternalSystem};
use crate::fingerprint::ContentFingerprint;
use crate::retry::RetryPolicy;
use crate::scoring::ForensicReport;
use crate::types::{DocumentClass, IssuanceKind, LifecycleStatus};

/// Actor id used for audit entries written by the pipeline itself.
const SYSTEM_ACTOR: &str = "system";

/// What the ledger returns for a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    /// Attestation or token reference.
    pub reference: String,
    /// Whether the write is already final on the ledger.
    pub confirmed: bool,
}

/// Distributed ledger client.
///
/// Transport failures should be reported as
/// [`DocVerifyError::TransientExternal`] so callers can retry.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Record a non-transferable attestation about `holder`.
    ///
    /// The attestation's document id is the idempotency key for
    /// [`find_by_document`](Self::find_by_document).
    async fn attest(
        &self,
        schema_id: &str,
        issuer: &str,
        holder: &str,
        attestation: &SignedAttestation,
    ) -> Result<LedgerReceipt, DocVerifyError>;

    /// Mint a transferable token owned by `owner`.
    ///
    /// `metadata.attributes.document_id` is the idempotency key for
    /// [`find_by_document`](Self::find_by_document).
    async fn mint_token(
        &self,
        metadata: &TokenMetadata,
        owner: &str,
    ) -> Result<LedgerReceipt, DocVerifyError>;

    /// The attestation or token already written for `document_id`, if any.
    async fn find_by_document(
        &self,
        document_id: &str,
    ) -> Result<Option<LedgerReceipt>, DocVerifyError>;

    /// Whether `owner` holds `reference`.
    async fn verify_ownership(&self, reference: &str, owner: &str) -> Result<bool, DocVerifyError>;

    /// Whether `reference` is final on the ledger.
    async fn is_confirmed(&self, reference: &str) -> Result<bool, DocVerifyError>;
}

/// Permanent blob storage for sealed documents.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Store a sealed blob and return its locator.
    async fn put(&self, sealed: &[u8], tags: &ProvenanceTags) -> Result<String, DocVerifyError>;

    /// Fetch a sealed blob.
    async fn get(&self, locator: &str) -> Result<Vec<u8>, DocVerifyError>;
}

/// The statement an attestation makes. Signed as canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    /// Document id.
    pub document_id: String,
    /// Content fingerprint (hex).
    pub fingerprint: ContentFingerprint,
    /// Document class.
    pub document_class: DocumentClass,
    /// Overall forensic score.
    pub overall_score: u8,
    /// Report version the approval was based on.
    pub report_version: u32,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
}

impl AttestationPayload {
    /// Bytes that are signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, DocVerifyError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Attestation payload with the issuer's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAttestation {
    /// Signed statement.
    pub payload: AttestationPayload,
    /// Issuer signature over the canonical payload.
    pub signature: IssuerSignature,
}

impl SignedAttestation {
    /// Sign a payload.
    pub fn sign(
        payload: AttestationPayload,
        signer: &dyn IssuerSigner,
    ) -> Result<Self, DocVerifyError> {
        let signature = signer.sign_tagged(&payload.canonical_bytes()?)?;
        Ok(Self { payload, signature })
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self, verifier: &dyn IssuerVerifier) -> Result<bool, DocVerifyError> {
        Ok(verifier.verify_tagged(&self.payload.canonical_bytes()?, &self.signature)?)
    }
}

/// Token metadata. Independent of the archive so it can be minted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    /// Display name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Description.
    pub description: String,
    /// Attributes.
    pub attributes: TokenAttributes,
}

/// On-ledger token attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAttributes {
    /// Document the token was minted for.
    pub document_id: String,
    /// Overall forensic score.
    pub forensic_score: u8,
    /// Document class.
    pub document_class: DocumentClass,
    /// Content fingerprint.
    pub fingerprint: ContentFingerprint,
    /// Report version.
    pub report_version: u32,
}

/// Tags stored with the archived blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceTags {
    /// Document id.
    pub document_id: String,
    /// Owner id.
    pub owner_id: String,
    /// Document class.
    pub document_class: DocumentClass,
    /// Fingerprint of the plaintext.
    pub fingerprint: ContentFingerprint,
    /// Overall forensic score.
    pub forensic_score: u8,
    /// Ledger reference the blob belongs to.
    pub ledger_reference: String,
    /// SHA-256 of the sealed blob (hex).
    pub ciphertext_sha256: String,
    /// Plaintext size in bytes.
    pub original_size: u64,
}

/// Outcome class of one issuance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceStatus {
    /// Ledger and archive both done.
    Issued,
    /// Ledger done; archive still to be retried.
    ArchivePending,
    /// Ledger write failed; document stays VERIFIED.
    LedgerFailed,
}

/// What the caller learns about an issuance attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceResult {
    /// Document id.
    pub document_id: String,
    /// Outcome.
    pub status: IssuanceStatus,
    /// How the document is issued.
    pub kind: IssuanceKind,
    /// Ledger reference, once written.
    pub ledger_reference: Option<String>,
    /// Whether the ledger reported the reference final.
    pub ledger_confirmed: bool,
    /// Archive locator, once written.
    pub archive_locator: Option<String>,
    /// Error detail for a failed step.
    pub error: Option<String>,
}

impl IssuanceResult {
    /// The forensic result stands but issuance must be retried.
    pub fn needs_retry(&self) -> bool {
        self.status != IssuanceStatus::Issued
    }
}

/// Ledger view of an issued document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceVerification {
    /// Document id.
    pub document_id: String,
    /// Ledger reference checked.
    pub ledger_reference: String,
    /// Ledger confirms the owner holds the reference.
    pub owner_verified: bool,
    /// Ledger reports the reference final.
    pub confirmed: bool,
}

/// Issuance settings.
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    /// Attestation schema id.
    pub attestation_schema: String,
    /// Issuer id.
    pub issuer_id: String,
    /// Token symbol.
    pub token_symbol: String,
    /// Ledger call timeout.
    pub ledger_timeout: Duration,
    /// Archive call timeout.
    pub archive_timeout: Duration,
    /// Backoff for archive calls.
    pub archive_retry: RetryPolicy,
}

/// Drives ledger and archive for approved documents.
pub struct IssuancePipeline {
    ledger: Arc<dyn LedgerClient>,
    archive: Arc<dyn ArchiveStore>,
    signer: Arc<dyn IssuerSigner>,
    sealer: DocumentSealer,
    documents: Arc<DocumentStore>,
    audit: Arc<AuditTrail>,
    settings: IssuanceSettings,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a document's issuance claim on drop.
struct IssuanceClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    document_id: String,
}

impl Drop for IssuanceClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.document_id);
        }
    }
}

impl IssuancePipeline {
    /// Create a pipeline.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        archive: Arc<dyn ArchiveStore>,
        signer: Arc<dyn IssuerSigner>,
        sealer: DocumentSealer,
        documents: Arc<DocumentStore>,
        audit: Arc<AuditTrail>,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            ledger,
            archive,
            signer,
            sealer,
            documents,
            audit,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Issue a VERIFIED document.
    ///
    /// Transient ledger failures are reported as
    /// [`IssuanceStatus::LedgerFailed`] rather than as an error.
    #[instrument(skip(self, report), fields(report_version = report.version))]
    pub async fn issue(
        &self,
        document_id: &str,
        report: &ForensicReport,
    ) -> Result<IssuanceResult, DocVerifyError> {
        let _claim = self.claim(document_id)?;
        let doc = self.documents.get(document_id)?;
        if doc.status != LifecycleStatus::Verified {
            return Err(DocVerifyError::InvalidTransition {
                subject: doc.id.clone(),
                current: doc.status.to_string(),
                requested: LifecycleStatus::Issued.to_string(),
            });
        }
        let content = self.retained_content(&doc)?;

        let earlier = if doc.ledger_pending {
            match self.reconcile(&doc).await {
                Ok(found) => found,
                Err(e) => return self.ledger_failed(&doc, e),
            }
        } else {
            self.persist(&doc.id, |d| {
                d.ledger_pending = true;
                Ok(())
            })?;
            None
        };
        let reconciled = earlier.is_some();
        let receipt = match earlier {
            Some(receipt) => receipt,
            None => match self.write_ledger(&doc, report).await {
                Ok(receipt) => receipt,
                Err(e) => return self.ledger_failed(&doc, e),
            },
        };

        // The reference reaches the audit trail before the document write
        // so a failed write cannot lose it.
        let kind = doc.issuance_kind();
        self.audit.append(
            AuditRecord::new(AuditEventKind::LedgerIssued, SYSTEM_ACTOR)
                .document(&doc.id)
                .payload(serde_json::json!({
                    "kind": kind,
                    "reference": receipt.reference,
                    "confirmed": receipt.confirmed,
                    "reconciled": reconciled,
                })),
        );
        let reference = receipt.reference.clone();
        let doc = self
            .persist(&doc.id, |d| d.record_issuance(reference.clone()))
            .map_err(|e| {
                error!(
                    document_id = %doc.id,
                    reference = %receipt.reference,
                    "Issuance: ledger write not recorded on document, retry will reconcile: {}",
                    e
                );
                e
            })?;
        info!(document_id = %doc.id, reference = %receipt.reference, ?kind, reconciled, "Issuance: ledger write recorded");

        Ok(self
            .archive_step(doc, &content, report.overall_score, receipt.confirmed)
            .await)
    }

    /// Retry only the archive step for an ISSUED document without a locator.
    #[instrument(skip(self, report))]
    pub async fn retry_archive(
        &self,
        document_id: &str,
        report: &ForensicReport,
    ) -> Result<IssuanceResult, DocVerifyError> {
        let _claim = self.claim(document_id)?;
        let doc = self.documents.get(document_id)?;
        if !doc.archive_pending() {
            return Err(DocVerifyError::validation(format!(
                "document {} has no pending archive step (status {})",
                doc.id, doc.status
            )));
        }
        let content = self.retained_content(&doc)?;
        let confirmed = self.ledger_confirmed(&doc).await;
        debug!(document_id = %doc.id, confirmed, "Issuance: retrying archive step only");
        Ok(self
            .archive_step(doc, &content, report.overall_score, confirmed)
            .await)
    }

    /// Fetch and decrypt the archived copy, checking its fingerprint.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, document_id: &str, actor_id: &str) -> Result<Vec<u8>, DocVerifyError> {
        let doc = self.documents.get(document_id)?;
        let locator = doc.archive_locator.clone().ok_or_else(|| {
            DocVerifyError::not_found("archived copy", document_id)
        })?;

        let sealed = self
            .settings
            .archive_retry
            .run("archive_get", || {
                bounded(
                    self.settings.archive_timeout,
                    ExternalSystem::Archive,
                    "archive_get",
                    self.archive.get(&locator),
                )
            })
            .await
            .map_err(|e| e.for_document(&doc.id))?;

        let plaintext = self.sealer.open(&doc.id, &sealed).map_err(|e| {
            warn!(document_id = %doc.id, "Issuance: archived copy fails to open: {}", e);
            DocVerifyError::IntegrityMismatch {
                document_id: doc.id.clone(),
                reason: format!("archived copy does not authenticate: {e}"),
            }
        })?;

        if !doc.fingerprint.matches(&plaintext) {
            warn!(document_id = %doc.id, "Issuance: archived copy fingerprint mismatch");
            return Err(DocVerifyError::IntegrityMismatch {
                document_id: doc.id.clone(),
                reason: "archived plaintext fingerprint differs from document".into(),
            });
        }

        self.audit.append(
            AuditRecord::new(AuditEventKind::ArchiveRetrieved, actor_id).document(&doc.id),
        );
        Ok(plaintext)
    }

    /// Ask the ledger whether the owner holds the recorded reference.
    #[instrument(skip(self))]
    pub async fn verify_issuance(
        &self,
        document_id: &str,
        actor_id: &str,
    ) -> Result<IssuanceVerification, DocVerifyError> {
        let doc = self.documents.get(document_id)?;
        let reference = doc
            .ledger_ref()
            .ok_or_else(|| DocVerifyError::not_found("ledger reference", document_id))?
            .to_string();

        let timeout = self.settings.ledger_timeout;
        let (owner_verified, confirmed) = tokio::try_join!(
            bounded(
                timeout,
                ExternalSystem::Ledger,
                "verify_ownership",
                self.ledger.verify_ownership(&reference, &doc.owner_id),
            ),
            bounded(
                timeout,
                ExternalSystem::Ledger,
                "is_confirmed",
                self.ledger.is_confirmed(&reference),
            ),
        )
        .map_err(|e| e.for_document(&doc.id))?;

        if !owner_verified {
            warn!(document_id = %doc.id, %reference, "Issuance: ledger does not confirm ownership");
        }
        self.audit.append(
            AuditRecord::new(AuditEventKind::IssuanceVerified, actor_id)
                .document(&doc.id)
                .payload(serde_json::json!({
                    "reference": reference,
                    "ownerVerified": owner_verified,
                    "confirmed": confirmed,
                })),
        );

        Ok(IssuanceVerification {
            document_id: doc.id,
            ledger_reference: reference,
            owner_verified,
            confirmed,
        })
    }

    fn claim(&self, document_id: &str) -> Result<IssuanceClaim<'_>, DocVerifyError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| DocVerifyError::poisoned("issuance claims"))?;
        if !set.insert(document_id.to_string()) {
            return Err(DocVerifyError::InvalidTransition {
                subject: document_id.to_string(),
                current: "ISSUING".into(),
                requested: LifecycleStatus::Issued.to_string(),
            });
        }
        Ok(IssuanceClaim {
            in_flight: &self.in_flight,
            document_id: document_id.to_string(),
        })
    }

    /// Look for a ledger record left by an earlier attempt whose outcome
    /// was never recorded.
    async fn reconcile(&self, doc: &Document) -> Result<Option<LedgerReceipt>, DocVerifyError> {
        let found = bounded(
            self.settings.ledger_timeout,
            ExternalSystem::Ledger,
            "find_by_document",
            self.ledger.find_by_document(&doc.id),
        )
        .await?;
        match &found {
            Some(receipt) => {
                info!(document_id = %doc.id, reference = %receipt.reference, "Issuance: adopting ledger record from an earlier attempt");
            },
            None => {
                debug!(document_id = %doc.id, "Issuance: no ledger record from the earlier attempt");
            },
        }
        Ok(found)
    }

    /// Turn a ledger error into a `LedgerFailed` result when retryable.
    ///
    /// The `ledger_pending` mark is left in place.
    fn ledger_failed(
        &self,
        doc: &Document,
        e: DocVerifyError,
    ) -> Result<IssuanceResult, DocVerifyError> {
        let e = e.for_document(&doc.id);
        if !e.is_retryable() {
            return Err(e);
        }
        warn!(document_id = %doc.id, "Issuance: ledger write failed, document stays VERIFIED: {}", e);
        self.audit.append(
            AuditRecord::new(AuditEventKind::LedgerFailed, SYSTEM_ACTOR)
                .document(&doc.id)
                .payload(serde_json::json!({ "error": e.to_string() })),
        );
        Ok(IssuanceResult {
            document_id: doc.id.clone(),
            status: IssuanceStatus::LedgerFailed,
            kind: doc.issuance_kind(),
            ledger_reference: None,
            ledger_confirmed: false,
            archive_locator: None,
            error: Some(e.to_string()),
        })
    }

    /// Whether the ledger reports the document's reference final.
    async fn ledger_confirmed(&self, doc: &Document) -> bool {
        let Some(reference) = doc.ledger_ref() else {
            return false;
        };
        let checked = bounded(
            self.settings.ledger_timeout,
            ExternalSystem::Ledger,
            "is_confirmed",
            self.ledger.is_confirmed(reference),
        )
        .await;
        checked.unwrap_or_else(|e| {
            warn!(document_id = %doc.id, "Issuance: confirmation check failed: {}", e);
            false
        })
    }

    fn retained_content(&self, doc: &Document) -> Result<Arc<Vec<u8>>, DocVerifyError> {
        self.documents.content(&doc.id).ok_or_else(|| DocVerifyError::Internal {
            message: format!("original bytes for {} are no longer retained", doc.id),
        })
    }

    async fn write_ledger(
        &self,
        doc: &Document,
        report: &ForensicReport,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        let timeout = self.settings.ledger_timeout;
        match doc.issuance_kind() {
            IssuanceKind::NonTransferable => {
                let attestation = SignedAttestation::sign(
                    AttestationPayload {
                        document_id: doc.id.clone(),
                        fingerprint: doc.fingerprint,
                        document_class: doc.class,
                        overall_score: report.overall_score,
                        report_version: report.version,
                        issued_at: Utc::now(),
                    },
                    self.signer.as_ref(),
                )?;
                bounded(
                    timeout,
                    ExternalSystem::Ledger,
                    "attest",
                    self.ledger.attest(
                        &self.settings.attestation_schema,
                        &self.settings.issuer_id,
                        &doc.owner_id,
                        &attestation,
                    ),
                )
                .await
            },
            IssuanceKind::Transferable => {
                let metadata = TokenMetadata {
                    name: format!("{} {}", doc.class.as_str(), doc.title),
                    symbol: self.settings.token_symbol.clone(),
                    description: format!("Verified {} ({})", doc.class.as_str(), doc.id),
                    attributes: TokenAttributes {
                        document_id: doc.id.clone(),
                        forensic_score: report.overall_score,
                        document_class: doc.class,
                        fingerprint: doc.fingerprint,
                        report_version: report.version,
                    },
                };
                bounded(
                    timeout,
                    ExternalSystem::Ledger,
                    "mint_token",
                    self.ledger.mint_token(&metadata, &doc.owner_id),
                )
                .await
            },
        }
    }

    /// Seal, store and record the archive copy. Never touches the ledger.
    async fn archive_step(
        &self,
        doc: Document,
        content: &[u8],
        forensic_score: u8,
        ledger_confirmed: bool,
    ) -> IssuanceResult {
        let kind = doc.issuance_kind();
        let reference = doc.ledger_ref().map(str::to_string);
        let result = |status, locator, error| IssuanceResult {
            document_id: doc.id.clone(),
            status,
            kind,
            ledger_reference: reference.clone(),
            ledger_confirmed,
            archive_locator: locator,
            error,
        };

        match self.store_archive(&doc, content, forensic_score).await {
            Ok(locator) => {
                let recorded = self.persist(&doc.id, |d| {
                    d.archive_locator = Some(locator.clone());
                    Ok(())
                });
                if let Err(e) = recorded {
                    warn!(document_id = %doc.id, "Issuance: archive stored but locator not recorded: {}", e);
                    return result(IssuanceStatus::ArchivePending, None, Some(e.to_string()));
                }
                self.documents.release_content(&doc.id);
                self.audit.append(
                    AuditRecord::new(AuditEventKind::ArchiveStored, SYSTEM_ACTOR)
                        .document(&doc.id)
                        .payload(serde_json::json!({ "locator": locator })),
                );
                info!(document_id = %doc.id, %locator, "Issuance: document issued");
                result(IssuanceStatus::Issued, Some(locator), None)
            },
            Err(e) => {
                let e = e.for_document(&doc.id);
                warn!(document_id = %doc.id, "Issuance: archive step failed, ledger reference kept: {}", e);
                self.audit.append(
                    AuditRecord::new(AuditEventKind::ArchiveFailed, SYSTEM_ACTOR)
                        .document(&doc.id)
                        .payload(serde_json::json!({ "error": e.to_string() })),
                );
                result(IssuanceStatus::ArchivePending, None, Some(e.to_string()))
            },
        }
    }

    async fn store_archive(
        &self,
        doc: &Document,
        content: &[u8],
        forensic_score: u8,
    ) -> Result<String, DocVerifyError> {
        let reference = doc
            .ledger_ref()
            .ok_or_else(|| DocVerifyError::Internal {
                message: format!("archive step for {} without ledger reference", doc.id),
            })?
            .to_string();
        let sealed = self.sealer.seal(&doc.id, content)?;
        let tags = ProvenanceTags {
            document_id: doc.id.clone(),
            owner_id: doc.owner_id.clone(),
            document_class: doc.class,
            fingerprint: doc.fingerprint,
            forensic_score,
            ledger_reference: reference,
            ciphertext_sha256: hex::encode(Sha256::digest(&sealed)),
            original_size: content.len() as u64,
        };

        self.settings
            .archive_retry
            .run("archive_put", || {
                bounded(
                    self.settings.archive_timeout,
                    ExternalSystem::Archive,
                    "archive_put",
                    self.archive.put(&sealed, &tags),
                )
            })
            .await
    }

    /// Apply `f` against the latest version, re-reading after lost races.
    fn persist<F>(&self, document_id: &str, f: F) -> Result<Document, DocVerifyError>
    where
        F: Fn(&mut Document) -> Result<(), DocVerifyError>,
    {
        const ATTEMPTS: usize = 3;
        let mut last = None;
        for _ in 0..ATTEMPTS {
            let current = self.documents.get(document_id)?;
            match self.documents.update(document_id, current.version, &f) {
                Err(e @ DocVerifyError::StaleState { .. }) => last = Some(e),
                other => return other,
            }
        }
        Err(last.unwrap_or_else(|| DocVerifyError::Internal {
            message: format!("could not persist issuance for {document_id}"),
        }))
    }
}

/// Bound an external call by `limit`, mapping expiry to a transient error.
pub(crate) async fn bounded<T, Fut>(
    limit: Duration,
    system: ExternalSystem,
    stage: &'static str,
    call: Fut,
) -> Result<T, DocVerifyError>
where
    Fut: Future<Output = Result<T, DocVerifyError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DocVerifyError::transient(
            system,
            stage,
            format!("no response within {limit:?}"),
        )),
    }
}
