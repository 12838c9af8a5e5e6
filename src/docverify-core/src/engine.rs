//! Main document verification engine.
//!
//! This module implements the complete submission flow:
//! 1. Fingerprint and dedup against the owner's documents
//! 2. Forensic report from the cache, or a fresh single-flight analysis
//! 3. Biometric duplicate lookup
//! 4. Decision from the report
//! 5. Issuance for approved documents
//!
//! Every state change goes to the audit trail. No lock is held across a
//! call to the analysis capability, the ledger or the archive.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docverify_crypto::{DocumentSealer, Ed25519Signer, IssuerSigner};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEventKind, AuditRecord, AuditTrail, AuditVerificationResult};
use crate::biometric::{BiometricMatch, BiometricRegistry};
use crate::cache::{CacheOutcome, CacheStats, CacheStore, ForensicCache, MemoryCacheStore};
use crate::collector::{AnalysisCapability, RawSignalCollector};
use crate::config::PipelineConfig;
use crate::decision::{Decision, DecisionEngine, DecisionState, ReviewAction, ReviewRequest};
use crate::document::{Document, DocumentStore, NewDocument, ReportStore};
use crate::error::DocVerifyError;
use crate::fingerprint::ContentFingerprint;
use crate::issuance::{
    ArchiveStore, IssuancePipeline, IssuanceResult, IssuanceSettings, IssuanceVerification,
    LedgerClient,
};
use crate::permissions::{GrantOutcome, GrantRequest, Permission, PermissionLedger};
use crate::scoring::{ComplianceScorer, ForensicReport, RemediationGuidance};
use crate::types::{AccessType, Actor, ActorRole, DocumentClass, LifecycleStatus};

/// Document moves retried after a lost optimistic race.
const MOVE_ATTEMPTS: usize = 3;

/// A document upload.
#[derive(Clone)]
pub struct SubmissionRequest {
    /// Declared document class.
    pub document_type: DocumentClass,
    /// Title.
    pub title: String,
    /// MIME type of `content`.
    pub mime_type: String,
    /// Raw bytes.
    pub content: Vec<u8>,
}

impl fmt::Debug for SubmissionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionRequest")
            .field("document_type", &self.document_type)
            .field("title", &self.title)
            .field("mime_type", &self.mime_type)
            .field("content_len", &self.content.len())
            .finish()
    }
}

impl SubmissionRequest {
    fn validate(&self) -> Result<(), DocVerifyError> {
        if self.content.is_empty() {
            return Err(DocVerifyError::validation("document content is empty"));
        }
        if self.title.trim().is_empty() {
            return Err(DocVerifyError::validation("title is required"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(DocVerifyError::validation("mimeType is required"));
        }
        Ok(())
    }
}

/// What a submitter learns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    /// The document, as stored after this submission.
    pub document: Document,
    /// `false` when the upload resolved to an existing document.
    pub created: bool,
    /// Current decision.
    pub decision: Option<Decision>,
    /// Report the decision is based on.
    pub report: Option<Arc<ForensicReport>>,
    /// How the report was obtained; `None` when no analysis ran.
    pub cache: Option<CacheOutcome>,
    /// Issuance attempt for an approved document.
    pub issuance: Option<IssuanceResult>,
    /// Guidance for a rejected document.
    pub remediation: Option<RemediationGuidance>,
}

/// What a reviewer learns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    /// The document after the review.
    pub document: Document,
    /// The resolved decision.
    pub decision: Decision,
    /// Issuance attempt after approval.
    pub issuance: Option<IssuanceResult>,
    /// Guidance after rejection.
    pub remediation: Option<RemediationGuidance>,
}

/// One entry of the review queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueItem {
    /// The pending decision.
    pub decision: Decision,
    /// The document.
    pub document: Document,
    /// Report with the score breakdown.
    pub report: Option<Arc<ForensicReport>>,
}

/// External collaborators injected into the engine.
pub struct EnginePorts {
    /// Multimodal analysis.
    pub analysis: Arc<dyn AnalysisCapability>,
    /// Ledger client.
    pub ledger: Arc<dyn LedgerClient>,
    /// Archive store.
    pub archive: Arc<dyn ArchiveStore>,
    /// Report cache; an in-memory TTL store sized from config when `None`.
    pub cache_store: Option<Arc<dyn CacheStore>>,
    /// Issuer key; a random Ed25519 key when `None`.
    pub issuer_signer: Option<Arc<dyn IssuerSigner>>,
    /// Secret the archive master key is derived from.
    pub archive_secret: Vec<u8>,
    /// Audit trail; in-memory when `None`.
    pub audit: Option<Arc<AuditTrail>>,
}

/// The main document verification engine.
///
/// This is the entry point for submission, review, issuance and sharing.
pub struct VerificationEngine {
    config: PipelineConfig,
    documents: Arc<DocumentStore>,
    reports: ReportStore,
    cache: ForensicCache,
    collector: RawSignalCollector,
    scorer: ComplianceScorer,
    decisions: DecisionEngine,
    biometrics: BiometricRegistry,
    issuance: IssuancePipeline,
    permissions: Arc<PermissionLedger>,
    audit: Arc<AuditTrail>,
}

impl VerificationEngine {
    /// Create an engine with a validated configuration.
    pub fn with_config(config: PipelineConfig, ports: EnginePorts) -> Result<Self, DocVerifyError> {
        config.validate()?;
        if ports.archive_secret.is_empty() {
            return Err(DocVerifyError::Config {
                message: "archive secret must not be empty".into(),
            });
        }
        info!(
            analysis_timeout_ms = config.analysis_timeout.as_millis() as u64,
            cache_ttl_s = config.cache_ttl.as_secs(),
            approve = config.thresholds.approve,
            review = config.thresholds.review,
            "VerificationEngine: starting initialization"
        );

        let documents = Arc::new(DocumentStore::new());
        let audit = ports.audit.unwrap_or_else(|| {
            Arc::new(AuditTrail::new().with_retained_entries(config.audit_retained_entries))
        });

        let cache_store = ports.cache_store.unwrap_or_else(|| {
            debug!(
                capacity = config.cache_capacity,
                "VerificationEngine: using in-memory report cache"
            );
            Arc::new(MemoryCacheStore::new(config.cache_ttl, config.cache_capacity))
        });

        let signer = ports.issuer_signer.unwrap_or_else(|| {
            warn!("VerificationEngine: no issuer key configured, generating an ephemeral Ed25519 key");
            Arc::new(Ed25519Signer::random())
        });

        let issuance = IssuancePipeline::new(
            ports.ledger,
            ports.archive,
            signer,
            DocumentSealer::new(&ports.archive_secret),
            documents.clone(),
            audit.clone(),
            IssuanceSettings {
                attestation_schema: config.attestation_schema.clone(),
                issuer_id: config.issuer_id.clone(),
                token_symbol: config.token_symbol.clone(),
                ledger_timeout: config.ledger_timeout,
                archive_timeout: config.archive_timeout,
                archive_retry: config.archive_retry.clone(),
            },
        );

        let engine = Self {
            reports: ReportStore::new(),
            cache: ForensicCache::new(cache_store),
            collector: RawSignalCollector::new(ports.analysis, config.analysis_timeout),
            scorer: ComplianceScorer::new(config.thresholds, config.weights),
            decisions: DecisionEngine::new(config.biometric_match_threshold),
            biometrics: BiometricRegistry::new(),
            issuance,
            permissions: Arc::new(PermissionLedger::new(documents.clone(), audit.clone())),
            documents,
            audit,
            config,
        };
        info!("VerificationEngine: initialization complete");
        Ok(engine)
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Submission and review
    // ---------------------------------------------------------------------

    /// Submit a document and run it through analysis, decision and, when
    /// approved, issuance.
    ///
    /// Re-uploading identical bytes resolves to the existing document and
    /// does not analyze again, unless its last analysis failed.
    #[instrument(skip(self, request), fields(owner = %actor.id, class = %request.document_type))]
    pub async fn submit(
        &self,
        actor: &Actor,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, DocVerifyError> {
        let owner_id = actor.authenticated()?.to_string();
        request.validate()?;

        let (doc, created) = self.documents.insert_or_get(NewDocument {
            owner_id: owner_id.clone(),
            title: request.title,
            class: request.document_type,
            mime_type: request.mime_type,
            content: Arc::new(request.content),
        })?;

        if !created {
            self.audit.append(
                AuditRecord::new(AuditEventKind::DocumentResubmitted, &owner_id).document(&doc.id),
            );
            if self.decisions.resume_analysis(&doc.id).is_ok() {
                info!(document_id = %doc.id, "VerificationEngine: resuming analysis that failed earlier");
                return self.analyze_and_decide(doc, &owner_id, false).await;
            }
            info!(document_id = %doc.id, "VerificationEngine: identical upload resolved to existing document");
            return Ok(self.existing_outcome(doc));
        }

        self.audit.append(
            AuditRecord::new(AuditEventKind::DocumentSubmitted, &owner_id)
                .document(&doc.id)
                .payload(serde_json::json!({
                    "fingerprint": doc.fingerprint,
                    "class": doc.class,
                    "byteSize": doc.byte_size,
                })),
        );

        self.decisions.open(&doc.id, &owner_id)?;
        self.decisions.begin_analysis(&doc.id)?;
        let doc = self.move_document(&doc.id, LifecycleStatus::Analyzing, None, "system")?;
        self.analyze_and_decide(doc, &owner_id, true).await
    }

    /// Analyze an ANALYZING document, decide, and issue when approved.
    ///
    /// A failed analysis is recorded on the decision and the document stays
    /// ANALYZING.
    async fn analyze_and_decide(
        &self,
        doc: Document,
        owner_id: &str,
        created: bool,
    ) -> Result<SubmissionOutcome, DocVerifyError> {
        let (report, cache_outcome) = match self.analyze(&doc).await {
            Ok(found) => found,
            Err(e) => {
                error!(document_id = %doc.id, "VerificationEngine: analysis failed: {}", e);
                self.decisions.record_analysis_failure(&doc.id, &e.to_string())?;
                return Err(e);
            },
        };

        let biometric_match = self.biometric_lookup(owner_id, &report);
        let decision = self.decisions.decide(&doc.id, &report, biometric_match)?;
        self.audit_decision(&decision, "system");

        let next = lifecycle_for(decision.state);
        let doc = self.move_document(&doc.id, next, Some(report.version), "system")?;

        let mut issuance = None;
        let mut remediation = None;
        match decision.state {
            DecisionState::Approved => {
                self.enroll_biometric(owner_id, &report);
                issuance = Some(self.issuance.issue(&doc.id, &report).await?);
            },
            DecisionState::Rejected => {
                remediation = Some(RemediationGuidance::for_report(
                    &report,
                    self.scorer.thresholds(),
                    None,
                ));
            },
            _ => {},
        }

        Ok(SubmissionOutcome {
            document: self.documents.get(&doc.id)?,
            created,
            decision: Some(decision),
            report: Some(report),
            cache: Some(cache_outcome),
            issuance,
            remediation,
        })
    }

    /// Resolve an UNDER_REVIEW decision.
    #[instrument(skip(self, request), fields(reviewer = %reviewer.id, document_id = %request.document_id))]
    pub async fn review(
        &self,
        reviewer: &Actor,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, DocVerifyError> {
        let decision = self.decisions.review(reviewer, &request)?;
        self.audit.append(
            AuditRecord::new(AuditEventKind::ReviewResolved, &reviewer.id)
                .document(&decision.document_id)
                .payload(serde_json::json!({
                    "action": request.action,
                    "comments": decision.comments,
                })),
        );

        let doc = self.move_document(
            &decision.document_id,
            lifecycle_for(decision.state),
            None,
            &reviewer.id,
        )?;
        let report = self.decided_report(&doc);

        let mut issuance = None;
        let mut remediation = None;
        match request.action {
            ReviewAction::Approve => {
                let report = report.ok_or_else(|| DocVerifyError::Internal {
                    message: format!("approved document {} has no report", doc.id),
                })?;
                self.enroll_biometric(&doc.owner_id, &report);
                issuance = Some(self.issuance.issue(&doc.id, &report).await?);
            },
            ReviewAction::Reject => {
                remediation = report.map(|r| {
                    RemediationGuidance::for_report(
                        &r,
                        self.scorer.thresholds(),
                        decision.comments.as_deref(),
                    )
                });
            },
        }

        Ok(ReviewOutcome {
            document: self.documents.get(&doc.id)?,
            decision,
            issuance,
            remediation,
        })
    }

    /// Decisions waiting for a reviewer, oldest first, with their reports.
    pub fn review_queue(&self, reviewer: &Actor) -> Result<Vec<ReviewQueueItem>, DocVerifyError> {
        require_reviewer(reviewer, "view the review queue")?;
        Ok(self
            .decisions
            .under_review()
            .into_iter()
            .filter_map(|decision| {
                let document = self.documents.get(&decision.document_id).ok()?;
                let report = decision
                    .report_version
                    .and_then(|v| self.reports.version(&document.fingerprint, v));
                Some(ReviewQueueItem {
                    decision,
                    document,
                    report,
                })
            })
            .collect())
    }

    /// Retry issuance after a ledger or archive failure.
    ///
    /// An ISSUED document without a locator only re-runs the archive step.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn retry_issuance(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<IssuanceResult, DocVerifyError> {
        let doc = self.owned_or_reviewed(actor, document_id)?;
        let report = self.decided_report(&doc).ok_or_else(|| DocVerifyError::Internal {
            message: format!("document {} has no decided report", doc.id),
        })?;

        if doc.archive_pending() {
            return self.issuance.retry_archive(&doc.id, &report).await;
        }
        let decision = self.decisions.get(&doc.id)?;
        if doc.status == LifecycleStatus::Verified && decision.state == DecisionState::Approved {
            return self.issuance.issue(&doc.id, &report).await;
        }
        Err(DocVerifyError::InvalidTransition {
            subject: doc.id.clone(),
            current: doc.status.to_string(),
            requested: LifecycleStatus::Issued.to_string(),
        })
    }

    /// Produce a new report version for a document, bypassing the cache.
    ///
    /// The new version replaces the cached entry. Earlier versions and the
    /// existing decision are not touched.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn reanalyze(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<Arc<ForensicReport>, DocVerifyError> {
        let doc = self.owned_or_reviewed(actor, document_id)?;
        let report = self.run_analysis(&doc, &actor.id).await?;
        self.cache.replace(report.clone()).await;
        self.audit.append(
            AuditRecord::new(AuditEventKind::ReportGenerated, &actor.id)
                .document(&doc.id)
                .payload(serde_json::json!({
                    "reportVersion": report.version,
                    "overallScore": report.overall_score,
                    "reanalysis": true,
                })),
        );
        info!(document_id = %doc.id, version = report.version, "VerificationEngine: re-analysis complete");
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    /// A document, visible to its owner, reviewers and READ grantees.
    pub fn document(&self, actor: &Actor, document_id: &str) -> Result<Document, DocVerifyError> {
        let doc = self.documents.get(document_id)?;
        self.authorize(actor, &doc, AccessType::Read)?;
        Ok(doc)
    }

    /// The actor's live documents, newest first.
    pub fn documents_for(&self, actor: &Actor) -> Result<Vec<Document>, DocVerifyError> {
        Ok(self.documents.list_by_owner(actor.authenticated()?))
    }

    /// Latest report for a document.
    pub fn report(&self, actor: &Actor, document_id: &str) -> Result<Arc<ForensicReport>, DocVerifyError> {
        let doc = self.owned_or_reviewed(actor, document_id)?;
        self.reports
            .latest(&doc.fingerprint)
            .ok_or_else(|| DocVerifyError::not_found("report", document_id))
    }

    /// Every report version for a document, oldest first.
    pub fn report_history(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<Vec<Arc<ForensicReport>>, DocVerifyError> {
        let doc = self.owned_or_reviewed(actor, document_id)?;
        Ok(self.reports.history(&doc.fingerprint))
    }

    /// Current decision for a document.
    pub fn decision(&self, actor: &Actor, document_id: &str) -> Result<Decision, DocVerifyError> {
        let doc = self.owned_or_reviewed(actor, document_id)?;
        self.decisions.get(&doc.id)
    }

    /// Logically delete a document. Owner only.
    pub fn tombstone(&self, actor: &Actor, document_id: &str) -> Result<Document, DocVerifyError> {
        let owner_id = actor.authenticated()?;
        let doc = self.documents.tombstone(document_id, owner_id)?;
        self.audit.append(
            AuditRecord::new(AuditEventKind::DocumentTombstoned, owner_id).document(&doc.id),
        );
        Ok(doc)
    }

    // ---------------------------------------------------------------------
    // Sharing
    // ---------------------------------------------------------------------

    /// Grant access to a document. Owner only.
    pub fn grant_access(&self, actor: &Actor, request: &GrantRequest) -> Result<GrantOutcome, DocVerifyError> {
        self.permissions.grant(actor.authenticated()?, request)
    }

    /// Revoke a grant. Owner only.
    pub fn revoke_access(&self, actor: &Actor, permission_id: &str) -> Result<Permission, DocVerifyError> {
        self.permissions.revoke(permission_id, actor.authenticated()?)
    }

    /// Whether `grantee_id` holds an effective grant of exactly `access_type`.
    pub fn check_access(&self, document_id: &str, grantee_id: &str, access_type: AccessType) -> bool {
        self.permissions.check(document_id, grantee_id, access_type)
    }

    /// All grants on a document, newest first. Owner only.
    pub fn list_access(&self, actor: &Actor, document_id: &str) -> Result<Vec<Permission>, DocVerifyError> {
        self.permissions.list(document_id, actor.authenticated()?)
    }

    /// Deactivate expired grants now.
    pub fn cleanup_expired_access(&self) -> usize {
        self.permissions.cleanup_expired()
    }

    /// Start the periodic expired-grant cleanup.
    pub fn spawn_permission_cleanup(&self) -> JoinHandle<()> {
        self.permissions.spawn_cleanup(self.config.cleanup_interval)
    }

    /// Decrypted archived copy, for the owner or a READ grantee.
    pub async fn retrieve(&self, actor: &Actor, document_id: &str) -> Result<Vec<u8>, DocVerifyError> {
        let doc = self.documents.get(document_id)?;
        self.authorize(actor, &doc, AccessType::Read)?;
        self.issuance.retrieve(&doc.id, &actor.id).await
    }

    /// Ledger ownership check, for the owner, reviewers or VERIFY grantees.
    pub async fn verify_issuance(
        &self,
        actor: &Actor,
        document_id: &str,
    ) -> Result<IssuanceVerification, DocVerifyError> {
        let doc = self.documents.get(document_id)?;
        self.authorize(actor, &doc, AccessType::Verify)?;
        self.issuance.verify_issuance(&doc.id, &actor.id).await
    }

    // ---------------------------------------------------------------------
    // Cache and audit maintenance
    // ---------------------------------------------------------------------

    /// Report cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.store().stats().await
    }

    /// Drop every cached report.
    pub async fn clear_cache(&self) -> usize {
        let dropped = self.cache.store().clear().await;
        info!(dropped, "VerificationEngine: cache cleared");
        dropped
    }

    /// Drop cached reports older than `cutoff`.
    pub async fn clear_cache_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.cache.store().clear_older_than(cutoff).await
    }

    /// Drop the cached report for one fingerprint.
    pub async fn invalidate_cache(&self, fingerprint: &ContentFingerprint) -> bool {
        self.cache.store().invalidate(fingerprint).await
    }

    /// The audit trail.
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Verify the audit chain.
    pub fn verify_audit(&self) -> AuditVerificationResult {
        self.audit.verify()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    async fn analyze(
        &self,
        doc: &Document,
    ) -> Result<(Arc<ForensicReport>, CacheOutcome), DocVerifyError> {
        let (report, outcome) = self
            .cache
            .get_or_analyze(doc.fingerprint, || self.run_analysis(doc, "system"))
            .await?;

        self.audit.append(
            AuditRecord::new(AuditEventKind::ReportGenerated, "system")
                .document(&doc.id)
                .payload(serde_json::json!({
                    "reportVersion": report.version,
                    "overallScore": report.overall_score,
                    "recommendedAction": report.recommended_action,
                    "cache": outcome,
                    "partialFailures": report.partial_failures.len(),
                })),
        );
        Ok((report, outcome))
    }

    /// Collect, score and store a new report version.
    ///
    /// Bytes released after archiving are read back from the archive.
    async fn run_analysis(
        &self,
        doc: &Document,
        actor_id: &str,
    ) -> Result<Arc<ForensicReport>, DocVerifyError> {
        let content = match self.documents.content(&doc.id) {
            Some(content) => content,
            None => {
                debug!(document_id = %doc.id, "VerificationEngine: reading original bytes from the archive");
                Arc::new(self.issuance.retrieve(&doc.id, actor_id).await?)
            },
        };
        let signals = self.collector.collect(&content, doc.class).await;
        let score = self.scorer.score(&signals);
        self.reports.append(doc.fingerprint, |version| {
            ForensicReport::assemble(doc.fingerprint, version, score, &signals, Utc::now())
        })
    }

    fn biometric_lookup(&self, owner_id: &str, report: &ForensicReport) -> Option<BiometricMatch> {
        let hash = report.biometric_hash.as_deref()?;
        self.biometrics
            .find_conflict(hash, owner_id, report.face_confidence.unwrap_or(0.0))
    }

    fn enroll_biometric(&self, owner_id: &str, report: &ForensicReport) {
        if let Some(hash) = report.biometric_hash.as_deref() {
            if !self
                .biometrics
                .enroll(hash, owner_id, report.face_confidence.unwrap_or(0.0))
            {
                warn!(owner = %owner_id, "VerificationEngine: biometric hash bound to another owner, not enrolled");
            }
        }
    }

    fn audit_decision(&self, decision: &Decision, actor_id: &str) {
        self.audit.append(
            AuditRecord::new(AuditEventKind::DecisionMade, actor_id)
                .document(&decision.document_id)
                .payload(serde_json::json!({
                    "state": decision.state,
                    "reason": decision.reason,
                    "overallScore": decision.overall_score,
                    "duplicateBiometric": decision.duplicate_biometric.is_some(),
                })),
        );
    }

    /// Move a document, re-reading after a lost race, and audit the move.
    fn move_document(
        &self,
        document_id: &str,
        next: LifecycleStatus,
        report_version: Option<u32>,
        actor_id: &str,
    ) -> Result<Document, DocVerifyError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.documents.get(document_id)?;
            let from = current.status;
            let moved = self.documents.update(document_id, current.version, |d| {
                d.transition(next)?;
                if report_version.is_some() {
                    d.report_version = report_version;
                }
                Ok(())
            });
            match moved {
                Ok(doc) => {
                    self.audit.append(
                        AuditRecord::new(AuditEventKind::LifecycleChanged, actor_id)
                            .document(document_id)
                            .payload(serde_json::json!({ "from": from, "to": next })),
                    );
                    return Ok(doc);
                },
                Err(DocVerifyError::StaleState { .. }) if attempt < MOVE_ATTEMPTS => {
                    debug!(document_id, attempt, "VerificationEngine: lost version race, re-reading");
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn decided_report(&self, doc: &Document) -> Option<Arc<ForensicReport>> {
        match doc.report_version {
            Some(v) => self.reports.version(&doc.fingerprint, v),
            None => self.reports.latest(&doc.fingerprint),
        }
    }

    fn existing_outcome(&self, doc: Document) -> SubmissionOutcome {
        let decision = self.decisions.get(&doc.id).ok();
        let report = self.decided_report(&doc);
        let remediation = match (&decision, &report) {
            (Some(d), Some(r)) if d.state == DecisionState::Rejected => Some(
                RemediationGuidance::for_report(r, self.scorer.thresholds(), d.comments.as_deref()),
            ),
            _ => None,
        };
        SubmissionOutcome {
            document: doc,
            created: false,
            decision,
            report,
            cache: None,
            issuance: None,
            remediation,
        }
    }

    fn owned_or_reviewed(&self, actor: &Actor, document_id: &str) -> Result<Document, DocVerifyError> {
        let actor_id = actor.authenticated()?;
        let doc = self.documents.get(document_id)?;
        if doc.owner_id == actor_id || actor.role == ActorRole::Reviewer {
            return Ok(doc);
        }
        Err(DocVerifyError::NotOwner {
            document_id: doc.id,
            requester_id: actor_id.to_string(),
        })
    }

    /// Owner, reviewer, or a grantee holding exactly `access`.
    fn authorize(&self, actor: &Actor, doc: &Document, access: AccessType) -> Result<(), DocVerifyError> {
        let actor_id = actor.authenticated()?;
        if doc.owner_id == actor_id
            || actor.role == ActorRole::Reviewer
            || self.permissions.check(&doc.id, actor_id, access)
        {
            return Ok(());
        }
        Err(DocVerifyError::NotOwner {
            document_id: doc.id.clone(),
            requester_id: actor_id.to_string(),
        })
    }
}

/// Document lifecycle status that mirrors a decision state.
fn lifecycle_for(state: DecisionState) -> LifecycleStatus {
    match state {
        DecisionState::Pending | DecisionState::UnderReview => LifecycleStatus::Pending,
        DecisionState::Analyzing => LifecycleStatus::Analyzing,
        DecisionState::Approved => LifecycleStatus::Verified,
        DecisionState::Rejected => LifecycleStatus::Rejected,
    }
}

fn require_reviewer(actor: &Actor, action: &'static str) -> Result<(), DocVerifyError> {
    let actor_id = actor.authenticated()?;
    if actor.role != ActorRole::Reviewer {
        return Err(DocVerifyError::Forbidden {
            actor_id: actor_id.to_string(),
            action,
        });
    }
    Ok(())
}
