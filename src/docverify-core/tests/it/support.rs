//! Scripted fakes for the three external ports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use docverify_core::issuance::{
    ArchiveStore, LedgerClient, LedgerReceipt, ProvenanceTags, SignedAttestation, TokenMetadata,
};
use docverify_core::{
    AnalysisCapability, CapabilityError, DocVerifyError, DocumentClass, EnginePorts,
    ExternalSystem, InMemoryArchive, InMemoryLedger, PipelineConfig, RetryPolicy, SignalFamily,
    StaticAnalysis, SubmissionRequest, VerificationEngine,
};

static TRACING: Once = Once::new();

/// Route engine logs to the test writer once per binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Analysis fake with per-family overrides, failures and latency.
pub struct ScriptedAnalysis {
    base: StaticAnalysis,
    per_image: Mutex<HashMap<(Vec<u8>, SignalFamily), serde_json::Value>>,
    failures: Mutex<HashMap<SignalFamily, CapabilityError>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedAnalysis {
    pub fn clean() -> Self {
        Self::scripted(StaticAnalysis::clean())
    }

    pub fn scripted(base: StaticAnalysis) -> Self {
        Self {
            base,
            per_image: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer one family differently for one image.
    pub fn respond_for(&self, image: &[u8], family: SignalFamily, response: serde_json::Value) {
        self.per_image
            .lock()
            .unwrap()
            .insert((image.to_vec(), family), response);
    }

    /// Give one image its own face descriptor.
    pub fn face_for(&self, image: &[u8], descriptor: &str) {
        self.respond_for(
            image,
            SignalFamily::Biometric,
            serde_json::json!({ "hasFaceImage": true, "faceConfidence": 0.97, "descriptor": descriptor }),
        );
    }

    /// Make one family fail on every call.
    pub fn fail(&self, family: SignalFamily, error: CapabilityError) {
        self.failures.lock().unwrap().insert(family, error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Capability calls so far, one per family per analysis.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Completed analyses, assuming all four families are queried.
    pub fn analyses(&self) -> usize {
        self.calls() / 4
    }
}

#[async_trait]
impl AnalysisCapability for ScriptedAnalysis {
    async fn analyze(
        &self,
        image: &[u8],
        class: DocumentClass,
        family: SignalFamily,
    ) -> Result<serde_json::Value, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failures.lock().unwrap().get(&family).map(|e| match e {
            CapabilityError::Transport { message } => CapabilityError::Transport {
                message: message.clone(),
            },
            CapabilityError::Malformed { message } => CapabilityError::Malformed {
                message: message.clone(),
            },
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let scripted = self
            .per_image
            .lock()
            .unwrap()
            .get(&(image.to_vec(), family))
            .cloned();
        if let Some(response) = scripted {
            return Ok(response);
        }
        self.base.analyze(image, class, family).await
    }
}

/// Ledger fake that fails the next N writes with a transient error, or
/// records them and answers too late.
pub struct FlakyLedger {
    pub inner: InMemoryLedger,
    fail_writes: AtomicUsize,
    late_acks: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLedger::new(),
            fail_writes: AtomicUsize::new(0),
            late_acks: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Record the next N writes, then stall past any ledger timeout.
    pub fn ack_late_next_writes(&self, n: usize) {
        self.late_acks.store(n, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        let late = self
            .late_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if late {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
    }

    /// Write attempts, failed ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, stage: &'static str) -> Result<(), DocVerifyError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DocVerifyError::transient(
                ExternalSystem::Ledger,
                stage,
                "injected ledger outage",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for FlakyLedger {
    async fn attest(
        &self,
        schema_id: &str,
        issuer: &str,
        holder: &str,
        attestation: &SignedAttestation,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        self.injected_failure("attest")?;
        let receipt = self.inner.attest(schema_id, issuer, holder, attestation).await?;
        self.maybe_stall().await;
        Ok(receipt)
    }

    async fn mint_token(
        &self,
        metadata: &TokenMetadata,
        owner: &str,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        self.injected_failure("mint_token")?;
        let receipt = self.inner.mint_token(metadata, owner).await?;
        self.maybe_stall().await;
        Ok(receipt)
    }

    async fn find_by_document(
        &self,
        document_id: &str,
    ) -> Result<Option<LedgerReceipt>, DocVerifyError> {
        self.inner.find_by_document(document_id).await
    }

    async fn verify_ownership(&self, reference: &str, owner: &str) -> Result<bool, DocVerifyError> {
        self.inner.verify_ownership(reference, owner).await
    }

    async fn is_confirmed(&self, reference: &str) -> Result<bool, DocVerifyError> {
        self.inner.is_confirmed(reference).await
    }
}

/// Archive fake that fails the next N puts with a transient error.
pub struct FlakyArchive {
    pub inner: InMemoryArchive,
    fail_puts: AtomicUsize,
    puts: AtomicUsize,
}

impl FlakyArchive {
    pub fn new() -> Self {
        Self {
            inner: InMemoryArchive::new(),
            fail_puts: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Put attempts, failed ones included.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveStore for FlakyArchive {
    async fn put(&self, sealed: &[u8], tags: &ProvenanceTags) -> Result<String, DocVerifyError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DocVerifyError::transient(
                ExternalSystem::Archive,
                "archive_put",
                "injected archive outage",
            ));
        }
        self.inner.put(sealed, tags).await
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, DocVerifyError> {
        self.inner.get(locator).await
    }
}

/// An engine wired to scripted fakes.
pub struct Harness {
    pub engine: Arc<VerificationEngine>,
    pub analysis: Arc<ScriptedAnalysis>,
    pub ledger: Arc<FlakyLedger>,
    pub archive: Arc<FlakyArchive>,
}

/// Defaults with fast, jitter-free archive retries.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        archive_retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_jitter: Duration::ZERO,
        },
        ..PipelineConfig::default()
    }
}

pub fn harness(analysis: ScriptedAnalysis) -> Harness {
    harness_with(analysis, test_config())
}

pub fn harness_with(analysis: ScriptedAnalysis, config: PipelineConfig) -> Harness {
    init_tracing();
    let analysis = Arc::new(analysis);
    let ledger = Arc::new(FlakyLedger::new());
    let archive = Arc::new(FlakyArchive::new());
    let engine = VerificationEngine::with_config(
        config,
        EnginePorts {
            analysis: analysis.clone(),
            ledger: ledger.clone(),
            archive: archive.clone(),
            cache_store: None,
            issuer_signer: None,
            archive_secret: b"integration-archive-secret".to_vec(),
            audit: None,
        },
    )
    .expect("valid engine config");
    Harness {
        engine: Arc::new(engine),
        analysis,
        ledger,
        archive,
    }
}

pub fn upload(class: DocumentClass, bytes: &[u8]) -> SubmissionRequest {
    SubmissionRequest {
        document_type: class,
        title: format!("{class} scan"),
        mime_type: "image/png".into(),
        content: bytes.to_vec(),
    }
}

/// Signals for the worked example: one HIGH indicator, OCR 0.9, GOOD
/// quality, face 0.9 and security features.
pub fn high_tamper_analysis() -> StaticAnalysis {
    StaticAnalysis::clean()
        .with(
            SignalFamily::Tamper,
            serde_json::json!({
                "tamperIndicators": [{ "type": "CLONE_ARTIFACT", "severity": "HIGH", "confidence": 0.8 }]
            }),
        )
        .with(
            SignalFamily::Ocr,
            serde_json::json!({ "ocrZones": [{ "text": "NAME", "confidence": 0.9 }] }),
        )
        .with(
            SignalFamily::Biometric,
            serde_json::json!({ "hasFaceImage": true, "faceConfidence": 0.9, "descriptor": "face-a" }),
        )
}

/// Signals that score well below the review threshold.
pub fn poor_analysis() -> StaticAnalysis {
    StaticAnalysis::clean()
        .with(
            SignalFamily::Tamper,
            serde_json::json!({
                "tamperIndicators": [
                    { "type": "CLONE_ARTIFACT", "severity": "CRITICAL" },
                    { "type": "FONT_INCONSISTENCY", "severity": "HIGH" },
                    { "type": "EDGE_HALO", "severity": "MEDIUM" }
                ]
            }),
        )
        .with(
            SignalFamily::Ocr,
            serde_json::json!({ "ocrZones": [{ "text": "?", "confidence": 0.3 }] }),
        )
        .with(
            SignalFamily::Metadata,
            serde_json::json!({ "documentQuality": "POOR", "hasSecurityFeatures": false }),
        )
}
