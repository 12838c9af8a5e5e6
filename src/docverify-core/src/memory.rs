//! In-memory implementations of the external ports.
//!
//! Useful for local runs and tests. None of them persist anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::collector::{AnalysisCapability, CapabilityError};
use crate::error::DocVerifyError;
use crate::issuance::{
    ArchiveStore, LedgerClient, LedgerReceipt, ProvenanceTags, SignedAttestation, TokenMetadata,
};
use crate::signals::SignalFamily;
use crate::types::DocumentClass;

/// Analysis capability that answers every family with fixed JSON.
#[derive(Debug, Clone)]
pub struct StaticAnalysis {
    responses: HashMap<SignalFamily, serde_json::Value>,
}

impl StaticAnalysis {
    /// A clean document: no tamper indicators, legible, good quality,
    /// security features present and a confident face.
    pub fn clean() -> Self {
        let mut responses = HashMap::new();
        responses.insert(SignalFamily::Tamper, serde_json::json!({ "tamperIndicators": [] }));
        responses.insert(
            SignalFamily::Ocr,
            serde_json::json!({ "ocrZones": [{ "text": "SPECIMEN", "confidence": 0.96 }] }),
        );
        responses.insert(
            SignalFamily::Metadata,
            serde_json::json!({
                "documentQuality": "GOOD",
                "hasSecurityFeatures": true,
                "securityFeatures": ["HOLOGRAM", "MICROPRINT"],
            }),
        );
        responses.insert(
            SignalFamily::Biometric,
            serde_json::json!({ "hasFaceImage": true, "faceConfidence": 0.97 }),
        );
        Self { responses }
    }

    /// Replace the answer for one family.
    #[must_use]
    pub fn with(mut self, family: SignalFamily, response: serde_json::Value) -> Self {
        self.responses.insert(family, response);
        self
    }
}

#[async_trait]
impl AnalysisCapability for StaticAnalysis {
    async fn analyze(
        &self,
        _image: &[u8],
        _class: DocumentClass,
        family: SignalFamily,
    ) -> Result<serde_json::Value, CapabilityError> {
        self.responses
            .get(&family)
            .cloned()
            .ok_or_else(|| CapabilityError::Malformed {
                message: format!("no response configured for {family}"),
            })
    }
}

#[derive(Debug, Clone)]
struct LedgerRecord {
    owner: String,
    document_id: String,
    payload: serde_json::Value,
}

/// Ledger that records writes in a map.
#[derive(Debug)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<String, LedgerRecord>>,
    confirm_immediately: AtomicBool,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Ledger that confirms every write immediately.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            confirm_immediately: AtomicBool::new(true),
        }
    }

    /// Whether new writes are reported confirmed.
    pub fn set_confirm_immediately(&self, confirm: bool) {
        self.confirm_immediately.store(confirm, Ordering::SeqCst);
    }

    /// Move a reference to another owner, as a token transfer would.
    pub fn transfer(&self, reference: &str, new_owner: &str) -> bool {
        let Ok(mut records) = self.records.write() else {
            return false;
        };
        match records.get_mut(reference) {
            Some(record) => {
                record.owner = new_owner.to_string();
                true
            },
            None => false,
        }
    }

    /// Payload recorded for a reference.
    pub fn payload(&self, reference: &str) -> Option<serde_json::Value> {
        self.records
            .read()
            .ok()?
            .get(reference)
            .map(|r| r.payload.clone())
    }

    /// Number of records written for one document.
    pub fn records_for(&self, document_id: &str) -> usize {
        self.records
            .read()
            .map(|r| r.values().filter(|rec| rec.document_id == document_id).count())
            .unwrap_or(0)
    }

    /// Number of ledger writes.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(
        &self,
        prefix: &str,
        owner: &str,
        document_id: &str,
        payload: serde_json::Value,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        let reference = format!("{prefix}_{}", uuid::Uuid::new_v4().simple());
        self.records
            .write()
            .map_err(|_| DocVerifyError::poisoned("in-memory ledger"))?
            .insert(
                reference.clone(),
                LedgerRecord {
                    owner: owner.to_string(),
                    document_id: document_id.to_string(),
                    payload,
                },
            );
        debug!(%reference, owner, "InMemoryLedger: recorded");
        Ok(LedgerReceipt {
            reference,
            confirmed: self.confirm_immediately.load(Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn attest(
        &self,
        schema_id: &str,
        issuer: &str,
        holder: &str,
        attestation: &SignedAttestation,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        self.record(
            "att",
            holder,
            &attestation.payload.document_id,
            serde_json::json!({ "schema": schema_id, "issuer": issuer, "data": attestation }),
        )
    }

    async fn mint_token(
        &self,
        metadata: &TokenMetadata,
        owner: &str,
    ) -> Result<LedgerReceipt, DocVerifyError> {
        self.record(
            "tok",
            owner,
            &metadata.attributes.document_id,
            serde_json::to_value(metadata)?,
        )
    }

    async fn find_by_document(
        &self,
        document_id: &str,
    ) -> Result<Option<LedgerReceipt>, DocVerifyError> {
        let confirmed = self.confirm_immediately.load(Ordering::SeqCst);
        Ok(self
            .records
            .read()
            .map_err(|_| DocVerifyError::poisoned("in-memory ledger"))?
            .iter()
            .find(|(_, r)| r.document_id == document_id)
            .map(|(reference, _)| LedgerReceipt {
                reference: reference.clone(),
                confirmed,
            }))
    }

    async fn verify_ownership(&self, reference: &str, owner: &str) -> Result<bool, DocVerifyError> {
        Ok(self
            .records
            .read()
            .map_err(|_| DocVerifyError::poisoned("in-memory ledger"))?
            .get(reference)
            .is_some_and(|r| r.owner == owner))
    }

    async fn is_confirmed(&self, reference: &str) -> Result<bool, DocVerifyError> {
        Ok(self
            .records
            .read()
            .map_err(|_| DocVerifyError::poisoned("in-memory ledger"))?
            .contains_key(reference))
    }
}

/// Archive that keeps sealed blobs and their tags in a map.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    blobs: RwLock<HashMap<String, (Vec<u8>, ProvenanceTags)>>,
}

impl InMemoryArchive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags stored with a blob.
    pub fn tags(&self, locator: &str) -> Option<ProvenanceTags> {
        self.blobs.read().ok()?.get(locator).map(|(_, t)| t.clone())
    }

    /// Overwrite a stored blob. Lets tests simulate archive corruption.
    pub fn corrupt(&self, locator: &str, bytes: Vec<u8>) -> bool {
        let Ok(mut blobs) = self.blobs.write() else {
            return false;
        };
        match blobs.get_mut(locator) {
            Some(entry) => {
                entry.0 = bytes;
                true
            },
            None => false,
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    async fn put(&self, sealed: &[u8], tags: &ProvenanceTags) -> Result<String, DocVerifyError> {
        let locator = format!("ar://{}", uuid::Uuid::new_v4().simple());
        self.blobs
            .write()
            .map_err(|_| DocVerifyError::poisoned("in-memory archive"))?
            .insert(locator.clone(), (sealed.to_vec(), tags.clone()));
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, DocVerifyError> {
        self.blobs
            .read()
            .map_err(|_| DocVerifyError::poisoned("in-memory archive"))?
            .get(locator)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| DocVerifyError::not_found("archive blob", locator))
    }
}
