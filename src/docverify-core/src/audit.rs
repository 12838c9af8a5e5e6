//! Append-only, hash-chained audit trail.
//!
//! Every state transition and access decision is recorded as an
//! [`AuditEntry`]. Each entry carries the hash of its predecessor
//! ("genesis" for the first) and its own SHA-256 over a canonical JSON
//! form, so any edit, deletion or reordering is detectable by
//! [`AuditVerifier`].
//!
//! The trail keeps a bounded tail of recent entries in memory and can
//! additionally be mirrored to a JSONL file, one entry per line. The file
//! holds the full chain; the in-memory tail is anchored on the hash of the
//! last entry it dropped.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use crate::error::DocVerifyError;

const GENESIS: &str = "genesis";

/// Entries kept in memory unless configured otherwise.
pub const DEFAULT_RETAINED_ENTRIES: usize = 100_000;

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    /// A new document was created from an upload.
    DocumentSubmitted,
    /// An upload resolved to the owner's existing document.
    DocumentResubmitted,
    /// Document lifecycle status changed.
    LifecycleChanged,
    /// A forensic report version was produced.
    ReportGenerated,
    /// Decision made automatically from a report.
    DecisionMade,
    /// Reviewer resolved an UNDER_REVIEW decision.
    ReviewResolved,
    /// Ledger attestation or token recorded.
    LedgerIssued,
    /// Ledger write failed; document stays VERIFIED.
    LedgerFailed,
    /// Encrypted copy archived.
    ArchiveStored,
    /// Archive write failed after the ledger succeeded.
    ArchiveFailed,
    /// Archived copy retrieved and checked.
    ArchiveRetrieved,
    /// Ledger ownership verified.
    IssuanceVerified,
    /// Access granted.
    PermissionGranted,
    /// Access revoked (or revoke of an already revoked grant).
    PermissionRevoked,
    /// Expired grants deactivated.
    PermissionsExpired,
    /// Access check answered.
    AccessChecked,
    /// Document logically deleted by its owner.
    DocumentTombstoned,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// Input for one audit append.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    kind: AuditEventKind,
    actor_id: String,
    document_id: Option<String>,
    payload: serde_json::Value,
}

impl AuditRecord {
    /// Start a record.
    pub fn new(kind: AuditEventKind, actor_id: impl Into<String>) -> Self {
        Self {
            kind,
            actor_id: actor_id.into(),
            document_id: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Attach the document the event concerns.
    #[must_use]
    pub fn document(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A single chained audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique event id (`evt_…`).
    pub event_id: String,
    /// RFC 3339 timestamp.
    pub event_timestamp: String,
    /// Event kind.
    pub event_type: AuditEventKind,
    /// Identity that caused the event.
    pub actor_id: String,
    /// Document the event concerns.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Event details as a JSON string.
    #[serde(default)]
    pub event_payload: String,
    /// Position in the chain, starting at 1.
    pub sequence_number: u64,
    /// Hash of the previous entry or "genesis".
    pub previous_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Compute the expected hash for this entry.
    ///
    /// Creates a canonical JSON representation and computes SHA-256.
    pub fn compute_hash(&self) -> String {
        let canonical = serde_json::json!({
            "event_id": self.event_id,
            "event_timestamp": self.event_timestamp,
            "event_type": self.event_type,
            "actor_id": self.actor_id,
            "document_id": self.document_id,
            "event_payload": self.event_payload,
            "sequence_number": self.sequence_number,
            "previous_hash": self.previous_hash,
        });

        let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical_json.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's hash is correct.
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.entry_hash
    }

    /// Parsed payload.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_str(&self.event_payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Result of audit trail verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerificationResult {
    /// Whether the audit trail is valid.
    pub valid: bool,
    /// Total entries in the audit log.
    pub total_entries: u64,
    /// Whether the hash chain is intact.
    pub hash_chain_valid: bool,
    /// Whether sequence numbers are contiguous.
    pub sequence_valid: bool,
    /// Whether genesis entry is properly formed.
    pub genesis_valid: bool,
    /// First tampered sequence number (if any).
    pub first_tampered_sequence: Option<u64>,
    /// List of errors found.
    pub errors: Vec<String>,
    /// Verification time in milliseconds.
    pub verification_time_ms: u64,
    /// Chain summary.
    pub chain_summary: Option<ChainSummary>,
}

/// Summary of the audit chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Sequence range [min, max].
    pub sequence_range: (u64, u64),
    /// Current hash value.
    pub current_hash: String,
    /// Timestamp of oldest entry.
    pub oldest_entry: Option<String>,
    /// Timestamp of newest entry.
    pub newest_entry: Option<String>,
}

/// Audit chain verifier.
///
/// Checks, in order:
/// 1. Genesis validity (first entry has "genesis" as previous_hash)
/// 2. Sequence continuity
/// 3. Hash chain continuity (each entry links to previous)
/// 4. Hash validity (each entry's hash matches computed hash)
#[derive(Debug, Default)]
pub struct AuditVerifier;

impl AuditVerifier {
    /// Create a verifier.
    pub fn new() -> Self {
        Self
    }

    /// Verify a complete chain, given in sequence order.
    pub fn verify_entries(&self, entries: &[AuditEntry]) -> AuditVerificationResult {
        self.verify_tail(entries, GENESIS)
    }

    /// Verify the tail of a chain whose first entry links to `anchor_hash`.
    ///
    /// With the "genesis" anchor the first entry must also have sequence 1.
    #[instrument(skip(self, entries), fields(entry_count = entries.len()))]
    pub fn verify_tail(&self, entries: &[AuditEntry], anchor_hash: &str) -> AuditVerificationResult {
        let start = std::time::Instant::now();
        let mut errors = Vec::new();
        let mut first_tampered: Option<u64> = None;
        fn mark(seq: u64, first: &mut Option<u64>) {
            first.get_or_insert(seq);
        }

        let Some(first) = entries.first() else {
            return AuditVerificationResult {
                valid: true,
                total_entries: 0,
                hash_chain_valid: true,
                sequence_valid: true,
                genesis_valid: true,
                first_tampered_sequence: None,
                errors: vec![],
                verification_time_ms: start.elapsed().as_millis() as u64,
                chain_summary: None,
            };
        };

        let genesis_valid = first.previous_hash == anchor_hash
            && (anchor_hash != GENESIS || first.sequence_number == 1);
        if !genesis_valid {
            errors.push(format!(
                "Invalid anchor: first entry has sequence {} and previous_hash='{}', expected '{}'",
                first.sequence_number, first.previous_hash, anchor_hash
            ));
            mark(first.sequence_number, &mut first_tampered);
        }

        let mut hash_chain_valid = true;
        let mut sequence_valid = true;
        let mut previous_hash = anchor_hash.to_string();
        let mut expected_seq = first.sequence_number;

        for entry in entries {
            if entry.sequence_number != expected_seq {
                errors.push(format!(
                    "Sequence gap: expected {}, got {}",
                    expected_seq, entry.sequence_number
                ));
                sequence_valid = false;
                mark(entry.sequence_number, &mut first_tampered);
            }

            if entry.previous_hash != previous_hash {
                errors.push(format!(
                    "Hash chain break at sequence {}: expected previous_hash='{}', got '{}'",
                    entry.sequence_number, previous_hash, entry.previous_hash
                ));
                hash_chain_valid = false;
                mark(entry.sequence_number, &mut first_tampered);
            }

            if !entry.verify_hash() {
                errors.push(format!(
                    "Hash mismatch at sequence {}: computed='{}', stored='{}'",
                    entry.sequence_number,
                    entry.compute_hash(),
                    entry.entry_hash
                ));
                hash_chain_valid = false;
                mark(entry.sequence_number, &mut first_tampered);
            }

            previous_hash = entry.entry_hash.clone();
            expected_seq = entry.sequence_number.saturating_add(1);
        }

        let total_entries = entries.len() as u64;
        let last = entries.last().unwrap_or(first);
        let chain_summary = Some(ChainSummary {
            sequence_range: (first.sequence_number, last.sequence_number),
            current_hash: last.entry_hash.clone(),
            oldest_entry: Some(first.event_timestamp.clone()),
            newest_entry: Some(last.event_timestamp.clone()),
        });

        let valid = hash_chain_valid && sequence_valid && genesis_valid && errors.is_empty();
        if valid {
            info!(entries = total_entries, "Audit: verification passed");
        } else {
            warn!(
                entries = total_entries,
                errors = errors.len(),
                first_tampered = ?first_tampered,
                "Audit: verification FAILED"
            );
        }

        AuditVerificationResult {
            valid,
            total_entries,
            hash_chain_valid,
            sequence_valid,
            genesis_valid,
            first_tampered_sequence: first_tampered,
            errors,
            verification_time_ms: start.elapsed().as_millis() as u64,
            chain_summary,
        }
    }
}

#[derive(Debug)]
struct TrailState {
    entries: VecDeque<AuditEntry>,
    head_hash: String,
    next_sequence: u64,
    /// `previous_hash` of the oldest retained entry.
    anchor_hash: String,
    retained: usize,
}

impl TrailState {
    fn empty() -> Self {
        Self {
            entries: VecDeque::new(),
            head_hash: GENESIS.to_string(),
            next_sequence: 1,
            anchor_hash: GENESIS.to_string(),
            retained: DEFAULT_RETAINED_ENTRIES,
        }
    }

    fn trim(&mut self) {
        while self.entries.len() > self.retained {
            if let Some(dropped) = self.entries.pop_front() {
                self.anchor_hash = dropped.entry_hash;
            }
        }
    }
}

/// The live audit trail.
///
/// Appends are serialised by the state mutex so sequence numbers and hash
/// links are gap-free. The file sink has its own mutex, taken before the
/// state lock is released so lines land in sequence order, and written
/// after it. Neither mutex is held across an await.
#[derive(Debug)]
pub struct AuditTrail {
    state: Mutex<TrailState>,
    sink: Option<Mutex<File>>,
    path: Option<PathBuf>,
    write_failures: AtomicU64,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail {
    /// In-memory trail.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrailState::empty()),
            sink: None,
            path: None,
            write_failures: AtomicU64::new(0),
        }
    }

    /// Keep at most `limit` entries in memory (at least one).
    #[must_use]
    pub fn with_retained_entries(mut self, limit: usize) -> Self {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.retained = limit.max(1);
        state.trim();
        self
    }

    /// Trail mirrored to a JSONL file.
    ///
    /// Existing entries in the file are loaded and verified first; the
    /// chain continues from them. A file that fails verification is
    /// refused.
    pub fn with_jsonl(path: impl AsRef<Path>) -> Result<Self, DocVerifyError> {
        let path = path.as_ref().to_path_buf();
        let existing = if path.exists() {
            read_audit_from_jsonl(&path)?
        } else {
            Vec::new()
        };
        let result = AuditVerifier::new().verify_entries(&existing);
        if !result.valid {
            return Err(DocVerifyError::Audit {
                message: format!(
                    "existing audit file {} failed verification at sequence {:?}",
                    path.display(),
                    result.first_tampered_sequence
                ),
            });
        }

        let sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DocVerifyError::Audit {
                message: format!("cannot open {}: {e}", path.display()),
            })?;

        info!(path = %path.display(), resumed = existing.len(), "Audit: JSONL sink opened");

        let mut state = TrailState::empty();
        if let Some(last) = existing.last() {
            state.head_hash = last.entry_hash.clone();
            state.next_sequence = last.sequence_number.saturating_add(1);
        }
        state.entries = existing.into();
        state.trim();

        Ok(Self {
            state: Mutex::new(state),
            sink: Some(Mutex::new(sink)),
            path: Some(path),
            write_failures: AtomicU64::new(0),
        })
    }

    /// Append one record and return the chained entry.
    ///
    /// The in-memory append cannot fail. A failed file write is logged and
    /// counted in [`write_failures`](Self::write_failures).
    pub fn append(&self, record: AuditRecord) -> AuditEntry {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut entry = AuditEntry {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event_type: record.kind,
            actor_id: record.actor_id,
            document_id: record.document_id,
            event_payload: if record.payload.is_null() {
                String::new()
            } else {
                serde_json::to_string(&record.payload).unwrap_or_default()
            },
            sequence_number: state.next_sequence,
            previous_hash: state.head_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();

        state.next_sequence = state.next_sequence.saturating_add(1);
        state.head_hash = entry.entry_hash.clone();
        state.entries.push_back(entry.clone());
        state.trim();

        let sink = self.sink.as_ref().map(|sink| match sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        });
        drop(state);

        if let Some(mut sink) = sink {
            let written = serde_json::to_string(&entry)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(sink, "{line}"));
            if let Err(e) = written {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    sequence = entry.sequence_number,
                    path = ?self.path,
                    "Audit: JSONL write failed: {}",
                    e
                );
            }
        }
        entry
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.state
            .lock()
            .map(|s| s.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries concerning one document, oldest first.
    pub fn entries_for(&self, document_id: &str) -> Vec<AuditEntry> {
        self.state
            .lock()
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|e| e.document_id.as_deref() == Some(document_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Whether the trail is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries that could not be written to the JSONL file.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Sequence number the next entry will get.
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().map(|s| s.next_sequence).unwrap_or(1)
    }

    /// Verify the retained tail against the hash it is anchored on.
    pub fn verify(&self) -> AuditVerificationResult {
        let (entries, anchor) = match self.state.lock() {
            Ok(s) => (s.entries.iter().cloned().collect::<Vec<_>>(), s.anchor_hash.clone()),
            Err(_) => (Vec::new(), GENESIS.to_string()),
        };
        AuditVerifier::new().verify_tail(&entries, &anchor)
    }
}

/// Read entries from a JSONL file. Blank lines are skipped.
pub fn read_audit_from_jsonl(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, DocVerifyError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DocVerifyError::Audit {
        message: format!("cannot open {}: {e}", path.display()),
    })?;

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| DocVerifyError::Audit {
            message: format!("read error in {} at line {}: {e}", path.display(), index + 1),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| DocVerifyError::Audit {
            message: format!("malformed entry in {} at line {}: {e}", path.display(), index + 1),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Read and verify a JSONL audit file.
pub fn verify_audit_jsonl(path: impl AsRef<Path>) -> Result<AuditVerificationResult, DocVerifyError> {
    let entries = read_audit_from_jsonl(path)?;
    Ok(AuditVerifier::new().verify_entries(&entries))
}
