//! # docverify-core
//!
//! Core verification logic for DocVerify: forensic scoring of identity
//! and property documents, the approval state machine, ledger issuance
//! with an encrypted archive copy, and time-bounded sharing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   VerificationEngine                         │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Fingerprint  │  │ ForensicCache│  │ RawSignal    │      │
//! │  │ (SHA-256)    │  │ (single-     │  │ Collector    │      │
//! │  │              │  │  flight, TTL)│  │ (4-way fan)  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              ComplianceScorer                     │      │
//! │  │     (six sub-scores, 85 / 70 cut points)         │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              DecisionEngine                       │      │
//! │  │   (APPROVED / UNDER_REVIEW / REJECTED, biometric) │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              IssuancePipeline                     │      │
//! │  │   (attest or mint, then sealed archive copy)     │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                                                              │
//! │  PermissionLedger ─── AuditTrail (hash-chained, JSONL)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Properties
//!
//! - **Deterministic scoring**: identical signals always give the same report
//! - **Duplicate precedence**: a biometric match against another owner forces review
//! - **Exactly once**: at most one ledger write and one archive copy per document
//! - **Tamper-evident audit**: every state change is hash-chained

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod audit;
pub mod batch;
pub mod biometric;
pub mod cache;
pub mod collector;
pub mod config;
pub mod decision;
pub mod document;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod issuance;
pub mod memory;
pub mod permissions;
pub mod retry;
pub mod scoring;
pub mod signals;
pub mod types;

pub use batch::{BatchHandle, BatchItemResult, BatchProgress, BatchReport, BatchStatus};
pub use biometric::{biometric_hash, BiometricMatch, BiometricRegistry};
pub use cache::{CacheOutcome, CacheStats, CacheStore, ForensicCache, MemoryCacheStore};
pub use collector::{AnalysisCapability, CapabilityError, RawSignalCollector};
pub use config::PipelineConfig;
pub use decision::{Decision, DecisionEngine, DecisionState, ReviewAction, ReviewRequest};
pub use document::{Document, DocumentStore, ReportStore};
pub use engine::{
    EnginePorts, ReviewOutcome, ReviewQueueItem, SubmissionOutcome, SubmissionRequest,
    VerificationEngine,
};
pub use error::{DocVerifyError, ExternalSystem};
pub use fingerprint::ContentFingerprint;
pub use issuance::{
    ArchiveStore, AttestationPayload, IssuancePipeline, IssuanceResult, IssuanceStatus,
    IssuanceVerification, LedgerClient, LedgerReceipt, ProvenanceTags, SignedAttestation,
    TokenAttributes, TokenMetadata,
};
pub use memory::{InMemoryArchive, InMemoryLedger, StaticAnalysis};
pub use permissions::{GrantOutcome, GrantRequest, Permission, PermissionLedger};
pub use retry::RetryPolicy;
pub use scoring::{
    ComplianceScore, ComplianceScorer, ForensicReport, RecommendedAction, RemediationGuidance,
    ScoreThresholds, ScoreWeights, SubScores, TamperRisk,
};
pub use signals::{RawSignals, SignalFamily};
pub use types::{AccessType, Actor, ActorRole, DocumentClass, IssuanceKind, LifecycleStatus};

// Audit trail verification
pub use audit::{
    read_audit_from_jsonl, verify_audit_jsonl, AuditEntry, AuditEventKind, AuditRecord,
    AuditTrail, AuditVerificationResult, AuditVerifier, ChainSummary,
};
