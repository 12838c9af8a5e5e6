//! Error types for document verification operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External system a transient failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalSystem {
    /// Multimodal analysis capability.
    Analysis,
    /// Distributed ledger client.
    Ledger,
    /// Permanent archive store.
    Archive,
}

impl fmt::Display for ExternalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Ledger => write!(f, "ledger"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Errors that can occur while verifying, issuing or sharing documents.
#[derive(Debug, Error)]
pub enum DocVerifyError {
    /// Bad input. Never retried.
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("document", "permission", ...).
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// Requester does not own the document.
    #[error("Requester {requester_id} does not own document {document_id}")]
    NotOwner {
        /// Document the operation targeted.
        document_id: String,
        /// Identity that attempted the operation.
        requester_id: String,
    },

    /// No authenticated identity was supplied.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Authenticated, but not allowed to perform this action.
    #[error("Actor {actor_id} is not allowed to {action}")]
    Forbidden {
        /// Identity that attempted the action.
        actor_id: String,
        /// Action that was refused.
        action: &'static str,
    },

    /// Timeout or transport failure against an external system.
    #[error("Transient {system} failure during {stage}: {message}")]
    TransientExternal {
        /// System that failed.
        system: ExternalSystem,
        /// Pipeline stage ("attest", "archive_put", ...).
        stage: &'static str,
        /// Document involved, if known.
        document_id: Option<String>,
        /// Underlying error message.
        message: String,
    },

    /// State machine violation.
    #[error("Invalid transition for {subject}: {current} -> {requested}")]
    InvalidTransition {
        /// Document or decision the transition was attempted on.
        subject: String,
        /// State the subject is in.
        current: String,
        /// State that was requested.
        requested: String,
    },

    /// Optimistic version check lost against a concurrent writer.
    #[error("Stale state for document {document_id}: expected version {expected}, found {actual}")]
    StaleState {
        /// Document that changed underneath the caller.
        document_id: String,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Archived copy does not match the document it claims to be.
    #[error("Integrity check failed for document {document_id}: {reason}")]
    IntegrityMismatch {
        /// Document whose archive copy failed the check.
        document_id: String,
        /// What did not match.
        reason: String,
    },

    /// Audit persistence or parsing error.
    #[error("Audit error: {message}")]
    Audit {
        /// Error message.
        message: String,
    },

    /// Internal invariant failure, such as a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] docverify_crypto::CryptoError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocVerifyError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an internal error for a poisoned lock.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal {
            message: format!("{what} lock poisoned"),
        }
    }

    /// Create a transient external error.
    pub fn transient(
        system: ExternalSystem,
        stage: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::TransientExternal {
            system,
            stage,
            document_id: None,
            message: message.into(),
        }
    }

    /// Attach a document id to a transient error that lacks one.
    #[must_use]
    pub fn for_document(self, id: &str) -> Self {
        match self {
            Self::TransientExternal {
                system,
                stage,
                document_id: None,
                message,
            } => Self::TransientExternal {
                system,
                stage,
                document_id: Some(id.to_string()),
                message,
            },
            other => other,
        }
    }

    /// Check if this error may succeed when retried with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. })
    }

    /// Check if this error is an authorization failure.
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::NotOwner { .. } | Self::NotAuthenticated | Self::Forbidden { .. }
        )
    }

    /// Check if this error is caused by the caller's input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }

    /// Check if this error is a lost race or state machine violation.
    ///
    /// The caller should re-read the document before trying again.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::StaleState { .. }
        )
    }
}
