//! Cryptographic error types.

use thiserror::Error;

use crate::types::CryptoKind;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature format or length.
    #[error("Invalid signature: {reason}")]
    InvalidSignature {
        /// Reason the signature is invalid.
        reason: String,
    },

    /// Signature verification failed.
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Invalid public key format or length.
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Invalid private key format or length.
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Signing operation failed.
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Sealing (authenticated encryption) failed.
    #[error("Sealing failed: {reason}")]
    SealFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Opening a sealed blob failed: wrong key, wrong context or tampered data.
    #[error("Failed to open sealed data (wrong key or tampered ciphertext)")]
    OpenFailed,

    /// Sealed data is shorter than the nonce it must start with.
    #[error("Sealed data too short: {len} bytes")]
    SealedDataTooShort {
        /// Length of the rejected blob.
        len: usize,
    },

    /// Crypto kind mismatch.
    #[error("Crypto kind mismatch: expected {expected:?}, got {actual:?}")]
    CryptoKindMismatch {
        /// Expected crypto kind.
        expected: CryptoKind,
        /// Actual crypto kind.
        actual: CryptoKind,
    },
}

impl CryptoError {
    /// Create an invalid signature error.
    #[must_use]
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Create an invalid public key error.
    #[must_use]
    pub fn invalid_public_key(reason: impl Into<String>) -> Self {
        Self::InvalidPublicKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid private key error.
    #[must_use]
    pub fn invalid_private_key(reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey {
            reason: reason.into(),
        }
    }

    /// Create a signing failed error.
    #[must_use]
    pub fn signing_failed(reason: impl Into<String>) -> Self {
        Self::SigningFailed {
            reason: reason.into(),
        }
    }

    /// Create a seal failed error.
    #[must_use]
    pub fn seal_failed(reason: impl Into<String>) -> Self {
        Self::SealFailed {
            reason: reason.into(),
        }
    }
}
