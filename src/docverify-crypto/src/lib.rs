//! # docverify-crypto
//!
//! Cryptographic primitives for DocVerify issuance.
//!
//! - **Sealing**: XChaCha20-Poly1305 with per-document keys, used for the
//!   encrypted archive copy of every issued document.
//! - **Issuer signatures**: Ed25519 over canonical attestation payloads.
//!
//! ## Sealed layout
//!
//! ```text
//! key    = SHA-256(master_key || 0x00 || document_id)
//! sealed = nonce(24) || XChaCha20-Poly1305(key, nonce, plaintext, aad = document_id)
//! ```
//!
//! ## CryptoKind Pattern
//!
//! Signatures are tagged with their system so records stay verifiable
//! across algorithm rotations:
//!
//! ```rust,ignore
//! pub const CRYPTO_KIND_DOCVERIFY_V1: CryptoKind = *b"DVS1";
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod seal;
mod signer;
mod types;

#[cfg(feature = "ed25519")]
mod ed25519;

pub use error::CryptoError;
pub use seal::{DocumentSealer, NONCE_SIZE};
pub use signer::{IssuerSigner, IssuerVerifier};
pub use types::{CryptoKind, IssuerSignature, SignatureAlgorithm, CRYPTO_KIND_DOCVERIFY_V1};

#[cfg(feature = "ed25519")]
pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// The length check still returns early; length is not secret for the
/// fingerprints and hashes compared here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
