//! Issuer signing traits.
//!
//! Attestations are issuer-signed statements about a holder. The ledger
//! stores them opaquely, so the signature travels inside the payload as an
//! [`IssuerSignature`] that any verifier can check offline.

use crate::error::CryptoError;
use crate::types::{IssuerSignature, SignatureAlgorithm, CRYPTO_KIND_DOCVERIFY_V1};

/// Trait for issuer signing operations.
pub trait IssuerSigner: Send + Sync {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the public key.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the raw signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return a tagged signature carrying the public key.
    fn sign_tagged(&self, data: &[u8]) -> Result<IssuerSignature, CryptoError> {
        Ok(IssuerSignature {
            crypto_kind: CRYPTO_KIND_DOCVERIFY_V1,
            algorithm: self.algorithm(),
            signature: self.sign(data)?,
            public_key: self.public_key()?,
        })
    }
}

/// Trait for issuer signature verification.
pub trait IssuerVerifier: Send + Sync {
    /// Algorithm this verifier accepts.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Verify a signature against a public key.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;

    /// Verify a tagged signature, rejecting foreign crypto kinds.
    fn verify_tagged(&self, data: &[u8], tagged: &IssuerSignature) -> Result<bool, CryptoError> {
        if tagged.crypto_kind != CRYPTO_KIND_DOCVERIFY_V1 {
            return Err(CryptoError::CryptoKindMismatch {
                expected: CRYPTO_KIND_DOCVERIFY_V1,
                actual: tagged.crypto_kind,
            });
        }
        if tagged.algorithm != self.algorithm() {
            return Ok(false);
        }
        self.verify(&tagged.public_key, data, &tagged.signature)
    }
}
