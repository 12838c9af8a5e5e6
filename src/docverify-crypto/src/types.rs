//! Cryptographic types shared by sealing and issuer signatures.

use serde::{Deserialize, Serialize};

/// Four-character code identifying a cryptographic system.
///
/// Every signature and sealed envelope is tagged so the scheme can be
/// rotated without ambiguity about how old records were produced.
pub type CryptoKind = [u8; 4];

/// DocVerify issuer signatures and archive sealing, v1.
///
/// Ed25519 signatures, XChaCha20-Poly1305 sealing with SHA-256 key derivation.
pub const CRYPTO_KIND_DOCVERIFY_V1: CryptoKind = *b"DVS1";

/// Signature algorithm used by an issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// Ed25519 Edwards curve.
    Ed25519 = 2,
}

impl SignatureAlgorithm {
    /// OID for this algorithm.
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::Ed25519 => "1.3.101.112",
        }
    }

    /// Expected signature size in bytes.
    #[must_use]
    pub const fn signature_size(&self) -> usize {
        match self {
            Self::Ed25519 => 64,
        }
    }

    /// Expected public key size in bytes.
    #[must_use]
    pub const fn public_key_size(&self) -> usize {
        match self {
            Self::Ed25519 => 32,
        }
    }
}

/// A signature tagged with the system and algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSignature {
    /// Crypto system identifier.
    pub crypto_kind: CryptoKind,

    /// Algorithm used for this signature.
    pub algorithm: SignatureAlgorithm,

    /// Raw signature bytes.
    pub signature: Vec<u8>,

    /// Public key that can verify this signature.
    pub public_key: Vec<u8>,
}
