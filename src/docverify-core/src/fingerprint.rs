//! Content fingerprints.
//!
//! A fingerprint is the SHA-256 of the raw uploaded bytes. It keys the
//! forensic cache and the per-owner dedup index, and is immutable once a
//! document carries it.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DocVerifyError;

/// SHA-256 digest of document bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    /// Fingerprint raw bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Parse a lowercase or uppercase hex fingerprint.
    pub fn from_hex(s: &str) -> Result<Self, DocVerifyError> {
        let bytes = hex::decode(s)
            .map_err(|e| DocVerifyError::validation(format!("invalid fingerprint hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            DocVerifyError::validation(format!("fingerprint must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }

    /// Lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check, in constant time, whether `bytes` hash to this fingerprint.
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        docverify_crypto::constant_time_eq(&self.0, Self::of(bytes).as_bytes())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({}…)", &self.to_hex()[..12])
    }
}

impl TryFrom<String> for ContentFingerprint {
    type Error = DocVerifyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentFingerprint> for String {
    fn from(fp: ContentFingerprint) -> Self {
        fp.to_hex()
    }
}
