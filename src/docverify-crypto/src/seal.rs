//! Authenticated sealing for archived documents.
//!
//! Uses XChaCha20-Poly1305 AEAD. Each document is sealed under its own key,
//! derived from a master secret and a context string (the document id), and
//! the context is bound as associated data so a blob cannot be replayed
//! under another document.
//!
//! Sealed layout: `nonce (24 bytes) || ciphertext`.

// Allow deprecated from_slice until chacha20poly1305 upgrades to generic-array 1.x
#![allow(deprecated)]

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{trace, warn};

use crate::error::CryptoError;

/// XChaCha20-Poly1305 nonce size (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Domain separator for master key derivation.
const MASTER_KEY_DOMAIN: &[u8] = b"docverify-archive-key:";

/// Seals and opens document bytes under per-context keys.
pub struct DocumentSealer {
    /// Master key derived from the configured secret.
    master_key: [u8; 32],
}

impl DocumentSealer {
    /// Create a sealer from a master secret of any length.
    pub fn new(master_secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(MASTER_KEY_DOMAIN);
        hasher.update(master_secret);
        Self {
            master_key: hasher.finalize().into(),
        }
    }

    /// Derive the key used for one context.
    fn context_key(&self, context: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.master_key);
        hasher.update([0u8]);
        hasher.update(context.as_bytes());
        hasher.finalize().into()
    }

    /// Seal plaintext for `context`.
    ///
    /// Returns nonce || ciphertext.
    pub fn seal(&self, context: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let key = self.context_key(context);
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::seal_failed(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::seal_failed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        trace!(
            plaintext_len = plaintext.len(),
            sealed_len = sealed.len(),
            "Seal: sealed data"
        );

        Ok(sealed)
    }

    /// Open a blob previously sealed for `context`.
    pub fn open(&self, context: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            warn!(sealed_len = sealed.len(), "Seal: data too short to contain nonce");
            return Err(CryptoError::SealedDataTooShort { len: sealed.len() });
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        let key = self.context_key(context);
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::seal_failed(e.to_string()))?;

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| {
                warn!(context = %context, "Seal: open failed (possible tampering)");
                CryptoError::OpenFailed
            })?;

        trace!(
            sealed_len = sealed.len(),
            plaintext_len = plaintext.len(),
            "Seal: opened data"
        );

        Ok(plaintext)
    }
}

impl std::fmt::Debug for DocumentSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSealer").finish_non_exhaustive()
    }
}
