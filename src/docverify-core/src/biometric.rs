//! Biometric duplicate detection.
//!
//! A face found on an identity document is reduced to a SHA-256 hash of its
//! descriptor. The registry binds each hash to the first owner it was seen
//! for; the same face appearing under another owner is a fraud signal that
//! forces human review.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::signals::BiometricSignals;

/// Hash a biometric descriptor.
///
/// Returns `None` when no face was detected. Without an explicit descriptor
/// the hash falls back to the face confidence and quality, which is a much
/// weaker identifier.
pub fn biometric_hash(signals: &BiometricSignals) -> Option<String> {
    if !signals.has_face_image {
        return None;
    }
    let canonical = match &signals.descriptor {
        Some(descriptor) => serde_json::json!({ "descriptor": descriptor }),
        None => serde_json::json!({
            "faceConfidence": signals.face_confidence,
            "quality": signals.face_quality,
        }),
    };
    let canonical_json = serde_json::to_string(&canonical).ok()?;
    Some(hex::encode(Sha256::digest(canonical_json.as_bytes())))
}

/// A biometric hash already bound to a different owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricMatch {
    /// Owner the hash is bound to.
    pub matched_owner_id: String,
    /// Confidence that both faces are the same person, in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone)]
struct Enrollment {
    owner_id: String,
    face_confidence: f64,
    enrolled_at: DateTime<Utc>,
}

/// Registry of enrolled biometric hashes.
#[derive(Debug, Default)]
pub struct BiometricRegistry {
    enrolled: RwLock<HashMap<String, Enrollment>>,
}

impl BiometricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an enrollment of `hash` under an owner other than `owner_id`.
    ///
    /// The match confidence is the weaker of the two face confidences.
    pub fn find_conflict(
        &self,
        hash: &str,
        owner_id: &str,
        face_confidence: f64,
    ) -> Option<BiometricMatch> {
        let enrolled = self.enrolled.read().ok()?;
        let existing = enrolled.get(hash)?;
        if existing.owner_id == owner_id {
            return None;
        }
        let confidence = existing.face_confidence.min(face_confidence);
        warn!(
            owner = %owner_id,
            matched_owner = %existing.owner_id,
            confidence,
            enrolled_at = %existing.enrolled_at,
            "Biometric: hash already enrolled to another owner"
        );
        Some(BiometricMatch {
            matched_owner_id: existing.owner_id.clone(),
            confidence,
        })
    }

    /// Bind `hash` to `owner_id` unless another owner holds it.
    ///
    /// Returns `true` if the hash is now bound to `owner_id`.
    pub fn enroll(&self, hash: &str, owner_id: &str, face_confidence: f64) -> bool {
        let Ok(mut enrolled) = self.enrolled.write() else {
            return false;
        };
        match enrolled.get(hash) {
            Some(existing) => existing.owner_id == owner_id,
            None => {
                enrolled.insert(
                    hash.to_string(),
                    Enrollment {
                        owner_id: owner_id.to_string(),
                        face_confidence,
                        enrolled_at: Utc::now(),
                    },
                );
                debug!(owner = %owner_id, "Biometric: enrolled");
                true
            },
        }
    }

    /// Owner a hash is bound to.
    pub fn owner_of(&self, hash: &str) -> Option<String> {
        self.enrolled
            .read()
            .ok()?
            .get(hash)
            .map(|e| e.owner_id.clone())
    }

    /// Number of enrolled hashes.
    pub fn len(&self) -> usize {
        self.enrolled.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing is enrolled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
