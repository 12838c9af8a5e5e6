//! Raw signals returned by the analysis capability.
//!
//! Field names follow the capability's JSON output (camelCase). Every
//! field the scorer does not need has a default so that partial model
//! output still parses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a tamper indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Cosmetic or likely benign.
    Low,
    /// Suspicious.
    Medium,
    /// Likely manipulation.
    High,
    /// Manipulation with high confidence.
    Critical,
}

/// One suspected manipulation found in the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TamperIndicator {
    /// Indicator kind ("CLONE_ARTIFACT", "FONT_INCONSISTENCY", ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Severity.
    pub severity: Severity,
    /// Model confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Suggested follow-up.
    #[serde(default)]
    pub recommendation: String,
}

/// Tamper detection family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TamperSignals {
    /// Indicators found; empty for a clean document.
    #[serde(default)]
    pub tamper_indicators: Vec<TamperIndicator>,
}

impl TamperSignals {
    /// Any indicator at MEDIUM severity or above.
    #[must_use]
    pub fn tampering_detected(&self) -> bool {
        self.tamper_indicators
            .iter()
            .any(|i| i.severity >= Severity::Medium)
    }

    /// Highest severity present.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.tamper_indicators.iter().map(|i| i.severity).max()
    }
}

/// One region of recognised text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrZone {
    /// Extracted text.
    #[serde(default)]
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f64,
    /// Detected language.
    #[serde(default)]
    pub language: Option<String>,
}

/// OCR family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSignals {
    /// Recognised zones.
    #[serde(default)]
    pub ocr_zones: Vec<OcrZone>,
}

impl OcrSignals {
    /// Mean zone confidence clamped to [0, 1]; zero without zones.
    #[must_use]
    pub fn mean_confidence(&self) -> f64 {
        if self.ocr_zones.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .ocr_zones
            .iter()
            .map(|z| clamp_unit(z.confidence))
            .sum();
        sum / self.ocr_zones.len() as f64
    }
}

/// Overall capture quality reported by the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentQuality {
    /// Excellent capture.
    Excellent,
    /// Good capture.
    Good,
    /// Usable with artefacts.
    Fair,
    /// Hard to read.
    Poor,
}

/// Metadata and security-feature family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSignals {
    /// Capture quality.
    pub document_quality: DocumentQuality,
    /// Holograms, microprint, watermarks or similar were found.
    #[serde(default)]
    pub has_security_features: bool,
    /// Names of the features found.
    #[serde(default)]
    pub security_features: Vec<String>,
    /// Issuing country, if read.
    #[serde(default)]
    pub issuing_country: Option<String>,
    /// Document number, if read.
    #[serde(default)]
    pub document_number: Option<String>,
    /// Machine readable zone checksum result, when present.
    #[serde(default)]
    pub mrz_valid: Option<bool>,
}

/// Biometric family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricSignals {
    /// A face was detected.
    #[serde(default)]
    pub has_face_image: bool,
    /// Face detection confidence in [0, 1].
    #[serde(default)]
    pub face_confidence: Option<f64>,
    /// Face capture quality.
    #[serde(default)]
    pub face_quality: Option<DocumentQuality>,
    /// Opaque face descriptor used for duplicate detection.
    #[serde(default)]
    pub descriptor: Option<String>,
}

impl BiometricSignals {
    /// Face confidence when a face was detected.
    #[must_use]
    pub fn detected_confidence(&self) -> Option<f64> {
        if self.has_face_image {
            self.face_confidence.map(clamp_unit)
        } else {
            None
        }
    }
}

/// One of the four independently collected signal families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalFamily {
    /// Tamper detection.
    Tamper,
    /// Text extraction.
    Ocr,
    /// Metadata and security features.
    Metadata,
    /// Face and biometric descriptors.
    Biometric,
}

impl SignalFamily {
    /// All families in collection order.
    pub const ALL: [SignalFamily; 4] = [Self::Tamper, Self::Ocr, Self::Metadata, Self::Biometric];
}

impl fmt::Display for SignalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tamper => "tamper",
            Self::Ocr => "ocr",
            Self::Metadata => "metadata",
            Self::Biometric => "biometric",
        };
        f.write_str(s)
    }
}

/// Why a family degraded to its neutral result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// Did not answer within the per-family timeout.
    Timeout,
    /// Answered with output that does not parse.
    Malformed,
    /// Transport or service failure.
    Transport,
}

/// A family that failed and was degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFailure {
    /// Family that failed.
    pub family: SignalFamily,
    /// Failure class.
    pub cause: FailureCause,
    /// Error detail.
    pub message: String,
}

/// The combined output of one collection run.
///
/// Each family is `None` when it failed or was skipped by policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    /// Tamper detection.
    pub tamper: Option<TamperSignals>,
    /// Text extraction.
    pub ocr: Option<OcrSignals>,
    /// Metadata and security features.
    pub metadata: Option<MetadataSignals>,
    /// Biometric analysis.
    pub biometric: Option<BiometricSignals>,
    /// Families that failed.
    pub partial_failures: Vec<PartialFailure>,
    /// Families skipped for the document's class.
    pub skipped: Vec<SignalFamily>,
}

impl RawSignals {
    /// Whether any family failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.partial_failures.is_empty()
    }
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
