//! Compliance scoring.
//!
//! Turns [`RawSignals`] into six sub-scores, a weighted overall score and a
//! recommendation. Scoring is pure: no I/O, no clock, no randomness, so the
//! same signals always produce the same [`ComplianceScore`].
//!
//! ## Sub-scores
//!
//! | Sub-score    | Rule                                              |
//! |--------------|---------------------------------------------------|
//! | integrity    | `100 - 10 × indicators`, floored at 0             |
//! | authenticity | 50 if any indicator ≥ MEDIUM, else 95             |
//! | metadata     | 90 if quality is GOOD, else 70                    |
//! | ocr          | mean zone confidence × 100, 0 without zones       |
//! | biometric    | face confidence × 100 when a face was found, else 85 |
//! | security     | 90 with security features, else 60               |
//!
//! `overall = round(weighted mean)`; the default weights are equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DocVerifyError;
use crate::fingerprint::ContentFingerprint;
use crate::signals::{
    DocumentQuality, PartialFailure, RawSignals, Severity, SignalFamily,
};

/// Biometric sub-score when no face was detected.
pub const NEUTRAL_BIOMETRIC_SCORE: f64 = 85.0;

/// Penalty per tamper indicator on the integrity sub-score.
pub const INTEGRITY_PENALTY_PER_INDICATOR: f64 = 10.0;

/// Recommendation derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    /// Overall score at or above the approve threshold.
    Approve,
    /// Between the review and approve thresholds.
    Review,
    /// Below the review threshold.
    Reject,
}

/// The two cut points that map an overall score to a recommendation.
///
/// This is the only place the cut points live; everything that needs them
/// reads them from here via [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreThresholds {
    /// Minimum overall score for APPROVE.
    pub approve: u8,
    /// Minimum overall score for REVIEW.
    pub review: u8,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            approve: 85,
            review: 70,
        }
    }
}

impl ScoreThresholds {
    /// Map an overall score to a recommendation.
    #[must_use]
    pub const fn recommend(&self, overall: u8) -> RecommendedAction {
        if overall >= self.approve {
            RecommendedAction::Approve
        } else if overall >= self.review {
            RecommendedAction::Review
        } else {
            RecommendedAction::Reject
        }
    }

    /// Reject inconsistent cut points.
    pub fn validate(&self) -> Result<(), DocVerifyError> {
        if self.approve > 100 {
            return Err(DocVerifyError::Config {
                message: format!("approve threshold {} exceeds 100", self.approve),
            });
        }
        if self.review >= self.approve {
            return Err(DocVerifyError::Config {
                message: format!(
                    "review threshold {} must be below approve threshold {}",
                    self.review, self.approve
                ),
            });
        }
        Ok(())
    }
}

/// Relative weight of each sub-score in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Integrity weight.
    pub integrity: f64,
    /// Authenticity weight.
    pub authenticity: f64,
    /// Metadata weight.
    pub metadata: f64,
    /// OCR weight.
    pub ocr: f64,
    /// Biometric weight.
    pub biometric: f64,
    /// Security-feature weight.
    pub security: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::equal()
    }
}

impl ScoreWeights {
    /// Equal weighting (the canonical blend).
    #[must_use]
    pub const fn equal() -> Self {
        Self {
            integrity: 1.0,
            authenticity: 1.0,
            metadata: 1.0,
            ocr: 1.0,
            biometric: 1.0,
            security: 1.0,
        }
    }

    fn as_array(&self) -> [f64; 6] {
        [
            self.integrity,
            self.authenticity,
            self.metadata,
            self.ocr,
            self.biometric,
            self.security,
        ]
    }

    /// Reject negative, non-finite or all-zero weights.
    pub fn validate(&self) -> Result<(), DocVerifyError> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DocVerifyError::Config {
                message: "score weights must be finite and non-negative".into(),
            });
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(DocVerifyError::Config {
                message: "at least one score weight must be positive".into(),
            });
        }
        Ok(())
    }
}

/// The six named sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// Tamper-count based integrity.
    pub integrity: f64,
    /// Forgery-pattern based authenticity.
    pub authenticity: f64,
    /// Metadata quality.
    pub metadata: f64,
    /// Text recognition confidence.
    pub ocr: f64,
    /// Face detection confidence.
    pub biometric: f64,
    /// Security-feature presence.
    pub security: f64,
}

impl SubScores {
    /// Plain mean of the six sub-scores.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.weighted_mean(&ScoreWeights::equal())
    }

    /// Weighted mean of the six sub-scores.
    #[must_use]
    pub fn weighted_mean(&self, weights: &ScoreWeights) -> f64 {
        let scores = [
            self.integrity,
            self.authenticity,
            self.metadata,
            self.ocr,
            self.biometric,
            self.security,
        ];
        let w = weights.as_array();
        let total: f64 = w.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        scores.iter().zip(w.iter()).map(|(s, w)| s * w).sum::<f64>() / total
    }
}

/// Highest tamper severity, or `None` when there are no indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TamperRisk {
    /// No indicators.
    None,
    /// Only LOW indicators.
    Low,
    /// At least one MEDIUM.
    Medium,
    /// At least one HIGH.
    High,
    /// At least one CRITICAL.
    Critical,
}

impl From<Option<Severity>> for TamperRisk {
    fn from(max: Option<Severity>) -> Self {
        match max {
            None => Self::None,
            Some(Severity::Low) => Self::Low,
            Some(Severity::Medium) => Self::Medium,
            Some(Severity::High) => Self::High,
            Some(Severity::Critical) => Self::Critical,
        }
    }
}

/// Human-readable summary of a scoring run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    /// What counts in the document's favour.
    pub strengths: Vec<String>,
    /// What counts against it.
    pub weaknesses: Vec<String>,
    /// Detected anomalies.
    pub anomalies: Vec<String>,
    /// Suggested next steps.
    pub recommendations: Vec<String>,
}

/// Output of [`ComplianceScorer::score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScore {
    /// The six sub-scores.
    pub sub_scores: SubScores,
    /// `round(weighted mean)` in [0, 100].
    pub overall: u8,
    /// Any indicator at MEDIUM or above.
    pub tampering_detected: bool,
    /// Highest indicator severity.
    pub tamper_risk: TamperRisk,
    /// Number of tamper indicators.
    pub tamper_indicator_count: usize,
    /// Recommendation for the decision engine.
    pub recommended_action: RecommendedAction,
    /// Summary for display.
    pub findings: Findings,
}

/// Combines raw signals into a [`ComplianceScore`].
#[derive(Debug, Clone, Default)]
pub struct ComplianceScorer {
    thresholds: ScoreThresholds,
    weights: ScoreWeights,
}

impl ComplianceScorer {
    /// Create a scorer with explicit thresholds and weights.
    pub fn new(thresholds: ScoreThresholds, weights: ScoreWeights) -> Self {
        Self {
            thresholds,
            weights,
        }
    }

    /// Thresholds this scorer recommends against.
    pub fn thresholds(&self) -> &ScoreThresholds {
        &self.thresholds
    }

    /// Score a set of raw signals.
    pub fn score(&self, signals: &RawSignals) -> ComplianceScore {
        let indicator_count = signals
            .tamper
            .as_ref()
            .map_or(0, |t| t.tamper_indicators.len());
        let tampering_detected = signals
            .tamper
            .as_ref()
            .is_some_and(|t| t.tampering_detected());
        let tamper_risk =
            TamperRisk::from(signals.tamper.as_ref().and_then(|t| t.max_severity()));

        let integrity =
            (100.0 - INTEGRITY_PENALTY_PER_INDICATOR * indicator_count as f64).max(0.0);
        let authenticity = if tampering_detected { 50.0 } else { 95.0 };
        let metadata = match signals.metadata.as_ref().map(|m| m.document_quality) {
            Some(DocumentQuality::Good) => 90.0,
            _ => 70.0,
        };
        let ocr = signals
            .ocr
            .as_ref()
            .map_or(0.0, |o| o.mean_confidence() * 100.0);
        let biometric = signals
            .biometric
            .as_ref()
            .and_then(|b| b.detected_confidence())
            .map_or(NEUTRAL_BIOMETRIC_SCORE, |c| c * 100.0);
        let security = if signals
            .metadata
            .as_ref()
            .is_some_and(|m| m.has_security_features)
        {
            90.0
        } else {
            60.0
        };

        let sub_scores = SubScores {
            integrity,
            authenticity,
            metadata,
            ocr,
            biometric,
            security,
        };
        let overall = sub_scores
            .weighted_mean(&self.weights)
            .round()
            .clamp(0.0, 100.0) as u8;
        let recommended_action = self.thresholds.recommend(overall);

        let findings = build_findings(signals, &sub_scores, indicator_count, tampering_detected);

        ComplianceScore {
            sub_scores,
            overall,
            tampering_detected,
            tamper_risk,
            tamper_indicator_count: indicator_count,
            recommended_action,
            findings,
        }
    }
}

fn build_findings(
    signals: &RawSignals,
    sub_scores: &SubScores,
    indicator_count: usize,
    tampering_detected: bool,
) -> Findings {
    let mut findings = Findings::default();

    if signals
        .metadata
        .as_ref()
        .is_some_and(|m| m.has_security_features)
    {
        findings.strengths.push("Security features detected".into());
    }
    if signals
        .biometric
        .as_ref()
        .is_some_and(|b| b.has_face_image)
    {
        findings.strengths.push("Valid biometric data".into());
    }

    if tampering_detected {
        findings.weaknesses.push("Tampering indicators detected".into());
    }
    if sub_scores.ocr < 80.0 {
        findings.weaknesses.push("Low OCR confidence".into());
    }
    for failure in &signals.partial_failures {
        findings.weaknesses.push(format!(
            "{} analysis unavailable ({:?})",
            failure.family, failure.cause
        ));
    }

    if indicator_count > 0 {
        findings
            .anomalies
            .push(format!("{indicator_count} anomalies detected"));
    }

    if tampering_detected || !signals.partial_failures.is_empty() {
        findings
            .recommendations
            .push("Request manual verification".into());
    } else {
        findings
            .recommendations
            .push("Document appears authentic".into());
    }
    findings
}

/// One immutable analysis result for a content fingerprint.
///
/// Re-analysis appends a new version; nothing edits a report in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicReport {
    /// Unique report id.
    pub id: String,
    /// Content the report describes.
    pub fingerprint: ContentFingerprint,
    /// 1-based version for this fingerprint.
    pub version: u32,
    /// Integrity sub-score.
    pub integrity_score: f64,
    /// Authenticity sub-score.
    pub authenticity_score: f64,
    /// Metadata sub-score.
    pub metadata_score: f64,
    /// OCR sub-score.
    pub ocr_score: f64,
    /// Biometric sub-score.
    pub biometric_score: f64,
    /// Security-feature sub-score.
    pub security_score: f64,
    /// Weighted overall score.
    pub overall_score: u8,
    /// Any indicator at MEDIUM or above.
    pub tampering_detected: bool,
    /// Highest indicator severity.
    pub tamper_risk: TamperRisk,
    /// Number of tamper indicators.
    pub tamper_indicator_count: usize,
    /// Recommendation for the decision engine.
    pub recommended_action: RecommendedAction,
    /// Families that degraded.
    pub partial_failures: Vec<PartialFailure>,
    /// Families skipped by policy.
    pub skipped_families: Vec<SignalFamily>,
    /// Summary for display.
    pub findings: Findings,
    /// Hash of the face descriptor, when a face was found.
    pub biometric_hash: Option<String>,
    /// Face confidence backing `biometric_hash`.
    pub face_confidence: Option<f64>,
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
}

impl ForensicReport {
    /// Assemble a report from a score and the signals it was computed from.
    pub fn assemble(
        fingerprint: ContentFingerprint,
        version: u32,
        score: ComplianceScore,
        signals: &RawSignals,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let biometric = signals.biometric.as_ref();
        Self {
            id: format!("rpt_{}", uuid::Uuid::new_v4().simple()),
            fingerprint,
            version,
            integrity_score: score.sub_scores.integrity,
            authenticity_score: score.sub_scores.authenticity,
            metadata_score: score.sub_scores.metadata,
            ocr_score: score.sub_scores.ocr,
            biometric_score: score.sub_scores.biometric,
            security_score: score.sub_scores.security,
            overall_score: score.overall,
            tampering_detected: score.tampering_detected,
            tamper_risk: score.tamper_risk,
            tamper_indicator_count: score.tamper_indicator_count,
            recommended_action: score.recommended_action,
            partial_failures: signals.partial_failures.clone(),
            skipped_families: signals.skipped.clone(),
            findings: score.findings,
            biometric_hash: biometric.and_then(crate::biometric::biometric_hash),
            face_confidence: biometric.and_then(|b| b.detected_confidence()),
            generated_at,
        }
    }

    /// The six sub-scores.
    pub fn sub_scores(&self) -> SubScores {
        SubScores {
            integrity: self.integrity_score,
            authenticity: self.authenticity_score,
            metadata: self.metadata_score,
            ocr: self.ocr_score,
            biometric: self.biometric_score,
            security: self.security_score,
        }
    }
}

/// What a rejected submitter is told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationGuidance {
    /// The document's overall score.
    pub overall_score: u8,
    /// Minimum score needed to avoid rejection.
    pub minimum_score: u8,
    /// Score needed for automatic approval.
    pub approve_score: u8,
    /// Tampering contributed to the rejection.
    pub tampering_cause: bool,
    /// Concrete next steps.
    pub steps: Vec<String>,
}

impl RemediationGuidance {
    /// Build guidance for a rejected report.
    pub fn for_report(
        report: &ForensicReport,
        thresholds: &ScoreThresholds,
        reviewer_comments: Option<&str>,
    ) -> Self {
        let mut steps = Vec::new();
        if report.tampering_detected {
            steps.push(format!(
                "Tampering indicators were found (risk {:?}); submit an unaltered original",
                report.tamper_risk
            ));
        }
        if report.ocr_score < 80.0 {
            steps.push("Rescan at higher resolution so all text is legible".into());
        }
        if report.metadata_score < 90.0 {
            steps.push("Capture the full document in even lighting".into());
        }
        for failure in &report.partial_failures {
            steps.push(format!(
                "{} analysis could not complete; resubmitting may help",
                failure.family
            ));
        }
        if let Some(comments) = reviewer_comments {
            steps.push(format!("Reviewer: {comments}"));
        }
        if steps.is_empty() {
            steps.push("Contact the issuing authority for a certified copy".into());
        }

        Self {
            overall_score: report.overall_score,
            minimum_score: thresholds.review,
            approve_score: thresholds.approve,
            tampering_cause: report.tampering_detected,
            steps,
        }
    }
}
