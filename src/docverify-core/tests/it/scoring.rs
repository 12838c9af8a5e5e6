//! Property-based tests for compliance scoring and decision precedence.

use proptest::prelude::*;

use docverify_core::biometric::BiometricMatch;
use docverify_core::decision::resolve;
use docverify_core::signals::{
    BiometricSignals, DocumentQuality, MetadataSignals, OcrSignals, OcrZone, Severity,
    TamperIndicator, TamperSignals,
};
use docverify_core::{
    ComplianceScorer, DecisionState, RawSignals, RecommendedAction, ScoreThresholds,
};

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn quality() -> impl Strategy<Value = DocumentQuality> {
    prop_oneof![
        Just(DocumentQuality::Excellent),
        Just(DocumentQuality::Good),
        Just(DocumentQuality::Fair),
        Just(DocumentQuality::Poor),
    ]
}

fn indicator(severity: Severity) -> TamperIndicator {
    TamperIndicator {
        kind: "CLONE_ARTIFACT".into(),
        severity,
        confidence: 0.8,
        description: String::new(),
        recommendation: String::new(),
    }
}

/// Arbitrary signals, each family possibly missing.
fn raw_signals() -> impl Strategy<Value = RawSignals> {
    (
        prop::option::of(prop::collection::vec(severity(), 0..15)),
        prop::option::of(prop::collection::vec(0.0f64..=1.0, 0..6)),
        prop::option::of((quality(), any::<bool>())),
        prop::option::of((any::<bool>(), 0.0f64..=1.0)),
    )
        .prop_map(|(tamper, ocr, metadata, biometric)| RawSignals {
            tamper: tamper.map(|s| TamperSignals {
                tamper_indicators: s.into_iter().map(indicator).collect(),
            }),
            ocr: ocr.map(|c| OcrSignals {
                ocr_zones: c
                    .into_iter()
                    .map(|confidence| OcrZone {
                        text: "TEXT".into(),
                        confidence,
                        language: None,
                    })
                    .collect(),
            }),
            metadata: metadata.map(|(document_quality, has_security_features)| MetadataSignals {
                document_quality,
                has_security_features,
                security_features: Vec::new(),
                issuing_country: None,
                document_number: None,
                mrz_valid: None,
            }),
            biometric: biometric.map(|(has_face_image, c)| BiometricSignals {
                has_face_image,
                face_confidence: Some(c),
                face_quality: None,
                descriptor: None,
            }),
            partial_failures: Vec::new(),
            skipped: Vec::new(),
        })
}

fn action() -> impl Strategy<Value = RecommendedAction> {
    prop_oneof![
        Just(RecommendedAction::Approve),
        Just(RecommendedAction::Review),
        Just(RecommendedAction::Reject),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Score Properties
    // ========================================================================

    /// Every sub-score and the overall score stay within [0, 100].
    #[test]
    fn scores_are_bounded(signals in raw_signals()) {
        let score = ComplianceScorer::default().score(&signals);
        let s = score.sub_scores;
        for sub in [s.integrity, s.authenticity, s.metadata, s.ocr, s.biometric, s.security] {
            prop_assert!((0.0..=100.0).contains(&sub), "sub-score {} out of range", sub);
        }
        prop_assert!(score.overall <= 100);
    }

    /// With equal weights the overall score is the rounded plain mean.
    #[test]
    fn overall_is_rounded_mean(signals in raw_signals()) {
        let score = ComplianceScorer::default().score(&signals);
        prop_assert_eq!(f64::from(score.overall), score.sub_scores.mean().round());
    }

    /// The recommendation always agrees with the thresholds.
    #[test]
    fn recommendation_matches_thresholds(signals in raw_signals()) {
        let score = ComplianceScorer::default().score(&signals);
        let expected = if score.overall >= 85 {
            RecommendedAction::Approve
        } else if score.overall >= 70 {
            RecommendedAction::Review
        } else {
            RecommendedAction::Reject
        };
        prop_assert_eq!(score.recommended_action, expected);
    }

    /// Scoring is deterministic.
    #[test]
    fn scoring_is_deterministic(signals in raw_signals()) {
        let scorer = ComplianceScorer::default();
        prop_assert_eq!(scorer.score(&signals), scorer.score(&signals));
    }

    /// Tampering is detected exactly when some indicator is MEDIUM or worse.
    #[test]
    fn tampering_requires_medium_severity(severities in prop::collection::vec(severity(), 0..10)) {
        let signals = RawSignals {
            tamper: Some(TamperSignals {
                tamper_indicators: severities.iter().copied().map(indicator).collect(),
            }),
            ..RawSignals::default()
        };
        let score = ComplianceScorer::default().score(&signals);
        let expected = severities.iter().any(|s| *s >= Severity::Medium);
        prop_assert_eq!(score.tampering_detected, expected);
        prop_assert_eq!(score.sub_scores.authenticity, if expected { 50.0 } else { 95.0 });
    }

    // ========================================================================
    // Decision Precedence
    // ========================================================================

    /// A confident duplicate match always forces review.
    #[test]
    fn confident_duplicate_forces_review(action in action(), confidence in 0.95f64..=1.0) {
        let duplicate = BiometricMatch {
            matched_owner_id: "other".into(),
            confidence,
        };
        prop_assert_eq!(resolve(action, Some(&duplicate), 0.95), DecisionState::UnderReview);
    }

    /// A weak match never changes the score-based outcome.
    #[test]
    fn weak_duplicate_is_ignored(action in action(), confidence in 0.0f64..0.95) {
        let duplicate = BiometricMatch {
            matched_owner_id: "other".into(),
            confidence,
        };
        prop_assert_eq!(
            resolve(action, Some(&duplicate), 0.95),
            resolve(action, None, 0.95)
        );
    }

    /// Threshold recommendation is monotonic in the score.
    #[test]
    fn recommendation_is_monotonic(a in 0u8..=100, b in 0u8..=100) {
        let thresholds = ScoreThresholds::default();
        let rank = |r: RecommendedAction| match r {
            RecommendedAction::Reject => 0,
            RecommendedAction::Review => 1,
            RecommendedAction::Approve => 2,
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(thresholds.recommend(lo)) <= rank(thresholds.recommend(hi)));
    }
}

#[test]
fn high_tamper_scenario_scores_83() {
    let signals = RawSignals {
        tamper: Some(TamperSignals {
            tamper_indicators: vec![indicator(Severity::High)],
        }),
        ocr: Some(OcrSignals {
            ocr_zones: vec![OcrZone {
                text: "NAME".into(),
                confidence: 0.9,
                language: None,
            }],
        }),
        metadata: Some(MetadataSignals {
            document_quality: DocumentQuality::Good,
            has_security_features: true,
            security_features: vec!["HOLOGRAM".into()],
            issuing_country: None,
            document_number: None,
            mrz_valid: None,
        }),
        biometric: Some(BiometricSignals {
            has_face_image: true,
            face_confidence: Some(0.9),
            face_quality: None,
            descriptor: None,
        }),
        ..RawSignals::default()
    };

    let score = ComplianceScorer::default().score(&signals);
    let s = score.sub_scores;
    assert_eq!(
        [s.integrity, s.authenticity, s.metadata, s.ocr, s.biometric, s.security],
        [90.0, 50.0, 90.0, 90.0, 90.0, 90.0]
    );
    assert_eq!(score.overall, 83);
    assert_eq!(score.recommended_action, RecommendedAction::Review);
    assert!(score.tampering_detected);
}
