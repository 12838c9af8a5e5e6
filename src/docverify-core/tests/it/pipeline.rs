//! End-to-end submission, decision and review flows.

use std::time::Duration;

use docverify_core::{
    Actor, AuditEventKind, BatchStatus, CacheOutcome, CapabilityError, DecisionState,
    DocVerifyError, DocumentClass, LifecycleStatus, RecommendedAction, ReviewAction,
    ReviewRequest, SignalFamily,
};

use crate::support::{harness, high_tamper_analysis, poor_analysis, upload, ScriptedAnalysis};

#[tokio::test]
async fn clean_passport_is_approved_and_issued() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");

    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"passport-1"))
        .await
        .unwrap();

    let report = outcome.report.unwrap();
    assert_eq!(report.overall_score, 95);
    assert_eq!(report.recommended_action, RecommendedAction::Approve);
    assert_eq!(outcome.cache, Some(CacheOutcome::Analyzed));
    assert_eq!(outcome.decision.unwrap().state, DecisionState::Approved);
    assert_eq!(outcome.document.status, LifecycleStatus::Issued);
    assert!(outcome.document.attestation_ref.is_some());
    assert!(outcome.document.token_ref.is_none());
    assert!(outcome.remediation.is_none());
    assert_eq!(h.ledger.writes(), 1);
    assert_eq!(h.archive.puts(), 1);
}

#[tokio::test]
async fn high_tamper_scenario_goes_to_review() {
    let h = harness(ScriptedAnalysis::scripted(high_tamper_analysis()));
    let alice = Actor::citizen("alice");
    let reviewer = Actor::reviewer("rev-1");

    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::NationalId, b"id-card"))
        .await
        .unwrap();

    let report = outcome.report.clone().unwrap();
    assert_eq!(report.integrity_score, 90.0);
    assert_eq!(report.authenticity_score, 50.0);
    assert_eq!(report.metadata_score, 90.0);
    assert_eq!(report.ocr_score, 90.0);
    assert_eq!(report.biometric_score, 90.0);
    assert_eq!(report.security_score, 90.0);
    assert_eq!(report.overall_score, 83);
    assert!(report.tampering_detected);
    assert_eq!(outcome.decision.unwrap().state, DecisionState::UnderReview);
    assert_eq!(outcome.document.status, LifecycleStatus::Pending);
    assert!(outcome.issuance.is_none());
    assert_eq!(h.ledger.writes(), 0);

    let queue = h.engine.review_queue(&reviewer).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].document.id, outcome.document.id);
    assert_eq!(queue[0].report.as_ref().unwrap().overall_score, 83);

    let reviewed = h
        .engine
        .review(
            &reviewer,
            ReviewRequest {
                document_id: outcome.document.id.clone(),
                action: ReviewAction::Approve,
                comments: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(reviewed.decision.state, DecisionState::Approved);
    assert_eq!(reviewed.decision.reviewer_id.as_deref(), Some("rev-1"));
    assert_eq!(reviewed.document.status, LifecycleStatus::Issued);
    assert!(h.engine.review_queue(&reviewer).unwrap().is_empty());
}

#[tokio::test]
async fn poor_document_is_rejected_with_guidance() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::DriversLicense, b"blurry"))
        .await
        .unwrap();

    assert_eq!(outcome.report.as_ref().unwrap().overall_score, 63);
    assert_eq!(outcome.decision.unwrap().state, DecisionState::Rejected);
    assert_eq!(outcome.document.status, LifecycleStatus::Rejected);

    let guidance = outcome.remediation.unwrap();
    assert!(guidance.tampering_cause);
    assert_eq!(guidance.minimum_score, 70);
    assert!(!guidance.steps.is_empty());
    assert_eq!(h.ledger.writes(), 0);
}

#[tokio::test]
async fn identical_upload_resolves_to_same_document() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");

    let first = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"same-bytes"))
        .await
        .unwrap();
    let second = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"same-bytes"))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.document.id, second.document.id);
    assert_eq!(second.cache, None);
    assert_eq!(h.analysis.analyses(), 1);
    assert_eq!(h.ledger.writes(), 1);
    assert_eq!(h.engine.documents_for(&alice).unwrap().len(), 1);

    let resubmitted = h
        .engine
        .audit()
        .entries_for(&first.document.id)
        .iter()
        .filter(|e| e.event_type == AuditEventKind::DocumentResubmitted)
        .count();
    assert_eq!(resubmitted, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_uploads_share_one_analysis() {
    let h = harness(ScriptedAnalysis::clean());
    h.analysis.set_latency(Duration::from_secs(2));
    let alice = Actor::citizen("alice");
    let bob = Actor::citizen("bob");

    let (a, b) = tokio::join!(
        h.engine.submit(&alice, upload(DocumentClass::LandTitle, b"deed")),
        h.engine.submit(&bob, upload(DocumentClass::LandTitle, b"deed")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.document.id, b.document.id);
    assert_eq!(h.analysis.analyses(), 1);
    let mut outcomes = [a.cache.unwrap(), b.cache.unwrap()];
    outcomes.sort_by_key(|o| *o != CacheOutcome::Analyzed);
    assert_eq!(outcomes[0], CacheOutcome::Analyzed);
    assert_ne!(outcomes[1], CacheOutcome::Analyzed);
    assert_eq!(a.report.unwrap().id, b.report.unwrap().id);
}

#[tokio::test]
async fn biometric_duplicate_forces_review_despite_high_score() {
    let h = harness(ScriptedAnalysis::clean());
    h.analysis.face_for(b"alice-passport", "face-shared");
    h.analysis.face_for(b"bob-passport", "face-shared");

    let alice = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::Passport, b"alice-passport"))
        .await
        .unwrap();
    assert_eq!(alice.decision.unwrap().state, DecisionState::Approved);

    let bob = h
        .engine
        .submit(&Actor::citizen("bob"), upload(DocumentClass::Passport, b"bob-passport"))
        .await
        .unwrap();
    assert_eq!(bob.report.as_ref().unwrap().recommended_action, RecommendedAction::Approve);

    let decision = bob.decision.unwrap();
    assert_eq!(decision.state, DecisionState::UnderReview);
    let duplicate = decision.duplicate_biometric.unwrap();
    assert_eq!(duplicate.matched_owner_id, "alice");
    assert!(duplicate.confidence >= 0.95);
    assert!(bob.issuance.is_none());
}

#[tokio::test]
async fn review_is_restricted_to_other_reviewers() {
    let h = harness(ScriptedAnalysis::scripted(high_tamper_analysis()));
    let reviewer = Actor::reviewer("rev-1");

    let own = h
        .engine
        .submit(&reviewer, upload(DocumentClass::Passport, b"reviewer-own"))
        .await
        .unwrap();
    let approve = |document_id: &str| ReviewRequest {
        document_id: document_id.to_string(),
        action: ReviewAction::Approve,
        comments: None,
    };

    let err = h.engine.review(&reviewer, approve(&own.document.id)).await.unwrap_err();
    assert!(err.is_authorization());

    let err = h
        .engine
        .review(&Actor::citizen("mallory"), approve(&own.document.id))
        .await
        .unwrap_err();
    assert!(err.is_authorization());

    let err = h
        .engine
        .review(
            &Actor::reviewer("rev-2"),
            ReviewRequest {
                document_id: own.document.id.clone(),
                action: ReviewAction::Reject,
                comments: Some("   ".into()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocVerifyError::Validation { .. }));

    let rejected = h
        .engine
        .review(
            &Actor::reviewer("rev-2"),
            ReviewRequest {
                document_id: own.document.id.clone(),
                action: ReviewAction::Reject,
                comments: Some("Hologram missing on page 2".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(rejected.decision.state, DecisionState::Rejected);
    assert_eq!(rejected.document.status, LifecycleStatus::Rejected);
    let guidance = rejected.remediation.unwrap();
    assert!(guidance.steps.iter().any(|s| s.contains("Hologram missing")));

    let err = h
        .engine
        .review(&Actor::reviewer("rev-2"), approve(&own.document.id))
        .await
        .unwrap_err();
    assert!(matches!(err, DocVerifyError::InvalidTransition { .. }));
}

#[tokio::test]
async fn failed_family_degrades_without_aborting() {
    let h = harness(ScriptedAnalysis::clean());
    h.analysis.fail(
        SignalFamily::Ocr,
        CapabilityError::Transport {
            message: "connection reset".into(),
        },
    );

    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::Passport, b"ocr-down"))
        .await
        .unwrap();
    let report = outcome.report.unwrap();

    assert_eq!(report.partial_failures.len(), 1);
    assert_eq!(report.partial_failures[0].family, SignalFamily::Ocr);
    assert_eq!(report.ocr_score, 0.0);
    assert_eq!(report.overall_score, 79);
    assert_eq!(outcome.decision.unwrap().state, DecisionState::UnderReview);
}

#[tokio::test(start_paused = true)]
async fn slow_capability_times_out_per_family() {
    let h = harness(ScriptedAnalysis::clean());
    h.analysis.set_latency(Duration::from_secs(31));

    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::Passport, b"slow"))
        .await
        .unwrap();
    let report = outcome.report.unwrap();

    assert_eq!(report.partial_failures.len(), 4);
    assert_eq!(report.overall_score, 68);
    assert_eq!(outcome.decision.unwrap().state, DecisionState::Rejected);
    assert!(outcome.remediation.unwrap().steps.len() >= 4);
}

#[tokio::test]
async fn certificates_skip_tamper_analysis() {
    let h = harness(ScriptedAnalysis::clean());
    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::BirthCertificate, b"birth"))
        .await
        .unwrap();
    let report = outcome.report.unwrap();

    assert_eq!(h.analysis.calls(), 3);
    assert_eq!(report.skipped_families, vec![SignalFamily::Tamper]);
    assert!(report.partial_failures.is_empty());
    assert_eq!(report.integrity_score, 100.0);
}

#[tokio::test]
async fn reanalysis_adds_a_version_and_keeps_the_decision() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"reanalyze-me"))
        .await
        .unwrap();
    let doc_id = outcome.document.id.clone();
    assert_eq!(outcome.document.status, LifecycleStatus::Issued);

    let v2 = h.engine.reanalyze(&alice, &doc_id).await.unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(h.analysis.analyses(), 2);
    let archive_reads = h
        .engine
        .audit()
        .entries_for(&doc_id)
        .into_iter()
        .filter(|e| e.event_type == AuditEventKind::ArchiveRetrieved && e.actor_id == "alice")
        .count();
    assert_eq!(archive_reads, 1);

    let history = h.engine.report_history(&alice, &doc_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert_eq!(h.engine.report(&alice, &doc_id).unwrap().version, 2);

    let decision = h.engine.decision(&alice, &doc_id).unwrap();
    assert_eq!(decision.report_version, Some(1));
    assert_eq!(decision.state, DecisionState::Approved);

    let err = h
        .engine
        .reanalyze(&Actor::citizen("mallory"), &doc_id)
        .await
        .unwrap_err();
    assert!(err.is_authorization());
}

#[tokio::test]
async fn cache_maintenance_operations() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");

    let first = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"cache-a"))
        .await
        .unwrap();
    h.engine
        .submit(&alice, upload(DocumentClass::Passport, b"cache-b"))
        .await
        .unwrap();

    let stats = h.engine.cache_stats().await;
    assert_eq!(stats.entries, 2);
    assert!(stats.oldest_entry <= stats.newest_entry);

    assert!(h.engine.invalidate_cache(&first.document.fingerprint).await);
    assert!(!h.engine.invalidate_cache(&first.document.fingerprint).await);
    assert_eq!(h.engine.cache_stats().await.entries, 1);

    assert_eq!(
        h.engine
            .clear_cache_older_than(chrono::Utc::now() - chrono::Duration::hours(1))
            .await,
        0
    );
    assert_eq!(h.engine.clear_cache().await, 1);
    assert_eq!(h.engine.cache_stats().await.entries, 0);
}

#[tokio::test]
async fn tombstone_hides_document_and_frees_fingerprint() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let first = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"retired"))
        .await
        .unwrap();

    let err = h
        .engine
        .tombstone(&Actor::citizen("bob"), &first.document.id)
        .unwrap_err();
    assert!(err.is_authorization());

    let tombstoned = h.engine.tombstone(&alice, &first.document.id).unwrap();
    assert!(tombstoned.tombstoned);
    assert!(h.engine.documents_for(&alice).unwrap().is_empty());

    let again = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"retired"))
        .await
        .unwrap();
    assert!(again.created);
    assert_ne!(again.document.id, first.document.id);
    assert_eq!(again.cache, Some(CacheOutcome::Hit));
}

#[tokio::test]
async fn tombstoned_documents_can_still_be_reanalyzed() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    let issued = h
        .engine
        .submit(&alice, upload(DocumentClass::LandTitle, b"archived-deed"))
        .await
        .unwrap();
    assert_eq!(issued.document.status, LifecycleStatus::Issued);
    h.engine.tombstone(&alice, &issued.document.id).unwrap();
    let report = h.engine.reanalyze(&alice, &issued.document.id).await.unwrap();
    assert_eq!(report.version, 2);

    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let rejected = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"never-archived"))
        .await
        .unwrap();
    assert_eq!(rejected.document.status, LifecycleStatus::Rejected);
    h.engine.tombstone(&alice, &rejected.document.id).unwrap();
    let report = h.engine.reanalyze(&alice, &rejected.document.id).await.unwrap();
    assert_eq!(report.version, 2);
    assert_eq!(report.recommended_action, RecommendedAction::Reject);
}

#[tokio::test]
async fn audit_chain_covers_the_flow() {
    let h = harness(ScriptedAnalysis::clean());
    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::Passport, b"audited"))
        .await
        .unwrap();

    let kinds: Vec<_> = h
        .engine
        .audit()
        .entries_for(&outcome.document.id)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    for expected in [
        AuditEventKind::DocumentSubmitted,
        AuditEventKind::LifecycleChanged,
        AuditEventKind::ReportGenerated,
        AuditEventKind::DecisionMade,
        AuditEventKind::LedgerIssued,
        AuditEventKind::ArchiveStored,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?}");
    }

    let verification = h.engine.verify_audit();
    assert!(verification.valid, "{:?}", verification.errors);
    assert!(verification.hash_chain_valid);
    assert_eq!(verification.total_entries, h.engine.audit().len() as u64);
}

#[tokio::test]
async fn batch_reports_per_item_results() {
    let analysis = ScriptedAnalysis::clean();
    analysis.respond_for(
        b"batch-bad",
        SignalFamily::Metadata,
        serde_json::json!({ "documentQuality": "POOR", "hasSecurityFeatures": false }),
    );
    analysis.respond_for(
        b"batch-bad",
        SignalFamily::Tamper,
        serde_json::json!({
            "tamperIndicators": [
                { "severity": "CRITICAL" }, { "severity": "HIGH" }, { "severity": "MEDIUM" }
            ]
        }),
    );
    analysis.respond_for(
        b"batch-bad",
        SignalFamily::Ocr,
        serde_json::json!({ "ocrZones": [{ "confidence": 0.3 }] }),
    );
    let h = harness(analysis);

    let handle = h
        .engine
        .submit_batch(
            Actor::citizen("alice"),
            vec![
                upload(DocumentClass::Passport, b"batch-good-1"),
                upload(DocumentClass::Passport, b"batch-bad"),
                upload(DocumentClass::NationalId, b"batch-good-2"),
            ],
        )
        .unwrap();
    assert!(handle.id().starts_with("bat_"));

    let report = handle.join().await.unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.approved, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.total_tamper_indicators, 3);
    assert!((report.average_score - (95.0 + 63.0 + 95.0) / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn cancelled_batch_keeps_completed_results() {
    let h = harness(ScriptedAnalysis::clean());
    h.analysis.set_latency(Duration::from_secs(1));

    let mut handle = h
        .engine
        .submit_batch(
            Actor::citizen("alice"),
            (0..4)
                .map(|i| upload(DocumentClass::Passport, format!("batch-{i}").as_bytes()))
                .collect(),
        )
        .unwrap();

    while handle.progress().completed == 0 {
        assert!(handle.changed().await);
    }
    handle.cancel();

    let report = handle.join().await.unwrap();
    assert_eq!(report.status, BatchStatus::Cancelled);
    assert!(report.processed >= 1);
    assert!(report.skipped >= 1);
    assert_eq!(report.results.len(), report.processed);
    assert!(report.results.iter().all(|r| r.error.is_none()));
}

#[tokio::test]
async fn empty_batch_and_anonymous_actor_are_rejected() {
    let h = harness(ScriptedAnalysis::clean());
    assert!(h
        .engine
        .submit_batch(Actor::citizen("alice"), Vec::new())
        .unwrap_err()
        .is_client_error());
    assert!(matches!(
        h.engine
            .submit_batch(Actor::citizen(""), vec![upload(DocumentClass::Passport, b"x")])
            .unwrap_err(),
        DocVerifyError::NotAuthenticated
    ));
}
