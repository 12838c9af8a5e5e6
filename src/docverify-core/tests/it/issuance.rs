//! Ledger issuance, archive copies and their failure paths.

use docverify_core::{
    AccessType, Actor, ArchiveStore, AuditEventKind, DocVerifyError, DocumentClass, GrantRequest,
    IssuanceKind, IssuanceStatus, LifecycleStatus,
};

use crate::support::{harness, upload, ScriptedAnalysis};

#[tokio::test]
async fn property_documents_mint_transferable_tokens() {
    let h = harness(ScriptedAnalysis::clean());
    let outcome = h
        .engine
        .submit(&Actor::citizen("alice"), upload(DocumentClass::LandTitle, b"title-deed"))
        .await
        .unwrap();

    let issuance = outcome.issuance.unwrap();
    assert_eq!(issuance.kind, IssuanceKind::Transferable);
    assert_eq!(issuance.status, IssuanceStatus::Issued);
    let token = outcome.document.token_ref.clone().unwrap();
    assert!(token.starts_with("tok_"));
    assert!(outcome.document.attestation_ref.is_none());

    let metadata = h.ledger.inner.payload(&token).unwrap();
    assert_eq!(metadata["attributes"]["forensicScore"], 95);
    assert_eq!(metadata["attributes"]["documentClass"], "LAND_TITLE");

    let locator = outcome.document.archive_locator.unwrap();
    let tags = h.archive.inner.tags(&locator).unwrap();
    assert_eq!(tags.ledger_reference, token);
    assert_eq!(tags.owner_id, "alice");
    assert_eq!(tags.original_size, b"title-deed".len() as u64);
}

#[tokio::test]
async fn transient_ledger_failure_leaves_document_verified() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    h.ledger.fail_next_writes(1);

    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"ledger-down"))
        .await
        .unwrap();
    let issuance = outcome.issuance.unwrap();
    assert_eq!(issuance.status, IssuanceStatus::LedgerFailed);
    assert!(issuance.needs_retry());
    assert!(issuance.error.is_some());
    assert_eq!(outcome.document.status, LifecycleStatus::Verified);
    assert!(outcome.document.attestation_ref.is_none());
    assert_eq!(h.archive.puts(), 0);

    let retried = h
        .engine
        .retry_issuance(&alice, &outcome.document.id)
        .await
        .unwrap();
    assert_eq!(retried.status, IssuanceStatus::Issued);
    assert_eq!(h.ledger.inner.records_for(&outcome.document.id), 1);
    assert_eq!(h.archive.puts(), 1);

    let doc = h.engine.document(&alice, &outcome.document.id).unwrap();
    assert_eq!(doc.status, LifecycleStatus::Issued);
    assert_eq!(doc.attestation_ref, retried.ledger_reference);
    assert!(!doc.ledger_pending);
}

#[tokio::test(start_paused = true)]
async fn late_ledger_ack_is_reconciled_instead_of_minted_again() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    h.ledger.ack_late_next_writes(1);

    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::LandTitle, b"slow-ledger-deed"))
        .await
        .unwrap();
    let doc_id = outcome.document.id.clone();
    let issuance = outcome.issuance.unwrap();
    assert_eq!(issuance.status, IssuanceStatus::LedgerFailed);
    assert_eq!(outcome.document.status, LifecycleStatus::Verified);
    assert!(outcome.document.ledger_pending);
    assert_eq!(h.ledger.inner.records_for(&doc_id), 1);

    let retried = h.engine.retry_issuance(&alice, &doc_id).await.unwrap();
    assert_eq!(retried.status, IssuanceStatus::Issued);
    assert_eq!(h.ledger.writes(), 1);
    assert_eq!(h.ledger.inner.records_for(&doc_id), 1);

    let doc = h.engine.document(&alice, &doc_id).unwrap();
    assert_eq!(doc.token_ref, retried.ledger_reference);
    assert!(!doc.ledger_pending);

    let reconciled = h
        .engine
        .audit()
        .entries_for(&doc_id)
        .into_iter()
        .filter(|e| e.event_type == AuditEventKind::LedgerIssued)
        .map(|e| e.payload()["reconciled"].clone())
        .collect::<Vec<_>>();
    assert_eq!(reconciled, vec![serde_json::json!(true)]);

    assert!(h
        .engine
        .retry_issuance(&alice, &doc_id)
        .await
        .unwrap_err()
        .is_conflict());
    assert_eq!(h.ledger.inner.records_for(&doc_id), 1);
}

#[tokio::test]
async fn archive_failure_keeps_ledger_reference_and_retries_only_archive() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    h.archive.fail_next_puts(2);

    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"archive-down"))
        .await
        .unwrap();
    let issuance = outcome.issuance.unwrap();
    assert_eq!(issuance.status, IssuanceStatus::ArchivePending);
    assert!(issuance.ledger_reference.is_some());
    assert_eq!(outcome.document.status, LifecycleStatus::Issued);
    assert!(outcome.document.archive_pending());
    assert_eq!(h.archive.puts(), 2);

    let retried = h
        .engine
        .retry_issuance(&alice, &outcome.document.id)
        .await
        .unwrap();
    assert_eq!(retried.status, IssuanceStatus::Issued);
    assert_eq!(retried.ledger_reference, issuance.ledger_reference);
    assert!(retried.ledger_confirmed);
    assert!(retried.archive_locator.is_some());
    assert_eq!(h.ledger.writes(), 1);

    let err = h
        .engine
        .retry_issuance(&alice, &outcome.document.id)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.ledger.writes(), 1);
}

#[tokio::test]
async fn retrieval_respects_grants_and_detects_corruption() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    let bob = Actor::verifier("bob");
    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"original-bytes"))
        .await
        .unwrap();
    let doc_id = outcome.document.id.clone();

    assert_eq!(h.engine.retrieve(&alice, &doc_id).await.unwrap(), b"original-bytes");
    assert!(h.engine.retrieve(&bob, &doc_id).await.unwrap_err().is_authorization());

    h.engine
        .grant_access(
            &alice,
            &GrantRequest {
                document_id: doc_id.clone(),
                grantee_id: "bob".into(),
                access_type: AccessType::Read,
                expires_in: None,
            },
        )
        .unwrap();
    assert_eq!(h.engine.retrieve(&bob, &doc_id).await.unwrap(), b"original-bytes");

    let locator = outcome.document.archive_locator.unwrap();
    let mut sealed = h.archive.inner.get(&locator).await.unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(h.archive.inner.corrupt(&locator, sealed));

    let err = h.engine.retrieve(&alice, &doc_id).await.unwrap_err();
    assert!(matches!(err, DocVerifyError::IntegrityMismatch { .. }));
}

#[tokio::test]
async fn verify_issuance_follows_ledger_ownership() {
    let h = harness(ScriptedAnalysis::clean());
    let alice = Actor::citizen("alice");
    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::VehicleRegistration, b"vehicle"))
        .await
        .unwrap();
    let doc_id = outcome.document.id.clone();

    let verified = h.engine.verify_issuance(&alice, &doc_id).await.unwrap();
    assert!(verified.owner_verified);
    assert!(verified.confirmed);

    let carol = Actor::verifier("carol");
    assert!(h
        .engine
        .verify_issuance(&carol, &doc_id)
        .await
        .unwrap_err()
        .is_authorization());
    h.engine
        .grant_access(
            &alice,
            &GrantRequest {
                document_id: doc_id.clone(),
                grantee_id: "carol".into(),
                access_type: AccessType::Verify,
                expires_in: None,
            },
        )
        .unwrap();
    assert!(h.engine.verify_issuance(&carol, &doc_id).await.unwrap().owner_verified);
    assert!(h.engine.retrieve(&carol, &doc_id).await.unwrap_err().is_authorization());

    let token = outcome.document.token_ref.unwrap();
    assert!(h.ledger.inner.transfer(&token, "dave"));
    assert!(!h.engine.verify_issuance(&alice, &doc_id).await.unwrap().owner_verified);
}

#[tokio::test]
async fn unissued_documents_cannot_be_retried_or_verified() {
    let h = harness(ScriptedAnalysis::scripted(crate::support::poor_analysis()));
    let alice = Actor::citizen("alice");
    let outcome = h
        .engine
        .submit(&alice, upload(DocumentClass::Passport, b"rejected"))
        .await
        .unwrap();

    let err = h
        .engine
        .retry_issuance(&alice, &outcome.document.id)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = h
        .engine
        .verify_issuance(&alice, &outcome.document.id)
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}
