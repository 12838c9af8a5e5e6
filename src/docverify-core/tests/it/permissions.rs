//! Sharing through the engine.

use std::time::Duration;

use docverify_core::{
    AccessType, Actor, AuditEventKind, DocVerifyError, DocumentClass, GrantRequest,
};

use crate::support::{harness, poor_analysis, upload, Harness, ScriptedAnalysis};

async fn owned_document(h: &Harness, owner: &Actor) -> String {
    h.engine
        .submit(owner, upload(DocumentClass::Passport, b"shared-passport"))
        .await
        .unwrap()
        .document
        .id
}

fn grant(
    document_id: &str,
    grantee: &str,
    access: AccessType,
    expires_in: Option<Duration>,
) -> GrantRequest {
    GrantRequest {
        document_id: document_id.to_string(),
        grantee_id: grantee.to_string(),
        access_type: access,
        expires_in,
    }
}

#[tokio::test]
async fn revoke_then_check_is_denied() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let doc_id = owned_document(&h, &alice).await;

    let granted = h
        .engine
        .grant_access(&alice, &grant(&doc_id, "bank", AccessType::Read, None))
        .unwrap();
    assert!(granted.created);
    assert!(granted.permission.id.starts_with("perm_"));
    assert!(h.engine.check_access(&doc_id, "bank", AccessType::Read));
    assert!(!h.engine.check_access(&doc_id, "bank", AccessType::Verify));
    assert!(!h.engine.check_access(&doc_id, "someone-else", AccessType::Read));

    let revoked = h.engine.revoke_access(&alice, &granted.permission.id).unwrap();
    assert!(!revoked.is_active);
    assert!(!h.engine.check_access(&doc_id, "bank", AccessType::Read));

    let again = h.engine.revoke_access(&alice, &granted.permission.id).unwrap();
    assert_eq!(again.revoked_at, revoked.revoked_at);
    assert!(!h.engine.check_access(&doc_id, "bank", AccessType::Read));
}

#[tokio::test]
async fn zero_expiry_is_never_effective() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let doc_id = owned_document(&h, &alice).await;

    h.engine
        .grant_access(&alice, &grant(&doc_id, "bank", AccessType::Read, Some(Duration::ZERO)))
        .unwrap();
    assert!(!h.engine.check_access(&doc_id, "bank", AccessType::Read));
}

#[tokio::test]
async fn repeated_grant_is_idempotent() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let doc_id = owned_document(&h, &alice).await;

    let request = grant(&doc_id, "bank", AccessType::Share, Some(Duration::from_secs(3600)));
    let first = h.engine.grant_access(&alice, &request).unwrap();
    let second = h.engine.grant_access(&alice, &request).unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.permission.id, second.permission.id);
    assert_eq!(h.engine.list_access(&alice, &doc_id).unwrap().len(), 1);
}

#[tokio::test]
async fn only_owner_may_grant_list_or_revoke() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let mallory = Actor::citizen("mallory");
    let doc_id = owned_document(&h, &alice).await;

    let err = h
        .engine
        .grant_access(&mallory, &grant(&doc_id, "mallory-friend", AccessType::Read, None))
        .unwrap_err();
    assert!(matches!(err, DocVerifyError::NotOwner { .. }));

    let err = h
        .engine
        .grant_access(&alice, &grant(&doc_id, "alice", AccessType::Read, None))
        .unwrap_err();
    assert!(err.is_client_error());

    let granted = h
        .engine
        .grant_access(&alice, &grant(&doc_id, "bank", AccessType::Read, None))
        .unwrap();
    assert!(h
        .engine
        .revoke_access(&mallory, &granted.permission.id)
        .unwrap_err()
        .is_authorization());
    assert!(h.engine.list_access(&mallory, &doc_id).unwrap_err().is_authorization());
    assert!(h.engine.check_access(&doc_id, "bank", AccessType::Read));

    let err = h
        .engine
        .grant_access(&alice, &grant("doc_missing", "bank", AccessType::Read, None))
        .unwrap_err();
    assert!(matches!(err, DocVerifyError::NotFound { .. }));
}

#[tokio::test]
async fn expired_grants_are_cleaned_up() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let doc_id = owned_document(&h, &alice).await;

    h.engine
        .grant_access(
            &alice,
            &grant(&doc_id, "bank", AccessType::Read, Some(Duration::from_millis(1))),
        )
        .unwrap();
    h.engine
        .grant_access(&alice, &grant(&doc_id, "notary", AccessType::Verify, None))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!h.engine.check_access(&doc_id, "bank", AccessType::Read));
    assert_eq!(h.engine.cleanup_expired_access(), 1);
    assert_eq!(h.engine.cleanup_expired_access(), 0);

    let grants = h.engine.list_access(&alice, &doc_id).unwrap();
    assert_eq!(grants.iter().filter(|p| p.is_active).count(), 1);

    let expired_events = h
        .engine
        .audit()
        .entries()
        .into_iter()
        .filter(|e| e.event_type == AuditEventKind::PermissionsExpired)
        .count();
    assert_eq!(expired_events, 1);
}

#[tokio::test]
async fn access_checks_are_audited() {
    let h = harness(ScriptedAnalysis::scripted(poor_analysis()));
    let alice = Actor::citizen("alice");
    let doc_id = owned_document(&h, &alice).await;

    h.engine.check_access(&doc_id, "bank", AccessType::Read);
    let checks: Vec<_> = h
        .engine
        .audit()
        .entries_for(&doc_id)
        .into_iter()
        .filter(|e| e.event_type == AuditEventKind::AccessChecked)
        .collect();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].actor_id, "bank");
    assert_eq!(checks[0].payload()["allowed"], false);
    assert!(h.engine.verify_audit().valid);
}
