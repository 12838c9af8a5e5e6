//! Time-boxed, typed access grants on documents.
//!
//! Grants are never deleted. Revocation and expiry only flip `is_active`
//! off, and nothing ever flips it back on. Every grant, revoke, cleanup and
//! access check is written to the audit trail.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventKind, AuditRecord, AuditTrail};
use crate::document::DocumentStore;
use crate::error::DocVerifyError;
use crate::types::AccessType;

/// One access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Grant id (`perm_…`).
    pub id: String,
    /// Document the grant is on.
    pub document_id: String,
    /// Owner who granted it.
    pub owner_id: String,
    /// Identity receiving access.
    pub grantee_id: String,
    /// Access type. Exact match only.
    pub access_type: AccessType,
    /// Expiry; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Cleared by revoke or expiry cleanup.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set by revoke.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Permission {
    /// Active and not yet expired at `now`.
    #[must_use]
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Request to grant access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    /// Document to share.
    pub document_id: String,
    /// Identity receiving access.
    pub grantee_id: String,
    /// Access type.
    pub access_type: AccessType,
    /// Lifetime from now, in milliseconds on the wire.
    #[serde(default, with = "crate::config::duration_ms::option")]
    pub expires_in: Option<Duration>,
}

/// Result of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantOutcome {
    /// The effective grant.
    pub permission: Permission,
    /// `false` when an identical effective grant already existed.
    pub created: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    permissions: HashMap<String, Permission>,
    /// Grant ids per document, in creation order.
    by_document: HashMap<String, Vec<String>>,
}

/// Owns all grants.
pub struct PermissionLedger {
    state: RwLock<LedgerState>,
    documents: Arc<DocumentStore>,
    audit: Arc<AuditTrail>,
}

impl PermissionLedger {
    /// Create a ledger over a document store.
    pub fn new(documents: Arc<DocumentStore>, audit: Arc<AuditTrail>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            documents,
            audit,
        }
    }

    /// Grant access. Only the owner may grant.
    ///
    /// An identical effective grant is returned unchanged. A grant for the
    /// same tuple that is still flagged active but already expired is
    /// deactivated and replaced.
    pub fn grant(
        &self,
        requester_id: &str,
        request: &GrantRequest,
    ) -> Result<GrantOutcome, DocVerifyError> {
        if request.grantee_id.trim().is_empty() {
            return Err(DocVerifyError::validation("granteeId is required"));
        }
        let doc = self.documents.get(&request.document_id)?;
        if doc.owner_id != requester_id {
            return Err(DocVerifyError::NotOwner {
                document_id: doc.id,
                requester_id: requester_id.to_string(),
            });
        }
        if doc.tombstoned {
            return Err(DocVerifyError::validation(format!(
                "document {} has been deleted",
                doc.id
            )));
        }
        if request.grantee_id == requester_id {
            return Err(DocVerifyError::validation("cannot grant access to yourself"));
        }

        let now = Utc::now();
        let expires_at = match request.expires_in {
            Some(d) => Some(
                chrono::Duration::from_std(d)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| DocVerifyError::validation("expiresIn is out of range"))?,
            ),
            None => None,
        };

        let outcome = {
            let mut state = self
                .state
                .write()
                .map_err(|_| DocVerifyError::poisoned("permission ledger"))?;
            let LedgerState {
                permissions,
                by_document,
            } = &mut *state;
            let ids = by_document.entry(doc.id.clone()).or_default();

            let mut existing = None;
            for id in ids.iter() {
                let Some(p) = permissions.get_mut(id) else {
                    continue;
                };
                if p.grantee_id != request.grantee_id || p.access_type != request.access_type {
                    continue;
                }
                if p.is_effective_at(now) {
                    existing = Some(p.clone());
                    break;
                }
                if p.is_active && p.is_expired_at(now) {
                    debug!(permission_id = %p.id, "Permissions: deactivating expired grant before re-grant");
                    p.is_active = false;
                }
            }

            match existing {
                Some(permission) => GrantOutcome {
                    permission,
                    created: false,
                },
                None => {
                    let permission = Permission {
                        id: format!("perm_{}", uuid::Uuid::new_v4().simple()),
                        document_id: doc.id.clone(),
                        owner_id: doc.owner_id.clone(),
                        grantee_id: request.grantee_id.clone(),
                        access_type: request.access_type,
                        expires_at,
                        is_active: true,
                        created_at: now,
                        revoked_at: None,
                    };
                    ids.push(permission.id.clone());
                    permissions.insert(permission.id.clone(), permission.clone());
                    GrantOutcome {
                        permission,
                        created: true,
                    }
                },
            }
        };

        info!(
            document_id = %doc.id,
            grantee = %request.grantee_id,
            access = %request.access_type,
            created = outcome.created,
            "Permissions: grant"
        );
        self.audit.append(
            AuditRecord::new(AuditEventKind::PermissionGranted, requester_id)
                .document(&doc.id)
                .payload(serde_json::json!({
                    "permissionId": outcome.permission.id,
                    "granteeId": request.grantee_id,
                    "accessType": request.access_type,
                    "expiresAt": outcome.permission.expires_at,
                    "created": outcome.created,
                })),
        );
        Ok(outcome)
    }

    /// Revoke a grant. Only the owner may revoke; revoking twice is a no-op.
    pub fn revoke(&self, permission_id: &str, requester_id: &str) -> Result<Permission, DocVerifyError> {
        let (permission, changed) = {
            let mut state = self
                .state
                .write()
                .map_err(|_| DocVerifyError::poisoned("permission ledger"))?;
            let p = state
                .permissions
                .get_mut(permission_id)
                .ok_or_else(|| DocVerifyError::not_found("permission", permission_id))?;
            if p.owner_id != requester_id {
                return Err(DocVerifyError::NotOwner {
                    document_id: p.document_id.clone(),
                    requester_id: requester_id.to_string(),
                });
            }
            let changed = p.revoked_at.is_none();
            if changed {
                p.is_active = false;
                p.revoked_at = Some(Utc::now());
            }
            (p.clone(), changed)
        };

        if changed {
            info!(permission_id, document_id = %permission.document_id, "Permissions: revoked");
        } else {
            debug!(permission_id, "Permissions: already revoked");
        }
        self.audit.append(
            AuditRecord::new(AuditEventKind::PermissionRevoked, requester_id)
                .document(&permission.document_id)
                .payload(serde_json::json!({
                    "permissionId": permission.id,
                    "granteeId": permission.grantee_id,
                    "accessType": permission.access_type,
                    "changed": changed,
                })),
        );
        Ok(permission)
    }

    /// Whether `grantee_id` holds an effective grant of exactly `access_type`.
    pub fn check(&self, document_id: &str, grantee_id: &str, access_type: AccessType) -> bool {
        let now = Utc::now();
        let allowed = match self.state.read() {
            Ok(state) => state.by_document.get(document_id).is_some_and(|ids| {
                ids.iter()
                    .filter_map(|id| state.permissions.get(id))
                    .any(|p| {
                        p.grantee_id == grantee_id
                            && p.access_type == access_type
                            && p.is_effective_at(now)
                    })
            }),
            Err(_) => {
                warn!(document_id, "Permissions: ledger lock poisoned, denying access");
                false
            },
        };

        self.audit.append(
            AuditRecord::new(AuditEventKind::AccessChecked, grantee_id)
                .document(document_id)
                .payload(serde_json::json!({
                    "accessType": access_type,
                    "allowed": allowed,
                })),
        );
        allowed
    }

    /// Deactivate every active grant whose expiry has passed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(String, String)> = {
            let Ok(mut state) = self.state.write() else {
                warn!("Permissions: ledger lock poisoned, cleanup skipped");
                return 0;
            };
            state
                .permissions
                .values_mut()
                .filter(|p| p.is_active && p.is_expired_at(now))
                .map(|p| {
                    p.is_active = false;
                    (p.id.clone(), p.document_id.clone())
                })
                .collect()
        };

        if !expired.is_empty() {
            info!(count = expired.len(), "Permissions: expired grants deactivated");
            self.audit.append(
                AuditRecord::new(AuditEventKind::PermissionsExpired, "system").payload(
                    serde_json::json!({
                        "count": expired.len(),
                        "permissionIds": expired.iter().map(|(id, _)| id).collect::<Vec<_>>(),
                    }),
                ),
            );
        }
        expired.len()
    }

    /// All grants on a document, newest first. Owner only.
    pub fn list(&self, document_id: &str, requester_id: &str) -> Result<Vec<Permission>, DocVerifyError> {
        self.documents.get_owned(document_id, requester_id)?;
        let state = self
            .state
            .read()
            .map_err(|_| DocVerifyError::poisoned("permission ledger"))?;
        Ok(state
            .by_document
            .get(document_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| state.permissions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval`
    /// until the ledger is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(ledger) = weak.upgrade() else {
                    debug!("Permissions: ledger dropped, cleanup task exiting");
                    break;
                };
                ledger.cleanup_expired();
            }
        })
    }
}
