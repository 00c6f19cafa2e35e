//! Access control guard - project-scoped permission checks.
//!
//! Every engine entry point consults this guard with an explicit
//! `(actor, required level)` pair; there is no ambient current-user state.
//! A user holds at most one active grant per project, and granting
//! replaces rather than accumulates.

#![deny(unsafe_code)]

use chrono::Utc;
use covenant_audit::AuditRecorder;
use covenant_storage::{AuditAppend, GrantStore};
use covenant_types::{AccessLevel, CoreError, CoreResult, Grant, ProjectId, UserId};
use std::sync::Arc;

/// Evaluates and mutates project permission grants.
#[derive(Clone)]
pub struct AccessGuard {
    grants: Arc<dyn GrantStore>,
    audit: AuditRecorder,
}

impl AccessGuard {
    pub fn new(grants: Arc<dyn GrantStore>, audit: AuditRecorder) -> Self {
        Self { grants, audit }
    }

    /// The user's level on the project, if any grant is active.
    pub async fn access_level(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> CoreResult<Option<AccessLevel>> {
        let grant = self
            .grants
            .get_grant(project_id, user_id)
            .await
            .map_err(CoreError::from)?;
        Ok(grant.map(|g| g.level))
    }

    /// Whether the user holds at least `minimum` on the project.
    pub async fn has_access(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        minimum: AccessLevel,
    ) -> CoreResult<bool> {
        Ok(self
            .access_level(project_id, user_id)
            .await?
            .map_or(false, |level| level >= minimum))
    }

    /// Fail with `Forbidden` unless the user holds at least `minimum`.
    pub async fn require(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        minimum: AccessLevel,
    ) -> CoreResult<AccessLevel> {
        match self.access_level(project_id, user_id).await? {
            Some(level) if level >= minimum => Ok(level),
            _ => Err(CoreError::Forbidden(format!(
                "user {} needs at least {:?} on project {}",
                user_id, minimum, project_id
            ))),
        }
    }

    /// Grant `level` to `grantee`, replacing any existing grant.
    /// The granter must hold at least Manager on the project.
    pub async fn grant(
        &self,
        project_id: &ProjectId,
        granter: &UserId,
        grantee: &UserId,
        level: AccessLevel,
    ) -> CoreResult<Grant> {
        if let Err(err) = self.require(project_id, granter, AccessLevel::Manager).await {
            self.audit_rejection(&err, "grant.create", granter, project_id, grantee)
                .await;
            return Err(err);
        }

        let grant = Grant {
            project_id: project_id.clone(),
            user_id: grantee.clone(),
            level,
            granted_by: granter.clone(),
            granted_at: Utc::now(),
        };
        // The audit entry commits with the grant or not at all.
        self.grants
            .upsert_grant(
                grant.clone(),
                Some(AuditAppend {
                    timestamp: Utc::now(),
                    actor: Some(granter.clone()),
                    project_id: Some(project_id.clone()),
                    action: "grant.create".to_string(),
                    entity_type: "grant".to_string(),
                    entity_id: Some(grant_entity_id(project_id, grantee)),
                    payload: serde_json::json!({ "level": level }),
                    ip: None,
                }),
            )
            .await
            .map_err(CoreError::from)?;

        tracing::info!(
            project = %project_id,
            grantee = %grantee,
            ?level,
            "grant created"
        );
        Ok(grant)
    }

    /// Revoke the user's grant. The revoker must hold at least Manager.
    /// Existing assignments for the revoked user remain valid; access is
    /// re-checked on each later operation, not retroactively.
    pub async fn revoke(
        &self,
        project_id: &ProjectId,
        revoker: &UserId,
        user_id: &UserId,
    ) -> CoreResult<()> {
        if let Err(err) = self.require(project_id, revoker, AccessLevel::Manager).await {
            self.audit_rejection(&err, "grant.revoke", revoker, project_id, user_id)
                .await;
            return Err(err);
        }

        let existing = self
            .grants
            .get_grant(project_id, user_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no grant for user {} on project {}",
                    user_id, project_id
                ))
            })?;

        self.grants
            .remove_grant(
                project_id,
                user_id,
                Some(AuditAppend {
                    timestamp: Utc::now(),
                    actor: Some(revoker.clone()),
                    project_id: Some(project_id.clone()),
                    action: "grant.revoke".to_string(),
                    entity_type: "grant".to_string(),
                    entity_id: Some(grant_entity_id(project_id, user_id)),
                    payload: serde_json::json!({ "revoked_level": existing.level }),
                    ip: None,
                }),
            )
            .await
            .map_err(CoreError::from)?;
        tracing::info!(project = %project_id, user = %user_id, "grant revoked");
        Ok(())
    }

    /// All active grants on a project, for administrative surfaces.
    pub async fn grants_for_project(&self, project_id: &ProjectId) -> CoreResult<Vec<Grant>> {
        self.grants
            .grants_for_project(project_id)
            .await
            .map_err(CoreError::from)
    }

    // Rejected mutations are audited too, with the rejection reason.
    async fn audit_rejection(
        &self,
        err: &CoreError,
        action: &str,
        actor: &UserId,
        project_id: &ProjectId,
        subject: &UserId,
    ) {
        tracing::warn!(
            action,
            project = %project_id,
            subject = %subject,
            reason = err.reason_code(),
            "access mutation rejected"
        );
        let _ = self
            .audit
            .log(
                Some(actor.clone()),
                Some(project_id.clone()),
                action,
                "grant",
                Some(grant_entity_id(project_id, subject)),
                serde_json::json!({ "rejected": err.reason_code() }),
                None,
            )
            .await;
    }
}

fn grant_entity_id(project_id: &ProjectId, user_id: &UserId) -> String {
    format!("{}/{}", project_id, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_storage::memory::InMemoryCovenantStorage;
    use covenant_types::Project;

    async fn guard_with_owner() -> (AccessGuard, ProjectId, UserId) {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let audit = AuditRecorder::new(storage.clone());
        let guard = AccessGuard::new(storage.clone(), audit);

        let project = Project::new("Harbor works", "Port Authority", "DE");
        let project_id = project.id.clone();
        storage.insert_project(project, None).await.unwrap();

        let owner = UserId::new("owner");
        storage
            .upsert_grant(
                Grant {
                    project_id: project_id.clone(),
                    user_id: owner.clone(),
                    level: AccessLevel::Owner,
                    granted_by: owner.clone(),
                    granted_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();
        (guard, project_id, owner)
    }

    #[tokio::test]
    async fn manager_can_grant_viewer_cannot() {
        let (guard, project_id, owner) = guard_with_owner().await;
        let manager = UserId::new("manager");
        let viewer = UserId::new("viewer");
        let outsider = UserId::new("outsider");

        guard
            .grant(&project_id, &owner, &manager, AccessLevel::Manager)
            .await
            .unwrap();
        guard
            .grant(&project_id, &manager, &viewer, AccessLevel::Viewer)
            .await
            .unwrap();

        let result = guard
            .grant(&project_id, &viewer, &outsider, AccessLevel::Viewer)
            .await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn grant_replaces_rather_than_accumulates() {
        let (guard, project_id, owner) = guard_with_owner().await;
        let user = UserId::new("user");

        guard
            .grant(&project_id, &owner, &user, AccessLevel::Contributor)
            .await
            .unwrap();
        guard
            .grant(&project_id, &owner, &user, AccessLevel::Viewer)
            .await
            .unwrap();

        assert_eq!(
            guard.access_level(&project_id, &user).await.unwrap(),
            Some(AccessLevel::Viewer)
        );
        assert!(!guard
            .has_access(&project_id, &user, AccessLevel::Contributor)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn revoke_removes_the_single_grant() {
        let (guard, project_id, owner) = guard_with_owner().await;
        let user = UserId::new("user");

        guard
            .grant(&project_id, &owner, &user, AccessLevel::Manager)
            .await
            .unwrap();
        guard.revoke(&project_id, &owner, &user).await.unwrap();

        assert_eq!(guard.access_level(&project_id, &user).await.unwrap(), None);

        let again = guard.revoke(&project_id, &owner, &user).await;
        assert!(matches!(again, Err(CoreError::NotFound(_))));
    }
}
