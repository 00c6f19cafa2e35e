//! Audit recorder - immutable action trail for every mutating operation.
//!
//! The recorder is a thin facade over [`AuditStore`]: callers describe the
//! action, storage assigns sequence numbers and chain hashes. There is no
//! update or delete path. A failed append must abort the enclosing
//! operation, so `log` returns the storage error instead of swallowing it.

#![deny(unsafe_code)]

use chrono::Utc;
use covenant_storage::{AuditAppend, AuditFilter, AuditRecord, AuditStore, QueryWindow};
use covenant_types::{CoreError, CoreResult, ProjectId, UserId};
use serde_json::Value;
use std::sync::Arc;

/// One page of audit records, newest first.
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub page: usize,
    pub page_size: usize,
}

/// Append-only audit trail facade.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append one action record. `actor` is `None` for system actions and
    /// `project_id` is `None` for records outside any project scope.
    pub async fn log(
        &self,
        actor: Option<UserId>,
        project_id: Option<ProjectId>,
        action: &str,
        entity_type: &str,
        entity_id: Option<String>,
        payload: Value,
        ip: Option<String>,
    ) -> CoreResult<AuditRecord> {
        let record = self
            .store
            .append_audit(AuditAppend {
                timestamp: Utc::now(),
                actor,
                project_id,
                action: action.to_string(),
                entity_type: entity_type.to_string(),
                entity_id,
                payload,
                ip,
            })
            .await
            .map_err(CoreError::from)?;
        tracing::debug!(
            action = record.action.as_str(),
            entity_type = record.entity_type.as_str(),
            sequence = record.sequence,
            "audit appended"
        );
        Ok(record)
    }

    /// Read one page, newest first. Insertion sequence is the sort key, so
    /// pagination stays stable while concurrent inserts land.
    pub async fn query(
        &self,
        page: usize,
        page_size: usize,
        project_id: Option<ProjectId>,
        entity_type: Option<String>,
        entity_id: Option<String>,
    ) -> CoreResult<AuditPage> {
        if page_size == 0 {
            return Err(CoreError::Validation("page size must be positive".into()));
        }
        let records = self
            .store
            .list_audit(
                AuditFilter {
                    project_id,
                    entity_type,
                    entity_id,
                },
                QueryWindow {
                    limit: page_size,
                    offset: page.saturating_mul(page_size),
                },
            )
            .await
            .map_err(CoreError::from)?;
        Ok(AuditPage {
            records,
            page,
            page_size,
        })
    }

    /// Latest chain anchor, for external anchoring or verification.
    pub async fn latest_hash(&self) -> CoreResult<Option<String>> {
        self.store
            .latest_audit_hash()
            .await
            .map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_storage::memory::InMemoryCovenantStorage;

    fn recorder() -> AuditRecorder {
        AuditRecorder::new(Arc::new(InMemoryCovenantStorage::new()))
    }

    #[tokio::test]
    async fn query_pages_newest_first() {
        let recorder = recorder();
        for i in 0..5 {
            recorder
                .log(
                    Some(UserId::new("manager")),
                    Some(ProjectId::new("p1")),
                    "obligation.update",
                    "obligation",
                    Some(format!("ob-{i}")),
                    serde_json::json!({ "i": i }),
                    None,
                )
                .await
                .unwrap();
        }

        let first = recorder.query(0, 2, None, None, None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].entity_id.as_deref(), Some("ob-4"));
        assert_eq!(first.records[1].entity_id.as_deref(), Some("ob-3"));

        let second = recorder.query(1, 2, None, None, None).await.unwrap();
        assert_eq!(second.records[0].entity_id.as_deref(), Some("ob-2"));
    }

    #[tokio::test]
    async fn entity_filter_narrows_results() {
        let recorder = recorder();
        recorder
            .log(
                None,
                None,
                "sweep.run",
                "notification",
                None,
                Value::Null,
                None,
            )
            .await
            .unwrap();
        recorder
            .log(
                Some(UserId::new("manager")),
                Some(ProjectId::new("p1")),
                "grant.create",
                "grant",
                Some("p1/u1".to_string()),
                Value::Null,
                None,
            )
            .await
            .unwrap();

        let page = recorder
            .query(0, 10, None, Some("grant".to_string()), None)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].action, "grant.create");
    }

    #[tokio::test]
    async fn project_filter_hides_foreign_records() {
        let recorder = recorder();
        recorder
            .log(
                Some(UserId::new("owner-a")),
                Some(ProjectId::new("p1")),
                "contract.create",
                "contract",
                Some("c1".to_string()),
                Value::Null,
                None,
            )
            .await
            .unwrap();
        recorder
            .log(
                Some(UserId::new("owner-b")),
                Some(ProjectId::new("p2")),
                "contract.create",
                "contract",
                Some("c2".to_string()),
                Value::Null,
                None,
            )
            .await
            .unwrap();

        let page = recorder
            .query(0, 10, Some(ProjectId::new("p1")), None, None)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].entity_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let recorder = recorder();
        let result = recorder.query(0, 0, None, None, None).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
