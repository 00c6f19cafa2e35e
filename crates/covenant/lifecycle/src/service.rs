use crate::object_store::ObjectStore;
use chrono::{NaiveDate, Utc};
use covenant_access::AccessGuard;
use covenant_audit::AuditRecorder;
use covenant_storage::{AuditAppend, CovenantStorage, FileUpload};
use covenant_types::{
    derived_status, AccessLevel, Assignment, AssignmentId, Contract, ContractFile, ContractId,
    ContractStatus, CoreError, CoreResult, Evidence, EvidenceId, FolderKind, MetadataField,
    Obligation, ObligationId, Project, ProjectId, Provenance, UserId,
};
use std::sync::Arc;
use std::time::Duration;

/// How long minted download URLs stay valid.
const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Partial edit of an obligation. Outer `None` leaves the field unchanged,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ObligationEdit {
    pub description: Option<String>,
    pub frequency: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub penalty_text: Option<Option<String>>,
}

/// Lifecycle operations for projects, contracts, obligations, assignments,
/// and evidence. Every mutation is access-checked against the owning
/// project and audited; rejections are audited too. Success audits are
/// handed to storage so they commit with the write.
#[derive(Clone)]
pub struct LifecycleService {
    storage: Arc<dyn CovenantStorage>,
    objects: Arc<dyn ObjectStore>,
    access: AccessGuard,
    audit: AuditRecorder,
}

impl LifecycleService {
    pub fn new(
        storage: Arc<dyn CovenantStorage>,
        objects: Arc<dyn ObjectStore>,
        access: AccessGuard,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            storage,
            objects,
            access,
            audit,
        }
    }

    /// Create a project. The creator receives an Owner grant.
    pub async fn create_project(
        &self,
        actor: &UserId,
        name: &str,
        client_name: &str,
        country: &str,
    ) -> CoreResult<Project> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation("project name must not be empty".into()));
        }
        let project = Project::new(name, client_name, country);
        self.storage
            .insert_project(
                project.clone(),
                Some(audit_event(
                    actor,
                    &project.id,
                    "project.create",
                    "project",
                    Some(project.id.to_string()),
                    serde_json::json!({ "name": project.name, "owner": actor }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        self.storage
            .upsert_grant(
                covenant_types::Grant {
                    project_id: project.id.clone(),
                    user_id: actor.clone(),
                    level: AccessLevel::Owner,
                    granted_by: actor.clone(),
                    granted_at: Utc::now(),
                },
                None,
            )
            .await
            .map_err(CoreError::from)?;
        tracing::info!(project = %project.id, "project created");
        Ok(project)
    }

    /// Create a contract under a project. Requires Contributor.
    pub async fn create_contract(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        title: &str,
        value_minor: Option<u64>,
    ) -> CoreResult<Contract> {
        self.require_or_audit(
            project_id,
            actor,
            AccessLevel::Contributor,
            "contract.create",
            "contract",
            None,
        )
        .await?;
        if title.trim().is_empty() {
            return Err(CoreError::Validation("contract title must not be empty".into()));
        }
        self.storage
            .get_project(project_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("project {project_id} not found")))?;

        let mut contract = Contract::new(project_id.clone(), title);
        if let Some(value) = value_minor {
            contract = contract.with_value_minor(value);
        }
        self.storage
            .insert_contract(
                contract.clone(),
                Some(audit_event(
                    actor,
                    project_id,
                    "contract.create",
                    "contract",
                    Some(contract.id.to_string()),
                    serde_json::json!({ "title": contract.title, "project_id": project_id }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(contract)
    }

    /// Move a contract between statuses. Requires Manager.
    pub async fn set_contract_status(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        status: ContractStatus,
    ) -> CoreResult<()> {
        let contract = self.contract(contract_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Manager,
            "contract.status",
            "contract",
            Some(contract_id.to_string()),
        )
        .await?;
        self.storage
            .set_contract_status(
                contract_id,
                status,
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "contract.status",
                    "contract",
                    Some(contract_id.to_string()),
                    serde_json::json!({ "from": contract.status, "to": status }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Upload one contract file version. Requires Contributor.
    ///
    /// Content is hashed before storage; re-uploading bytes identical to
    /// the latest version in the same folder is a no-op that returns the
    /// existing record with `created == false`.
    pub async fn upload_contract_file(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
        bytes: Vec<u8>,
    ) -> CoreResult<(ContractFile, bool)> {
        let contract = self.contract(contract_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Contributor,
            "contract.file_upload",
            "contract_file",
            Some(contract_id.to_string()),
        )
        .await?;
        if !contract.status.accepts_writes() {
            return Err(CoreError::Validation(format!(
                "contract {} is {:?} and no longer accepts uploads",
                contract_id, contract.status
            )));
        }

        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        let object_key = format!("contracts/{}/{:?}/{}", contract_id, folder, &content_hash);
        let size_bytes = bytes.len() as u64;

        // Store the bytes before the version row exists, so a failed put
        // leaves no row pointing at a missing object. The key is derived
        // from the content hash, so a duplicate upload rewrites the same
        // object with identical bytes.
        self.objects.put(&object_key, bytes).await?;

        let (file, created) = self
            .storage
            .append_file_version(
                FileUpload {
                    contract_id: contract_id.clone(),
                    folder,
                    object_key: object_key.clone(),
                    content_hash: content_hash.clone(),
                    uploaded_by: actor.clone(),
                    size_bytes,
                },
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "contract.file_upload",
                    "contract_file",
                    Some(contract_id.to_string()),
                    serde_json::json!({
                        "contract_id": contract_id,
                        "folder": format!("{folder:?}"),
                        "content_hash": content_hash,
                    }),
                )),
            )
            .await
            .map_err(CoreError::from)?;

        if created {
            tracing::info!(
                contract = %contract_id,
                version = file.version,
                "contract file version stored"
            );
        } else {
            tracing::debug!(contract = %contract_id, "duplicate upload deduplicated");
        }
        Ok((file, created))
    }

    /// Latest file version in a folder. Requires Viewer.
    pub async fn latest_file(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> CoreResult<Option<ContractFile>> {
        let contract = self.contract(contract_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        self.storage
            .latest_file(contract_id, folder)
            .await
            .map_err(CoreError::from)
    }

    /// All file versions of a contract. Requires Viewer.
    pub async fn list_files(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<ContractFile>> {
        let contract = self.contract(contract_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        self.storage
            .list_files(contract_id)
            .await
            .map_err(CoreError::from)
    }

    /// Mint a time-limited download URL for the latest file in a folder.
    /// Requires Viewer.
    pub async fn download_url(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> CoreResult<String> {
        let file = self
            .latest_file(actor, contract_id, folder)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no file in {:?} for contract {}",
                    folder, contract_id
                ))
            })?;
        self.objects.signed_url(&file.object_key, DOWNLOAD_URL_TTL).await
    }

    /// Set a Manual metadata field. Requires Contributor. Manual entries
    /// shadow any AI entry under the same key.
    pub async fn set_metadata_manual(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        key: &str,
        value: &str,
    ) -> CoreResult<MetadataField> {
        let contract = self.contract(contract_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Contributor,
            "metadata.set",
            "metadata",
            Some(format!("{contract_id}/{key}")),
        )
        .await?;
        if !contract.status.accepts_writes() {
            return Err(CoreError::Validation(format!(
                "contract {} is {:?} and no longer accepts writes",
                contract_id, contract.status
            )));
        }
        if key.trim().is_empty() {
            return Err(CoreError::Validation("metadata key must not be empty".into()));
        }

        let field = MetadataField {
            contract_id: contract_id.clone(),
            key: key.to_string(),
            value: value.to_string(),
            provenance: Provenance::Manual,
            confidence: None,
            offsets: None,
            updated_at: Utc::now(),
        };
        self.storage
            .upsert_metadata(
                field.clone(),
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "metadata.set",
                    "metadata",
                    Some(format!("{contract_id}/{key}")),
                    serde_json::json!({ "value": value }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(field)
    }

    /// Contract metadata with Manual shadowing applied: at most one field
    /// per key, Manual preferred.
    pub async fn effective_metadata(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<MetadataField>> {
        let contract = self.contract(contract_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        let mut fields = self
            .storage
            .list_metadata(contract_id)
            .await
            .map_err(CoreError::from)?;
        fields.sort_by(|a, b| a.key.cmp(&b.key));
        let mut effective: Vec<MetadataField> = Vec::new();
        for field in fields {
            match effective.last_mut() {
                Some(last) if last.key == field.key => {
                    if field.provenance == Provenance::Manual {
                        *last = field;
                    }
                }
                _ => effective.push(field),
            }
        }
        Ok(effective)
    }

    /// Create a Manual obligation. Requires Contributor.
    pub async fn create_obligation(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        description: &str,
        due_date: Option<NaiveDate>,
        penalty_text: Option<&str>,
        frequency: Option<&str>,
    ) -> CoreResult<Obligation> {
        let contract = self.contract(contract_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Contributor,
            "obligation.create",
            "obligation",
            Some(contract_id.to_string()),
        )
        .await?;
        if !contract.status.accepts_writes() {
            return Err(CoreError::Validation(format!(
                "contract {} is {:?} and no longer accepts writes",
                contract_id, contract.status
            )));
        }
        if description.trim().is_empty() {
            return Err(CoreError::Validation(
                "obligation description must not be empty".into(),
            ));
        }

        let mut obligation = Obligation::manual(contract_id.clone(), description);
        if let Some(due) = due_date {
            obligation = obligation.with_due_date(due);
        }
        if let Some(penalty) = penalty_text {
            obligation = obligation.with_penalty_text(penalty);
        }
        if let Some(freq) = frequency {
            obligation = obligation.with_frequency(freq);
        }
        self.storage
            .insert_obligation(
                obligation.clone(),
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "obligation.create",
                    "obligation",
                    Some(obligation.id.to_string()),
                    serde_json::json!({ "contract_id": contract_id, "description": description }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(obligation)
    }

    /// Edit an obligation. Requires Contributor. A manual edit makes the
    /// record authoritative: provenance flips to Manual and the AI
    /// confidence is dropped, so later merges can no longer change it.
    pub async fn edit_obligation(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
        edit: ObligationEdit,
    ) -> CoreResult<Obligation> {
        let (mut obligation, contract) = self.obligation_with_contract(obligation_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Contributor,
            "obligation.update",
            "obligation",
            Some(obligation_id.to_string()),
        )
        .await?;
        if !contract.status.accepts_writes() {
            return Err(CoreError::Validation(format!(
                "contract {} is {:?} and no longer accepts writes",
                contract.id, contract.status
            )));
        }

        let before = serde_json::json!({
            "description": obligation.description,
            "due_date": obligation.due_date,
            "penalty_text": obligation.penalty_text,
        });
        if let Some(description) = edit.description {
            if description.trim().is_empty() {
                return Err(CoreError::Validation(
                    "obligation description must not be empty".into(),
                ));
            }
            obligation.description = description;
        }
        if let Some(frequency) = edit.frequency {
            obligation.frequency = frequency;
        }
        if let Some(due_date) = edit.due_date {
            obligation.due_date = due_date;
        }
        if let Some(penalty_text) = edit.penalty_text {
            obligation.penalty_text = penalty_text;
        }
        obligation.provenance = Provenance::Manual;
        obligation.confidence = None;
        obligation.updated_at = Utc::now();

        self.storage
            .update_obligation(
                obligation.clone(),
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "obligation.update",
                    "obligation",
                    Some(obligation_id.to_string()),
                    serde_json::json!({
                        "before": before,
                        "after": {
                            "description": obligation.description,
                            "due_date": obligation.due_date,
                            "penalty_text": obligation.penalty_text,
                        },
                    }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(obligation)
    }

    /// Obligations of a contract. Requires Viewer.
    pub async fn list_obligations(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<Obligation>> {
        let contract = self.contract(contract_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        self.storage
            .list_obligations(contract_id)
            .await
            .map_err(CoreError::from)
    }

    /// Assign an obligation to a user. Requires Contributor; the assignee
    /// must hold at least Viewer on the project.
    pub async fn create_assignment(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
        assignee: &UserId,
    ) -> CoreResult<Assignment> {
        let (obligation, contract) = self.obligation_with_contract(obligation_id).await?;
        self.require_or_audit(
            &contract.project_id,
            actor,
            AccessLevel::Contributor,
            "assignment.create",
            "assignment",
            Some(obligation_id.to_string()),
        )
        .await?;
        if !self
            .access
            .has_access(&contract.project_id, assignee, AccessLevel::Viewer)
            .await?
        {
            return Err(CoreError::Forbidden(format!(
                "assignee {} holds no grant on project {}",
                assignee, contract.project_id
            )));
        }

        let assignment = Assignment::new(obligation.id.clone(), assignee.clone());
        self.storage
            .insert_assignment(
                assignment.clone(),
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "assignment.create",
                    "assignment",
                    Some(assignment.id.to_string()),
                    serde_json::json!({ "obligation_id": obligation_id, "assignee": assignee }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(assignment)
    }

    /// Update assignment progress with optimistic concurrency. The caller
    /// must be the assignee or hold Manager. A stale `expected_revision`
    /// fails with `Conflict` and writes nothing.
    pub async fn update_assignment_progress(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        expected_revision: u64,
        percent_complete: u8,
    ) -> CoreResult<Assignment> {
        if percent_complete > 100 {
            return Err(CoreError::Validation(format!(
                "percent complete must be 0-100, got {percent_complete}"
            )));
        }
        let (assignment, _, contract) = self.assignment_context(assignment_id).await?;
        if assignment.assignee != *actor {
            self.require_or_audit(
                &contract.project_id,
                actor,
                AccessLevel::Manager,
                "assignment.progress",
                "assignment",
                Some(assignment_id.to_string()),
            )
            .await?;
        }

        let event = audit_event(
            actor,
            &contract.project_id,
            "assignment.progress",
            "assignment",
            Some(assignment_id.to_string()),
            serde_json::json!({
                "from_percent": assignment.percent_complete,
                "to_percent": percent_complete,
                "status": format!("{:?}", derived_status(percent_complete)),
            }),
        );
        match self
            .storage
            .update_assignment_progress(
                assignment_id,
                expected_revision,
                percent_complete,
                Some(event),
            )
            .await
        {
            Ok(updated) => Ok(updated),
            Err(err) => {
                let err = CoreError::from(err);
                if matches!(err, CoreError::Conflict(_)) {
                    self.audit_rejection(
                        &err,
                        actor,
                        &contract.project_id,
                        "assignment.progress",
                        "assignment",
                        Some(assignment_id.to_string()),
                    )
                    .await;
                }
                Err(err)
            }
        }
    }

    /// Attach evidence to an assignment. The caller must be the assignee
    /// or hold Contributor. Evidence never changes assignment status.
    pub async fn upload_evidence(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        bytes: Vec<u8>,
        note: Option<&str>,
    ) -> CoreResult<Evidence> {
        let (assignment, _, contract) = self.assignment_context(assignment_id).await?;
        if assignment.assignee != *actor {
            self.require_or_audit(
                &contract.project_id,
                actor,
                AccessLevel::Contributor,
                "evidence.upload",
                "evidence",
                Some(assignment_id.to_string()),
            )
            .await?;
        }

        let evidence_id = EvidenceId::generate();
        let object_key = format!("evidence/{}/{}", assignment_id, evidence_id);
        self.objects.put(&object_key, bytes).await?;

        let evidence = Evidence {
            id: evidence_id,
            assignment_id: assignment_id.clone(),
            object_key,
            uploaded_by: actor.clone(),
            note: note.map(str::to_string),
            uploaded_at: Utc::now(),
        };
        self.storage
            .append_evidence(
                evidence.clone(),
                Some(audit_event(
                    actor,
                    &contract.project_id,
                    "evidence.upload",
                    "evidence",
                    Some(evidence.id.to_string()),
                    serde_json::json!({ "assignment_id": assignment_id }),
                )),
            )
            .await
            .map_err(CoreError::from)?;
        Ok(evidence)
    }

    /// Evidence attached to an assignment. Requires Viewer.
    pub async fn list_evidence(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
    ) -> CoreResult<Vec<Evidence>> {
        let (_, _, contract) = self.assignment_context(assignment_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        self.storage
            .list_evidence(assignment_id)
            .await
            .map_err(CoreError::from)
    }

    /// Assignments of an obligation. Requires Viewer.
    pub async fn list_assignments(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
    ) -> CoreResult<Vec<Assignment>> {
        let (_, contract) = self.obligation_with_contract(obligation_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        self.storage
            .list_assignments(obligation_id)
            .await
            .map_err(CoreError::from)
    }

    async fn contract(&self, contract_id: &ContractId) -> CoreResult<Contract> {
        self.storage
            .get_contract(contract_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("contract {contract_id} not found")))
    }

    async fn obligation_with_contract(
        &self,
        obligation_id: &ObligationId,
    ) -> CoreResult<(Obligation, Contract)> {
        let obligation = self
            .storage
            .get_obligation(obligation_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {obligation_id} not found")))?;
        let contract = self.contract(&obligation.contract_id).await?;
        Ok((obligation, contract))
    }

    async fn assignment_context(
        &self,
        assignment_id: &AssignmentId,
    ) -> CoreResult<(Assignment, Obligation, Contract)> {
        let assignment = self
            .storage
            .get_assignment(assignment_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("assignment {assignment_id} not found")))?;
        let (obligation, contract) = self
            .obligation_with_contract(&assignment.obligation_id)
            .await?;
        Ok((assignment, obligation, contract))
    }

    async fn require_or_audit(
        &self,
        project_id: &ProjectId,
        actor: &UserId,
        minimum: AccessLevel,
        action: &str,
        entity_type: &str,
        entity_id: Option<String>,
    ) -> CoreResult<AccessLevel> {
        match self.access.require(project_id, actor, minimum).await {
            Ok(level) => Ok(level),
            Err(err) => {
                self.audit_rejection(&err, actor, project_id, action, entity_type, entity_id)
                    .await;
                Err(err)
            }
        }
    }

    // Rejected mutations leave a trace with the rejection reason. Audit
    // failure here must not mask the original error.
    async fn audit_rejection(
        &self,
        err: &CoreError,
        actor: &UserId,
        project_id: &ProjectId,
        action: &str,
        entity_type: &str,
        entity_id: Option<String>,
    ) {
        tracing::warn!(action, reason = err.reason_code(), "mutation rejected");
        let _ = self
            .audit
            .log(
                Some(actor.clone()),
                Some(project_id.clone()),
                action,
                entity_type,
                entity_id,
                serde_json::json!({ "rejected": err.reason_code() }),
                None,
            )
            .await;
    }
}

fn audit_event(
    actor: &UserId,
    project_id: &ProjectId,
    action: &str,
    entity_type: &str,
    entity_id: Option<String>,
    payload: serde_json::Value,
) -> AuditAppend {
    AuditAppend {
        timestamp: Utc::now(),
        actor: Some(actor.clone()),
        project_id: Some(project_id.clone()),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        payload,
        ip: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use covenant_storage::memory::InMemoryCovenantStorage;
    use covenant_storage::{
        AssignmentStore, AuditFilter, AuditStore, ContractStore, GrantStore, ObligationStore,
        QueryWindow,
    };
    use covenant_types::AssignmentStatus;

    struct Fixture {
        service: LifecycleService,
        storage: Arc<InMemoryCovenantStorage>,
        objects: Arc<FlakyObjectStore>,
        owner: UserId,
        project_id: ProjectId,
    }

    /// Object store whose puts can be made to fail, for outage scenarios.
    #[derive(Default)]
    struct FlakyObjectStore {
        inner: InMemoryObjectStore,
        fail_puts: std::sync::atomic::AtomicBool,
    }

    impl FlakyObjectStore {
        fn fail_puts(&self, fail: bool) {
            self.fail_puts
                .store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl ObjectStore for FlakyObjectStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> CoreResult<()> {
            if self.fail_puts.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoreError::Storage("object backend unavailable".into()));
            }
            self.inner.put(key, bytes).await
        }

        async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> CoreResult<()> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> CoreResult<bool> {
            self.inner.exists(key).await
        }

        async fn signed_url(&self, key: &str, expires_in: Duration) -> CoreResult<String> {
            self.inner.signed_url(key, expires_in).await
        }
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let audit = AuditRecorder::new(storage.clone());
        let access = AccessGuard::new(storage.clone(), audit.clone());
        let objects = Arc::new(FlakyObjectStore::default());
        let service = LifecycleService::new(storage.clone(), objects.clone(), access, audit);

        let owner = UserId::new("owner");
        let project = service
            .create_project(&owner, "Metro line", "City of Lyon", "FR")
            .await
            .unwrap();
        Fixture {
            service,
            storage,
            objects,
            owner,
            project_id: project.id,
        }
    }

    #[tokio::test]
    async fn project_creator_becomes_owner() {
        let f = fixture().await;
        let grant = f
            .storage
            .get_grant(&f.project_id, &f.owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.level, AccessLevel::Owner);
    }

    #[tokio::test]
    async fn duplicate_upload_is_deduplicated_per_folder() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();

        let (first, created) = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Original, b"pdf".to_vec())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.version, 1);

        let (again, created) = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Original, b"pdf".to_vec())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        // Same bytes in another folder are a distinct version line.
        let (amendment, created) = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Amendment, b"pdf".to_vec())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(amendment.version, 1);

        let url = f
            .service
            .download_url(&f.owner, &contract.id, FolderKind::Original)
            .await
            .unwrap();
        assert!(url.contains(&first.object_key));
    }

    #[tokio::test]
    async fn failed_object_put_leaves_no_version_row() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();

        f.objects.fail_puts(true);
        let failed = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Original, b"pdf".to_vec())
            .await;
        assert!(matches!(failed, Err(CoreError::Storage(_))));
        assert!(f.storage.list_files(&contract.id).await.unwrap().is_empty());

        // A retry after the outage must not dedup against a phantom row.
        f.objects.fail_puts(false);
        let (file, created) = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Original, b"pdf".to_vec())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(file.version, 1);
        assert!(f.objects.exists(&file.object_key).await.unwrap());
    }

    #[tokio::test]
    async fn terminated_contract_rejects_writes() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();
        f.service
            .set_contract_status(&f.owner, &contract.id, ContractStatus::Terminated)
            .await
            .unwrap();

        let upload = f
            .service
            .upload_contract_file(&f.owner, &contract.id, FolderKind::Original, b"pdf".to_vec())
            .await;
        assert!(matches!(upload, Err(CoreError::Validation(_))));

        let obligation = f
            .service
            .create_obligation(&f.owner, &contract.id, "Report monthly", None, None, None)
            .await;
        assert!(matches!(obligation, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_edit_flips_provenance_to_manual() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();
        let mut seeded = Obligation::manual(contract.id.clone(), "Deliver safety audit");
        seeded.provenance = Provenance::Ai;
        seeded.confidence = Some(0.8);
        f.storage
            .insert_obligation(seeded.clone(), None)
            .await
            .unwrap();

        let edited = f
            .service
            .edit_obligation(
                &f.owner,
                &seeded.id,
                ObligationEdit {
                    due_date: Some(NaiveDate::from_ymd_opt(2026, 10, 1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.provenance, Provenance::Manual);
        assert_eq!(edited.confidence, None);
        assert_eq!(edited.due_date, NaiveDate::from_ymd_opt(2026, 10, 1));
    }

    #[tokio::test]
    async fn effective_metadata_prefers_manual() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();

        f.storage
            .upsert_metadata(
                MetadataField {
                    contract_id: contract.id.clone(),
                    key: "ClientName".into(),
                    value: "Wrong".into(),
                    provenance: Provenance::Ai,
                    confidence: Some(0.9),
                    offsets: None,
                    updated_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();
        f.service
            .set_metadata_manual(&f.owner, &contract.id, "ClientName", "City of Lyon")
            .await
            .unwrap();

        let effective = f
            .service
            .effective_metadata(&f.owner, &contract.id)
            .await
            .unwrap();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].value, "City of Lyon");
        assert_eq!(effective[0].provenance, Provenance::Manual);
    }

    #[tokio::test]
    async fn assignment_requires_assignee_grant_and_tracks_progress() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();
        let obligation = f
            .service
            .create_obligation(&f.owner, &contract.id, "Report monthly", None, None, None)
            .await
            .unwrap();

        // An assignee without any grant on the project is refused outright.
        let stranger = UserId::new("stranger");
        let rejected = f
            .service
            .create_assignment(&f.owner, &obligation.id, &stranger)
            .await;
        assert!(matches!(rejected, Err(CoreError::Forbidden(_))));

        let assignee = UserId::new("assignee");
        f.storage
            .upsert_grant(
                covenant_types::Grant {
                    project_id: f.project_id.clone(),
                    user_id: assignee.clone(),
                    level: AccessLevel::Viewer,
                    granted_by: f.owner.clone(),
                    granted_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();
        let assignment = f
            .service
            .create_assignment(&f.owner, &obligation.id, &assignee)
            .await
            .unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Open);

        // The assignee can update their own assignment without Manager.
        let updated = f
            .service
            .update_assignment_progress(&assignee, &assignment.id, 0, 100)
            .await
            .unwrap();
        assert_eq!(updated.status, AssignmentStatus::Completed);
        assert_eq!(updated.revision, 1);

        // A Viewer who is not the assignee cannot touch it.
        let viewer = UserId::new("viewer");
        f.storage
            .upsert_grant(
                covenant_types::Grant {
                    project_id: f.project_id.clone(),
                    user_id: viewer.clone(),
                    level: AccessLevel::Viewer,
                    granted_by: f.owner.clone(),
                    granted_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();
        let forbidden = f
            .service
            .update_assignment_progress(&viewer, &assignment.id, 1, 50)
            .await;
        assert!(matches!(forbidden, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn stale_progress_update_conflicts_and_is_audited() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();
        let obligation = f
            .service
            .create_obligation(&f.owner, &contract.id, "Report monthly", None, None, None)
            .await
            .unwrap();
        let assignment = f
            .service
            .create_assignment(&f.owner, &obligation.id, &f.owner)
            .await
            .unwrap();

        f.service
            .update_assignment_progress(&f.owner, &assignment.id, 0, 40)
            .await
            .unwrap();
        let stale = f
            .service
            .update_assignment_progress(&f.owner, &assignment.id, 0, 60)
            .await;
        assert!(matches!(stale, Err(CoreError::Conflict(_))));

        let rejections = f
            .storage
            .list_audit(
                AuditFilter {
                    entity_type: Some("assignment".into()),
                    entity_id: Some(assignment.id.to_string()),
                    ..Default::default()
                },
                QueryWindow::default(),
            )
            .await
            .unwrap()
            .into_iter()
            .filter(|record| record.payload.get("rejected").is_some())
            .count();
        assert_eq!(rejections, 1);
    }

    #[tokio::test]
    async fn evidence_upload_keeps_assignment_status() {
        let f = fixture().await;
        let contract = f
            .service
            .create_contract(&f.owner, &f.project_id, "Tunnel works", None)
            .await
            .unwrap();
        let obligation = f
            .service
            .create_obligation(&f.owner, &contract.id, "Report monthly", None, None, None)
            .await
            .unwrap();
        let assignment = f
            .service
            .create_assignment(&f.owner, &obligation.id, &f.owner)
            .await
            .unwrap();

        f.service
            .upload_evidence(&f.owner, &assignment.id, b"photo".to_vec(), Some("site photo"))
            .await
            .unwrap();

        let stored = f
            .storage
            .get_assignment(&assignment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.percent_complete, 0);
        assert_eq!(stored.status, AssignmentStatus::Open);
        assert_eq!(
            f.service
                .list_evidence(&f.owner, &assignment.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
