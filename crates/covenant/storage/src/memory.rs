//! In-memory reference implementation for covenant storage traits.
//!
//! This adapter is deterministic and test-friendly. Production deployments
//! should use a transactional backend for source-of-truth data. Lock
//! acquisition follows a fixed order (contracts, files, metadata,
//! obligations, assignments, evidence, risks, notifications, audits) so
//! multi-table operations cannot deadlock.

use crate::model::{AuditAppend, AuditFilter, AuditRecord, ClaimOutcome, FileUpload, MergeBatch};
use crate::traits::{
    AssignmentStore, AuditStore, ContractStore, GrantStore, NotificationStore, ObligationStore,
    QueryWindow, RiskStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use covenant_types::{
    derived_status, Assignment, AssignmentId, Contract, ContractFile, ContractId, ContractStatus,
    Evidence, FileId, FolderKind, Grant, MetadataField, Notification, NotificationState,
    Obligation, ObligationId, PenaltyRisk, Project, ProjectId, Provenance, UserId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

type MetadataKey = (ContractId, String, Provenance);

/// In-memory covenant storage adapter.
#[derive(Default)]
pub struct InMemoryCovenantStorage {
    projects: RwLock<HashMap<ProjectId, Project>>,
    grants: RwLock<HashMap<(ProjectId, UserId), Grant>>,
    contracts: RwLock<HashMap<ContractId, Contract>>,
    files: RwLock<HashMap<ContractId, Vec<ContractFile>>>,
    metadata: RwLock<HashMap<MetadataKey, MetadataField>>,
    obligations: RwLock<HashMap<ObligationId, Obligation>>,
    assignments: RwLock<HashMap<AssignmentId, Assignment>>,
    evidence: RwLock<HashMap<AssignmentId, Vec<Evidence>>>,
    risks: RwLock<HashMap<ObligationId, Vec<PenaltyRisk>>>,
    notifications: RwLock<HashMap<String, Notification>>,
    audits: RwLock<Vec<AuditRecord>>,
}

impl InMemoryCovenantStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the optional audit entry for a mutation. Called after the
    /// mutation is validated and while its table lock is still held, so
    /// the write and its audit entry commit together and an audit failure
    /// aborts the operation before the table changes.
    fn commit_audit(&self, audit: Option<AuditAppend>) -> StorageResult<()> {
        if let Some(event) = audit {
            let mut audits = self.audits.write().map_err(|_| poisoned("audits"))?;
            append_audit_locked(&mut audits, event)?;
        }
        Ok(())
    }
}

fn poisoned(table: &str) -> StorageError {
    StorageError::Backend(format!("{table} lock poisoned"))
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

fn append_audit_locked(
    guard: &mut RwLockWriteGuard<'_, Vec<AuditRecord>>,
    event: AuditAppend,
) -> StorageResult<AuditRecord> {
    let previous_hash = guard.last().map(|e| e.hash.clone());
    let sequence = guard.len() as u64 + 1;
    let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence)?;

    let record = AuditRecord {
        event_id: format!("audit-{}", Uuid::new_v4()),
        sequence,
        timestamp: event.timestamp,
        actor: event.actor,
        project_id: event.project_id,
        action: event.action,
        entity_type: event.entity_type,
        entity_id: event.entity_id,
        payload: event.payload,
        ip: event.ip,
        previous_hash,
        hash,
    };

    guard.push(record.clone());
    Ok(record)
}

fn compute_audit_hash(
    event: &AuditAppend,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": event.timestamp,
        "actor": event.actor.as_ref().map(|id| id.0.clone()),
        "project_id": event.project_id.as_ref().map(|id| id.0.clone()),
        "action": event.action,
        "entity_type": event.entity_type,
        "entity_id": event.entity_id,
        "payload": event.payload,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

#[async_trait]
impl GrantStore for InMemoryCovenantStorage {
    async fn insert_project(
        &self,
        project: Project,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let mut guard = self.projects.write().map_err(|_| poisoned("projects"))?;
        if guard.contains_key(&project.id) {
            return Err(StorageError::Conflict(format!(
                "project {} already exists",
                project.id
            )));
        }
        self.commit_audit(audit)?;
        guard.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, project_id: &ProjectId) -> StorageResult<Option<Project>> {
        let guard = self.projects.read().map_err(|_| poisoned("projects"))?;
        Ok(guard.get(project_id).cloned())
    }

    async fn upsert_grant(&self, grant: Grant, audit: Option<AuditAppend>) -> StorageResult<()> {
        let projects = self.projects.read().map_err(|_| poisoned("projects"))?;
        if !projects.contains_key(&grant.project_id) {
            return Err(StorageError::NotFound(format!(
                "project {} not found",
                grant.project_id
            )));
        }
        drop(projects);

        let mut guard = self.grants.write().map_err(|_| poisoned("grants"))?;
        self.commit_audit(audit)?;
        guard.insert((grant.project_id.clone(), grant.user_id.clone()), grant);
        Ok(())
    }

    async fn remove_grant(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        audit: Option<AuditAppend>,
    ) -> StorageResult<Option<Grant>> {
        let mut guard = self.grants.write().map_err(|_| poisoned("grants"))?;
        if !guard.contains_key(&(project_id.clone(), user_id.clone())) {
            return Ok(None);
        }
        self.commit_audit(audit)?;
        Ok(guard.remove(&(project_id.clone(), user_id.clone())))
    }

    async fn get_grant(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> StorageResult<Option<Grant>> {
        let guard = self.grants.read().map_err(|_| poisoned("grants"))?;
        Ok(guard.get(&(project_id.clone(), user_id.clone())).cloned())
    }

    async fn grants_for_project(&self, project_id: &ProjectId) -> StorageResult<Vec<Grant>> {
        let guard = self.grants.read().map_err(|_| poisoned("grants"))?;
        let mut grants = guard
            .values()
            .filter(|grant| &grant.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();
        grants.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(grants)
    }
}

#[async_trait]
impl ContractStore for InMemoryCovenantStorage {
    async fn insert_contract(
        &self,
        contract: Contract,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let projects = self.projects.read().map_err(|_| poisoned("projects"))?;
        if !projects.contains_key(&contract.project_id) {
            return Err(StorageError::NotFound(format!(
                "project {} not found",
                contract.project_id
            )));
        }
        drop(projects);

        let mut guard = self.contracts.write().map_err(|_| poisoned("contracts"))?;
        if guard.contains_key(&contract.id) {
            return Err(StorageError::Conflict(format!(
                "contract {} already exists",
                contract.id
            )));
        }
        self.commit_audit(audit)?;
        guard.insert(contract.id.clone(), contract);
        Ok(())
    }

    async fn get_contract(&self, contract_id: &ContractId) -> StorageResult<Option<Contract>> {
        let guard = self.contracts.read().map_err(|_| poisoned("contracts"))?;
        Ok(guard.get(contract_id).cloned())
    }

    async fn set_contract_status(
        &self,
        contract_id: &ContractId,
        status: ContractStatus,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let mut guard = self.contracts.write().map_err(|_| poisoned("contracts"))?;
        let contract = guard.get_mut(contract_id).ok_or_else(|| {
            StorageError::NotFound(format!("contract {} not found", contract_id))
        })?;
        self.commit_audit(audit)?;
        contract.status = status;
        contract.updated_at = Utc::now();
        Ok(())
    }

    async fn append_file_version(
        &self,
        upload: FileUpload,
        audit: Option<AuditAppend>,
    ) -> StorageResult<(ContractFile, bool)> {
        let mut guard = self.files.write().map_err(|_| poisoned("files"))?;
        let versions = guard.entry(upload.contract_id.clone()).or_default();

        let latest = versions
            .iter()
            .filter(|file| file.folder == upload.folder)
            .max_by_key(|file| file.version);

        if let Some(existing) = latest {
            if existing.content_hash == upload.content_hash {
                return Ok((existing.clone(), false));
            }
        }

        let version = latest.map(|file| file.version + 1).unwrap_or(1);
        self.commit_audit(audit)?;
        let file = ContractFile {
            id: FileId::generate(),
            contract_id: upload.contract_id,
            folder: upload.folder,
            object_key: upload.object_key,
            content_hash: upload.content_hash,
            version,
            uploaded_by: upload.uploaded_by,
            size_bytes: upload.size_bytes,
            uploaded_at: Utc::now(),
        };
        versions.push(file.clone());
        Ok((file, true))
    }

    async fn latest_file(
        &self,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> StorageResult<Option<ContractFile>> {
        let guard = self.files.read().map_err(|_| poisoned("files"))?;
        Ok(guard.get(contract_id).and_then(|versions| {
            versions
                .iter()
                .filter(|file| file.folder == folder)
                .max_by_key(|file| file.version)
                .cloned()
        }))
    }

    async fn list_files(&self, contract_id: &ContractId) -> StorageResult<Vec<ContractFile>> {
        let guard = self.files.read().map_err(|_| poisoned("files"))?;
        let mut files = guard.get(contract_id).cloned().unwrap_or_default();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(files)
    }

    async fn upsert_metadata(
        &self,
        field: MetadataField,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let mut guard = self.metadata.write().map_err(|_| poisoned("metadata"))?;
        self.commit_audit(audit)?;
        guard.insert(
            (field.contract_id.clone(), field.key.clone(), field.provenance),
            field,
        );
        Ok(())
    }

    async fn get_metadata(
        &self,
        contract_id: &ContractId,
        key: &str,
        provenance: Provenance,
    ) -> StorageResult<Option<MetadataField>> {
        let guard = self.metadata.read().map_err(|_| poisoned("metadata"))?;
        Ok(guard
            .get(&(contract_id.clone(), key.to_string(), provenance))
            .cloned())
    }

    async fn list_metadata(&self, contract_id: &ContractId) -> StorageResult<Vec<MetadataField>> {
        let guard = self.metadata.read().map_err(|_| poisoned("metadata"))?;
        let mut fields = guard
            .values()
            .filter(|field| &field.contract_id == contract_id)
            .cloned()
            .collect::<Vec<_>>();
        fields.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(fields)
    }
}

#[async_trait]
impl ObligationStore for InMemoryCovenantStorage {
    async fn insert_obligation(
        &self,
        obligation: Obligation,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let contracts = self.contracts.read().map_err(|_| poisoned("contracts"))?;
        if !contracts.contains_key(&obligation.contract_id) {
            return Err(StorageError::NotFound(format!(
                "contract {} not found",
                obligation.contract_id
            )));
        }
        drop(contracts);

        let mut guard = self
            .obligations
            .write()
            .map_err(|_| poisoned("obligations"))?;
        if guard.contains_key(&obligation.id) {
            return Err(StorageError::Conflict(format!(
                "obligation {} already exists",
                obligation.id
            )));
        }
        self.commit_audit(audit)?;
        guard.insert(obligation.id.clone(), obligation);
        Ok(())
    }

    async fn get_obligation(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Option<Obligation>> {
        let guard = self
            .obligations
            .read()
            .map_err(|_| poisoned("obligations"))?;
        Ok(guard.get(obligation_id).cloned())
    }

    async fn update_obligation(
        &self,
        obligation: Obligation,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let mut guard = self
            .obligations
            .write()
            .map_err(|_| poisoned("obligations"))?;
        if !guard.contains_key(&obligation.id) {
            return Err(StorageError::NotFound(format!(
                "obligation {} not found",
                obligation.id
            )));
        }
        self.commit_audit(audit)?;
        guard.insert(obligation.id.clone(), obligation);
        Ok(())
    }

    async fn list_obligations(&self, contract_id: &ContractId) -> StorageResult<Vec<Obligation>> {
        let guard = self
            .obligations
            .read()
            .map_err(|_| poisoned("obligations"))?;
        let mut obligations = guard
            .values()
            .filter(|obligation| &obligation.contract_id == contract_id)
            .cloned()
            .collect::<Vec<_>>();
        obligations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(obligations)
    }

    async fn list_active_obligations(&self) -> StorageResult<Vec<Obligation>> {
        let obligations = self
            .obligations
            .read()
            .map_err(|_| poisoned("obligations"))?;
        let assignments = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignments"))?;

        let mut active = obligations
            .values()
            .filter(|obligation| {
                let mut any = false;
                let mut all_complete = true;
                for assignment in assignments.values() {
                    if assignment.obligation_id == obligation.id {
                        any = true;
                        all_complete &= assignment.percent_complete == 100;
                    }
                }
                // Unassigned obligations are still open.
                !any || !all_complete
            })
            .cloned()
            .collect::<Vec<_>>();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn apply_merge_batch(
        &self,
        contract_id: &ContractId,
        batch: MergeBatch,
    ) -> StorageResult<()> {
        // Validate everything before taking write locks.
        {
            let contracts = self.contracts.read().map_err(|_| poisoned("contracts"))?;
            if !contracts.contains_key(contract_id) {
                return Err(StorageError::NotFound(format!(
                    "contract {} not found",
                    contract_id
                )));
            }
        }
        for obligation in batch
            .insert_obligations
            .iter()
            .chain(batch.update_obligations.iter())
        {
            if &obligation.contract_id != contract_id {
                return Err(StorageError::InvalidInput(format!(
                    "obligation {} belongs to contract {}, batch targets {}",
                    obligation.id, obligation.contract_id, contract_id
                )));
            }
        }
        for field in &batch.upsert_fields {
            if &field.contract_id != contract_id {
                return Err(StorageError::InvalidInput(format!(
                    "field '{}' belongs to contract {}, batch targets {}",
                    field.key, field.contract_id, contract_id
                )));
            }
        }

        // One critical section over every table the batch touches, so a
        // concurrent reader sees either none or all of the merge.
        let mut metadata = self.metadata.write().map_err(|_| poisoned("metadata"))?;
        let mut obligations = self
            .obligations
            .write()
            .map_err(|_| poisoned("obligations"))?;
        let mut audits = self.audits.write().map_err(|_| poisoned("audits"))?;

        for obligation in &batch.update_obligations {
            if !obligations.contains_key(&obligation.id) {
                return Err(StorageError::NotFound(format!(
                    "obligation {} not found",
                    obligation.id
                )));
            }
        }

        for field in batch.upsert_fields {
            metadata.insert(
                (field.contract_id.clone(), field.key.clone(), field.provenance),
                field,
            );
        }
        for obligation in batch
            .insert_obligations
            .into_iter()
            .chain(batch.update_obligations)
        {
            obligations.insert(obligation.id.clone(), obligation);
        }
        for event in batch.audit {
            append_audit_locked(&mut audits, event)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for InMemoryCovenantStorage {
    async fn insert_assignment(
        &self,
        assignment: Assignment,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let obligations = self
            .obligations
            .read()
            .map_err(|_| poisoned("obligations"))?;
        if !obligations.contains_key(&assignment.obligation_id) {
            return Err(StorageError::NotFound(format!(
                "obligation {} not found",
                assignment.obligation_id
            )));
        }
        drop(obligations);

        let mut guard = self
            .assignments
            .write()
            .map_err(|_| poisoned("assignments"))?;
        self.commit_audit(audit)?;
        guard.insert(assignment.id.clone(), assignment);
        Ok(())
    }

    async fn get_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> StorageResult<Option<Assignment>> {
        let guard = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignments"))?;
        Ok(guard.get(assignment_id).cloned())
    }

    async fn list_assignments(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Vec<Assignment>> {
        let guard = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignments"))?;
        let mut assignments = guard
            .values()
            .filter(|assignment| &assignment.obligation_id == obligation_id)
            .cloned()
            .collect::<Vec<_>>();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(assignments)
    }

    async fn update_assignment_progress(
        &self,
        assignment_id: &AssignmentId,
        expected_revision: u64,
        percent_complete: u8,
        audit: Option<AuditAppend>,
    ) -> StorageResult<Assignment> {
        let mut guard = self
            .assignments
            .write()
            .map_err(|_| poisoned("assignments"))?;
        let assignment = guard.get_mut(assignment_id).ok_or_else(|| {
            StorageError::NotFound(format!("assignment {} not found", assignment_id))
        })?;

        if assignment.revision != expected_revision {
            return Err(StorageError::Conflict(format!(
                "assignment {} revision is {}, caller expected {}",
                assignment_id, assignment.revision, expected_revision
            )));
        }

        self.commit_audit(audit)?;
        assignment.percent_complete = percent_complete;
        assignment.status = derived_status(percent_complete);
        assignment.revision += 1;
        assignment.updated_at = Utc::now();
        Ok(assignment.clone())
    }

    async fn append_evidence(
        &self,
        evidence: Evidence,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()> {
        let assignments = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignments"))?;
        if !assignments.contains_key(&evidence.assignment_id) {
            return Err(StorageError::NotFound(format!(
                "assignment {} not found",
                evidence.assignment_id
            )));
        }
        drop(assignments);

        let mut guard = self.evidence.write().map_err(|_| poisoned("evidence"))?;
        self.commit_audit(audit)?;
        guard
            .entry(evidence.assignment_id.clone())
            .or_default()
            .push(evidence);
        Ok(())
    }

    async fn list_evidence(&self, assignment_id: &AssignmentId) -> StorageResult<Vec<Evidence>> {
        let guard = self.evidence.read().map_err(|_| poisoned("evidence"))?;
        Ok(guard.get(assignment_id).cloned().unwrap_or_default())
    }

    async fn list_incomplete(&self) -> StorageResult<Vec<(Obligation, Assignment)>> {
        let obligations = self
            .obligations
            .read()
            .map_err(|_| poisoned("obligations"))?;
        let assignments = self
            .assignments
            .read()
            .map_err(|_| poisoned("assignments"))?;

        let mut pairs = assignments
            .values()
            .filter(|assignment| assignment.percent_complete < 100)
            .filter_map(|assignment| {
                obligations
                    .get(&assignment.obligation_id)
                    .map(|obligation| (obligation.clone(), assignment.clone()))
            })
            .collect::<Vec<_>>();
        pairs.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        Ok(pairs)
    }
}

#[async_trait]
impl RiskStore for InMemoryCovenantStorage {
    async fn append_risk(&self, risk: PenaltyRisk) -> StorageResult<()> {
        let mut guard = self.risks.write().map_err(|_| poisoned("risks"))?;
        guard
            .entry(risk.obligation_id.clone())
            .or_default()
            .push(risk);
        Ok(())
    }

    async fn latest_risk(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Option<PenaltyRisk>> {
        let guard = self.risks.read().map_err(|_| poisoned("risks"))?;
        Ok(guard
            .get(obligation_id)
            .and_then(|snapshots| snapshots.last().cloned()))
    }

    async fn list_risk(
        &self,
        obligation_id: &ObligationId,
        window: QueryWindow,
    ) -> StorageResult<Vec<PenaltyRisk>> {
        let guard = self.risks.read().map_err(|_| poisoned("risks"))?;
        let mut snapshots = guard.get(obligation_id).cloned().unwrap_or_default();
        snapshots.reverse();
        Ok(apply_window(snapshots, window))
    }
}

#[async_trait]
impl NotificationStore for InMemoryCovenantStorage {
    async fn claim_notification(
        &self,
        notification: Notification,
    ) -> StorageResult<ClaimOutcome> {
        let mut guard = self
            .notifications
            .write()
            .map_err(|_| poisoned("notifications"))?;
        match guard.get(&notification.idempotency_key) {
            Some(existing) if existing.state == NotificationState::Sent => {
                Ok(ClaimOutcome::AlreadySent)
            }
            // An equally fresh or newer claim belongs to another live
            // instance of the same sweep; it must keep the key.
            Some(existing) if existing.created_at >= notification.created_at => {
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            // Absent, or a strictly older unconfirmed claim left by a
            // crashed or failed sweep: (re-)claim it.
            _ => {
                guard.insert(notification.idempotency_key.clone(), notification);
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn mark_sent(&self, idempotency_key: &str) -> StorageResult<()> {
        let mut guard = self
            .notifications
            .write()
            .map_err(|_| poisoned("notifications"))?;
        let notification = guard.get_mut(idempotency_key).ok_or_else(|| {
            StorageError::NotFound(format!("notification claim {} not found", idempotency_key))
        })?;
        notification.state = NotificationState::Sent;
        Ok(())
    }

    async fn get_notification(
        &self,
        idempotency_key: &str,
    ) -> StorageResult<Option<Notification>> {
        let guard = self
            .notifications
            .read()
            .map_err(|_| poisoned("notifications"))?;
        Ok(guard.get(idempotency_key).cloned())
    }

    async fn list_notifications(&self, window: QueryWindow) -> StorageResult<Vec<Notification>> {
        let guard = self
            .notifications
            .read()
            .map_err(|_| poisoned("notifications"))?;
        let mut notifications = guard.values().cloned().collect::<Vec<_>>();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_window(notifications, window))
    }
}

#[async_trait]
impl AuditStore for InMemoryCovenantStorage {
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditRecord> {
        let mut guard = self.audits.write().map_err(|_| poisoned("audits"))?;
        append_audit_locked(&mut guard, event)
    }

    async fn list_audit(
        &self,
        filter: AuditFilter,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditRecord>> {
        let guard = self.audits.read().map_err(|_| poisoned("audits"))?;
        let mut records = guard
            .iter()
            .filter(|record| {
                filter
                    .project_id
                    .as_ref()
                    .map_or(true, |wanted| record.project_id.as_ref() == Some(wanted))
            })
            .filter(|record| {
                filter
                    .entity_type
                    .as_ref()
                    .map_or(true, |wanted| &record.entity_type == wanted)
            })
            .filter(|record| {
                filter
                    .entity_id
                    .as_ref()
                    .map_or(true, |wanted| record.entity_id.as_ref() == Some(wanted))
            })
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(apply_window(records, window))
    }

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>> {
        let guard = self.audits.read().map_err(|_| poisoned("audits"))?;
        Ok(guard.last().map(|e| e.hash.clone()))
    }
}
