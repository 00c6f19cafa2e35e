use crate::model::{AuditAppend, AuditFilter, AuditRecord, ClaimOutcome, FileUpload, MergeBatch};
use crate::StorageResult;
use async_trait::async_trait;
use covenant_types::{
    Assignment, AssignmentId, Contract, ContractFile, ContractId, ContractStatus, Evidence,
    FolderKind, Grant, MetadataField, Notification, Obligation, ObligationId, PenaltyRisk, Project,
    ProjectId, Provenance, UserId,
};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    /// Zero means unbounded.
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for projects and permission grants.
///
/// Mutating methods take an optional [`AuditAppend`] that commits in the
/// same critical section as the write. A failed audit append aborts the
/// mutation. The same convention applies to every mutating store method.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn insert_project(
        &self,
        project: Project,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn get_project(&self, project_id: &ProjectId) -> StorageResult<Option<Project>>;

    /// Insert or replace the single active grant for (project, user).
    async fn upsert_grant(&self, grant: Grant, audit: Option<AuditAppend>) -> StorageResult<()>;

    /// Remove a grant, returning it if present. The audit entry is only
    /// written when a grant was actually removed.
    async fn remove_grant(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
        audit: Option<AuditAppend>,
    ) -> StorageResult<Option<Grant>>;

    async fn get_grant(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> StorageResult<Option<Grant>>;

    async fn grants_for_project(&self, project_id: &ProjectId) -> StorageResult<Vec<Grant>>;
}

/// Storage interface for contracts, file versions, and metadata fields.
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn insert_contract(
        &self,
        contract: Contract,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn get_contract(&self, contract_id: &ContractId) -> StorageResult<Option<Contract>>;

    async fn set_contract_status(
        &self,
        contract_id: &ContractId,
        status: ContractStatus,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    /// Append a file version in (contract, folder) scope.
    ///
    /// Version assignment and the dedup check happen under one guard: if the
    /// latest version in scope has the same content hash, the existing file
    /// is returned with `created == false`, no new row is written, and the
    /// audit entry is dropped.
    async fn append_file_version(
        &self,
        upload: FileUpload,
        audit: Option<AuditAppend>,
    ) -> StorageResult<(ContractFile, bool)>;

    async fn latest_file(
        &self,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> StorageResult<Option<ContractFile>>;

    async fn list_files(&self, contract_id: &ContractId) -> StorageResult<Vec<ContractFile>>;

    /// Insert or replace the field keyed (contract, key, provenance).
    async fn upsert_metadata(
        &self,
        field: MetadataField,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn get_metadata(
        &self,
        contract_id: &ContractId,
        key: &str,
        provenance: Provenance,
    ) -> StorageResult<Option<MetadataField>>;

    async fn list_metadata(&self, contract_id: &ContractId) -> StorageResult<Vec<MetadataField>>;
}

/// Storage interface for obligations and the atomic merge commit.
#[async_trait]
pub trait ObligationStore: Send + Sync {
    async fn insert_obligation(
        &self,
        obligation: Obligation,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn get_obligation(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Option<Obligation>>;

    async fn update_obligation(
        &self,
        obligation: Obligation,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn list_obligations(&self, contract_id: &ContractId) -> StorageResult<Vec<Obligation>>;

    /// All obligations that are not closed out: either no assignment exists
    /// yet, or at least one assignment is incomplete. Input for the daily
    /// risk recomputation.
    async fn list_active_obligations(&self) -> StorageResult<Vec<Obligation>>;

    /// Apply one extraction merge as a unit: metadata upserts, obligation
    /// inserts/updates, and the batch's audit entries all commit together
    /// or not at all.
    async fn apply_merge_batch(
        &self,
        contract_id: &ContractId,
        batch: MergeBatch,
    ) -> StorageResult<()>;
}

/// Storage interface for assignments and append-only evidence.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn insert_assignment(
        &self,
        assignment: Assignment,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn get_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> StorageResult<Option<Assignment>>;

    async fn list_assignments(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Vec<Assignment>>;

    /// Optimistic update: succeeds only when the stored revision matches
    /// `expected_revision`, otherwise fails with `Conflict` and writes
    /// nothing (the audit entry included). Returns the updated assignment.
    async fn update_assignment_progress(
        &self,
        assignment_id: &AssignmentId,
        expected_revision: u64,
        percent_complete: u8,
        audit: Option<AuditAppend>,
    ) -> StorageResult<Assignment>;

    async fn append_evidence(
        &self,
        evidence: Evidence,
        audit: Option<AuditAppend>,
    ) -> StorageResult<()>;

    async fn list_evidence(&self, assignment_id: &AssignmentId) -> StorageResult<Vec<Evidence>>;

    /// All (obligation, assignment) pairs whose assignment is not complete.
    /// Sweep input.
    async fn list_incomplete(&self) -> StorageResult<Vec<(Obligation, Assignment)>>;
}

/// Storage interface for append-only penalty risk snapshots.
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn append_risk(&self, risk: PenaltyRisk) -> StorageResult<()>;

    async fn latest_risk(
        &self,
        obligation_id: &ObligationId,
    ) -> StorageResult<Option<PenaltyRisk>>;

    async fn list_risk(
        &self,
        obligation_id: &ObligationId,
        window: QueryWindow,
    ) -> StorageResult<Vec<PenaltyRisk>>;
}

/// Storage interface for idempotency-keyed notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Atomic insert-if-absent on the idempotency key. An unconfirmed claim
    /// left by an earlier sweep (strictly older `created_at`) is taken over
    /// for retry; an equally fresh claim belongs to a concurrent instance
    /// and yields `AlreadyClaimed`; a confirmed send is final.
    async fn claim_notification(&self, notification: Notification)
        -> StorageResult<ClaimOutcome>;

    /// Confirm delivery for a claimed key.
    async fn mark_sent(&self, idempotency_key: &str) -> StorageResult<()>;

    async fn get_notification(
        &self,
        idempotency_key: &str,
    ) -> StorageResult<Option<Notification>>;

    async fn list_notifications(&self, window: QueryWindow) -> StorageResult<Vec<Notification>>;
}

/// Storage interface for append-only audit events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event and return the canonical, hash-linked stored record.
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditRecord>;

    /// Read events newest-first with optional entity filters. Insertion
    /// sequence is the sort key, so pagination is stable under concurrent
    /// inserts.
    async fn list_audit(
        &self,
        filter: AuditFilter,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditRecord>>;

    /// Get the latest audit hash anchor.
    async fn latest_audit_hash(&self) -> StorageResult<Option<String>>;
}

/// Unified storage bundle consumed by the engine facade.
pub trait CovenantStorage:
    GrantStore
    + ContractStore
    + ObligationStore
    + AssignmentStore
    + RiskStore
    + NotificationStore
    + AuditStore
    + Send
    + Sync
{
}

impl<T> CovenantStorage for T where
    T: GrantStore
        + ContractStore
        + ObligationStore
        + AssignmentStore
        + RiskStore
        + NotificationStore
        + AuditStore
        + Send
        + Sync
{
}
