//! Engine facade - the single entry point transports embed.
//!
//! Wires the access guard, audit recorder, lifecycle service, extraction
//! merger, risk engine, and notification scheduler over one storage
//! bundle. Every operation takes an explicit actor (no ambient user
//! state) and a cancellation signal, honored up to the commit boundary of
//! the underlying write.
//!
//! Risk snapshots are recomputed here, on the mutation paths the score
//! depends on: obligation due-date or penalty changes, assignment status
//! changes, and merge commits. The daily sweep keeps scores current in
//! between.

#![deny(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use covenant_access::AccessGuard;
use covenant_audit::{AuditPage, AuditRecorder};
use covenant_extraction::{DocumentContent, ExtractionCapability, ExtractionMerger, MergeSummary};
use covenant_lifecycle::{LifecycleService, ObjectStore, ObligationEdit};
use covenant_risk::compute_risk;
use covenant_scheduler::{NotificationScheduler, NotificationSink, SweepReport};
use covenant_storage::{CovenantStorage, QueryWindow};
use covenant_types::{
    AccessLevel, Assignment, AssignmentId, AssignmentStatus, Cancellable, Contract, ContractFile,
    ContractId, ContractStatus, CoreError, CoreResult, EngineConfig, Evidence, FolderKind, Grant,
    MetadataField, Obligation, ObligationId, PenaltyRisk, Project, ProjectId, UserId,
};
use std::sync::Arc;

/// Contract compliance engine facade.
#[derive(Clone)]
pub struct CovenantEngine {
    storage: Arc<dyn CovenantStorage>,
    access: AccessGuard,
    audit: AuditRecorder,
    lifecycle: LifecycleService,
    merger: Arc<ExtractionMerger>,
    scheduler: NotificationScheduler,
}

impl CovenantEngine {
    pub fn new(
        storage: Arc<dyn CovenantStorage>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn ExtractionCapability>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let audit = AuditRecorder::new(storage.clone());
        let access = AccessGuard::new(storage.clone(), audit.clone());
        let lifecycle =
            LifecycleService::new(storage.clone(), objects, access.clone(), audit.clone());
        let merger = Arc::new(ExtractionMerger::new(
            storage.clone(),
            extractor,
            config.clone(),
        ));
        let scheduler =
            NotificationScheduler::new(storage.clone(), sink, audit.clone(), config);
        Self {
            storage,
            access,
            audit,
            lifecycle,
            merger,
            scheduler,
        }
    }

    // ---- permission grants ----

    pub async fn grant_access(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        grantee: &UserId,
        level: AccessLevel,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Grant> {
        entry(cancel)?;
        self.access.grant(project_id, actor, grantee, level).await
    }

    pub async fn revoke_access(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        user_id: &UserId,
        cancel: &dyn Cancellable,
    ) -> CoreResult<()> {
        entry(cancel)?;
        self.access.revoke(project_id, actor, user_id).await
    }

    pub async fn access_level(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> CoreResult<Option<AccessLevel>> {
        self.access.access_level(project_id, user_id).await
    }

    /// Grants on a project, for administrative surfaces. Requires Manager.
    pub async fn list_grants(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
    ) -> CoreResult<Vec<Grant>> {
        self.access
            .require(project_id, actor, AccessLevel::Manager)
            .await?;
        self.access.grants_for_project(project_id).await
    }

    // ---- projects and contracts ----

    pub async fn create_project(
        &self,
        actor: &UserId,
        name: &str,
        client_name: &str,
        country: &str,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Project> {
        entry(cancel)?;
        self.lifecycle
            .create_project(actor, name, client_name, country)
            .await
    }

    pub async fn create_contract(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        title: &str,
        value_minor: Option<u64>,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Contract> {
        entry(cancel)?;
        self.lifecycle
            .create_contract(actor, project_id, title, value_minor)
            .await
    }

    pub async fn set_contract_status(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        status: ContractStatus,
        cancel: &dyn Cancellable,
    ) -> CoreResult<()> {
        entry(cancel)?;
        self.lifecycle
            .set_contract_status(actor, contract_id, status)
            .await
    }

    // ---- files ----

    pub async fn upload_contract_file(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
        bytes: Vec<u8>,
        cancel: &dyn Cancellable,
    ) -> CoreResult<(ContractFile, bool)> {
        entry(cancel)?;
        self.lifecycle
            .upload_contract_file(actor, contract_id, folder, bytes)
            .await
    }

    pub async fn list_files(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<ContractFile>> {
        self.lifecycle.list_files(actor, contract_id).await
    }

    pub async fn latest_file(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> CoreResult<Option<ContractFile>> {
        self.lifecycle.latest_file(actor, contract_id, folder).await
    }

    pub async fn download_url(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        folder: FolderKind,
    ) -> CoreResult<String> {
        self.lifecycle.download_url(actor, contract_id, folder).await
    }

    // ---- metadata ----

    pub async fn set_metadata_manual(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        key: &str,
        value: &str,
        cancel: &dyn Cancellable,
    ) -> CoreResult<MetadataField> {
        entry(cancel)?;
        self.lifecycle
            .set_metadata_manual(actor, contract_id, key, value)
            .await
    }

    pub async fn effective_metadata(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<MetadataField>> {
        self.lifecycle.effective_metadata(actor, contract_id).await
    }

    // ---- extraction ----

    /// Extract candidates from document content and merge them into the
    /// contract. Requires Contributor. At most one merge runs per contract;
    /// a concurrent call fails with `Conflict`. Risk is recomputed for
    /// every obligation the merge touched.
    pub async fn extract_and_merge(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        content: &DocumentContent,
        cancel: &dyn Cancellable,
    ) -> CoreResult<MergeSummary> {
        entry(cancel)?;
        let contract = self.contract(contract_id).await?;
        if let Err(err) = self
            .access
            .require(&contract.project_id, actor, AccessLevel::Contributor)
            .await
        {
            self.audit_rejection(&err, actor, &contract.project_id, contract_id)
                .await;
            return Err(err);
        }

        let summary = match self
            .merger
            .extract_and_merge(contract_id, content, actor, cancel)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                if matches!(err, CoreError::Conflict(_)) {
                    self.audit_rejection(&err, actor, &contract.project_id, contract_id)
                        .await;
                }
                return Err(err);
            }
        };
        for obligation_id in &summary.touched_obligations {
            self.recompute_risk_and_alert(obligation_id).await?;
        }
        Ok(summary)
    }

    // Rejected merges leave a trace too; audit failure here must not mask
    // the original error.
    async fn audit_rejection(
        &self,
        err: &CoreError,
        actor: &UserId,
        project_id: &ProjectId,
        contract_id: &ContractId,
    ) {
        tracing::warn!(
            contract = %contract_id,
            reason = err.reason_code(),
            "extraction merge rejected"
        );
        let _ = self
            .audit
            .log(
                Some(actor.clone()),
                Some(project_id.clone()),
                "contract.extract_merge",
                "contract",
                Some(contract_id.to_string()),
                serde_json::json!({ "rejected": err.reason_code() }),
                None,
            )
            .await;
    }

    // ---- obligations ----

    pub async fn create_obligation(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
        description: &str,
        due_date: Option<NaiveDate>,
        penalty_text: Option<&str>,
        frequency: Option<&str>,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Obligation> {
        entry(cancel)?;
        let obligation = self
            .lifecycle
            .create_obligation(actor, contract_id, description, due_date, penalty_text, frequency)
            .await?;
        self.recompute_risk_and_alert(&obligation.id).await?;
        Ok(obligation)
    }

    pub async fn edit_obligation(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
        edit: ObligationEdit,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Obligation> {
        entry(cancel)?;
        let obligation = self.lifecycle.edit_obligation(actor, obligation_id, edit).await?;
        self.recompute_risk_and_alert(obligation_id).await?;
        Ok(obligation)
    }

    pub async fn list_obligations(
        &self,
        actor: &UserId,
        contract_id: &ContractId,
    ) -> CoreResult<Vec<Obligation>> {
        self.lifecycle.list_obligations(actor, contract_id).await
    }

    // ---- assignments and evidence ----

    pub async fn create_assignment(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
        assignee: &UserId,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Assignment> {
        entry(cancel)?;
        self.lifecycle
            .create_assignment(actor, obligation_id, assignee)
            .await
    }

    pub async fn update_assignment_progress(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        expected_revision: u64,
        percent_complete: u8,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Assignment> {
        entry(cancel)?;
        let updated = self
            .lifecycle
            .update_assignment_progress(actor, assignment_id, expected_revision, percent_complete)
            .await?;
        self.recompute_risk_and_alert(&updated.obligation_id).await?;
        Ok(updated)
    }

    pub async fn upload_evidence(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
        bytes: Vec<u8>,
        note: Option<&str>,
        cancel: &dyn Cancellable,
    ) -> CoreResult<Evidence> {
        entry(cancel)?;
        self.lifecycle
            .upload_evidence(actor, assignment_id, bytes, note)
            .await
    }

    pub async fn list_evidence(
        &self,
        actor: &UserId,
        assignment_id: &AssignmentId,
    ) -> CoreResult<Vec<Evidence>> {
        self.lifecycle.list_evidence(actor, assignment_id).await
    }

    pub async fn list_assignments(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
    ) -> CoreResult<Vec<Assignment>> {
        self.lifecycle.list_assignments(actor, obligation_id).await
    }

    // ---- risk ----

    pub async fn latest_risk(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
    ) -> CoreResult<Option<PenaltyRisk>> {
        self.require_viewer_on_obligation(actor, obligation_id).await?;
        self.storage
            .latest_risk(obligation_id)
            .await
            .map_err(CoreError::from)
    }

    /// Risk snapshot history, newest last. Requires Viewer.
    pub async fn risk_history(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
        window: QueryWindow,
    ) -> CoreResult<Vec<PenaltyRisk>> {
        self.require_viewer_on_obligation(actor, obligation_id).await?;
        self.storage
            .list_risk(obligation_id, window)
            .await
            .map_err(CoreError::from)
    }

    // ---- scheduling ----

    /// Run one reminder sweep. System operation, driven by an external
    /// timer; safe to re-run and to run from several instances at once.
    pub async fn run_reminder_sweep(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        self.scheduler.run_reminder_sweep(now).await
    }

    // ---- audit ----

    /// Audit trail page, newest first. Requires Manager on the project,
    /// and only that project's records are returned.
    pub async fn query_audit(
        &self,
        actor: &UserId,
        project_id: &ProjectId,
        page: usize,
        page_size: usize,
        entity_type: Option<String>,
        entity_id: Option<String>,
    ) -> CoreResult<AuditPage> {
        self.access
            .require(project_id, actor, AccessLevel::Manager)
            .await?;
        self.audit
            .query(
                page,
                page_size,
                Some(project_id.clone()),
                entity_type,
                entity_id,
            )
            .await
    }

    // ---- internals ----

    /// Append a fresh risk snapshot and fire an alert if the score crossed
    /// the threshold upward.
    async fn recompute_risk_and_alert(&self, obligation_id: &ObligationId) -> CoreResult<()> {
        let obligation = self
            .storage
            .get_obligation(obligation_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {obligation_id} not found")))?;
        let contract = self.contract(&obligation.contract_id).await?;

        let assignments = self
            .storage
            .list_assignments(obligation_id)
            .await
            .map_err(CoreError::from)?;
        let completed = !assignments.is_empty()
            && assignments
                .iter()
                .all(|a| a.status == AssignmentStatus::Completed);

        let previous = self
            .storage
            .latest_risk(obligation_id)
            .await
            .map_err(CoreError::from)?
            .map(|risk| risk.score)
            .unwrap_or(0.0);
        let risk = compute_risk(
            &obligation,
            contract.value_minor,
            completed,
            Utc::now().date_naive(),
        );
        let new_score = risk.score;
        self.storage
            .append_risk(risk)
            .await
            .map_err(CoreError::from)?;
        tracing::debug!(obligation = %obligation_id, score = new_score, "risk recomputed");

        self.scheduler
            .notify_on_risk_threshold_crossing(obligation_id, previous, new_score)
            .await?;
        Ok(())
    }

    async fn require_viewer_on_obligation(
        &self,
        actor: &UserId,
        obligation_id: &ObligationId,
    ) -> CoreResult<()> {
        let obligation = self
            .storage
            .get_obligation(obligation_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {obligation_id} not found")))?;
        let contract = self.contract(&obligation.contract_id).await?;
        self.access
            .require(&contract.project_id, actor, AccessLevel::Viewer)
            .await?;
        Ok(())
    }

    async fn contract(&self, contract_id: &ContractId) -> CoreResult<Contract> {
        self.storage
            .get_contract(contract_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("contract {contract_id} not found")))
    }
}

fn entry(cancel: &dyn Cancellable) -> CoreResult<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}
