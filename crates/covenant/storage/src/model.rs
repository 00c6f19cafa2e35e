use chrono::{DateTime, Utc};
use covenant_types::{ContractId, FolderKind, MetadataField, Obligation, ProjectId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit append payload. Hashes and sequencing are assigned by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditAppend {
    pub timestamp: DateTime<Utc>,
    /// Acting user; `None` for system actions such as the scheduled sweep.
    pub actor: Option<UserId>,
    /// Owning project, when the action happens in project scope; `None`
    /// for system-wide actions. Audit reads are gated per project.
    pub project_id: Option<ProjectId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub ip: Option<String>,
}

/// Persistent tamper-evident audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    /// Insertion order; the stable sort key for queries.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload: Value,
    pub ip: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// Optional filters for audit queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub project_id: Option<ProjectId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

/// Staged write set for one extraction merge, applied atomically together
/// with its audit entries.
#[derive(Debug, Clone, Default)]
pub struct MergeBatch {
    pub upsert_fields: Vec<MetadataField>,
    pub insert_obligations: Vec<Obligation>,
    pub update_obligations: Vec<Obligation>,
    pub audit: Vec<AuditAppend>,
}

impl MergeBatch {
    pub fn is_empty(&self) -> bool {
        self.upsert_fields.is_empty()
            && self.insert_obligations.is_empty()
            && self.update_obligations.is_empty()
    }
}

/// Input for appending a contract file version.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub contract_id: ContractId,
    pub folder: FolderKind,
    pub object_key: String,
    pub content_hash: String,
    pub uploaded_by: UserId,
    pub size_bytes: u64,
}

/// Outcome of an atomic notification claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Key inserted, or a stale claim from an earlier sweep was taken
    /// over for retry.
    Claimed,
    /// Another sweep instance holds an equally fresh claim; this caller
    /// must not send.
    AlreadyClaimed,
    /// A confirmed send already exists for this key. Final.
    AlreadySent,
}
