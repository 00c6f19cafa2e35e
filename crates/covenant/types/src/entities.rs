use crate::ids::{
    AssignmentId, ContractId, EvidenceId, FileId, NotificationId, ObligationId, ProjectId, UserId,
};
use crate::status::{
    derived_status, AccessLevel, AssignmentStatus, ContractStatus, FolderKind, ProjectStatus,
    Provenance,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A project owning contracts and permission grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub client_name: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        client_name: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            id: ProjectId::generate(),
            name: name.into(),
            status: ProjectStatus::Active,
            client_name: client_name.into(),
            country: country.into(),
            created_at: Utc::now(),
        }
    }
}

/// A contract belonging to exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub project_id: ProjectId,
    pub title: String,
    /// Total contract value in minor currency units, if known.
    pub value_minor: Option<u64>,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new(project_id: ProjectId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ContractId::generate(),
            project_id,
            title: title.into(),
            value_minor: None,
            starts_on: None,
            ends_on: None,
            status: ContractStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_value_minor(mut self, value_minor: u64) -> Self {
        self.value_minor = Some(value_minor);
        self
    }

    pub fn with_dates(mut self, starts_on: NaiveDate, ends_on: NaiveDate) -> Self {
        self.starts_on = Some(starts_on);
        self.ends_on = Some(ends_on);
        self
    }
}

/// One stored version of an uploaded contract file.
///
/// Version numbers are strictly increasing per (contract, folder); a file
/// whose content hash matches the latest version in that scope is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractFile {
    pub id: FileId,
    pub contract_id: ContractId,
    pub folder: FolderKind,
    pub object_key: String,
    pub content_hash: String,
    pub version: u32,
    pub uploaded_by: UserId,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Character span locating an extracted value in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

/// A provenance-tagged contract metadata field.
///
/// Keys are unique per (contract, provenance); a Manual entry for a key
/// shadows any AI entry for the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataField {
    pub contract_id: ContractId,
    pub key: String,
    pub value: String,
    pub provenance: Provenance,
    pub confidence: Option<f64>,
    pub offsets: Option<TextSpan>,
    pub updated_at: DateTime<Utc>,
}

/// A contractual obligation extracted from or entered against a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,
    pub contract_id: ContractId,
    pub description: String,
    pub frequency: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub penalty_text: Option<String>,
    pub provenance: Provenance,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Obligation {
    /// A manually entered obligation. Manual provenance is authoritative.
    pub fn manual(contract_id: ContractId, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ObligationId::generate(),
            contract_id,
            description: description.into(),
            frequency: None,
            due_date: None,
            penalty_text: None,
            provenance: Provenance::Manual,
            confidence: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_penalty_text(mut self, penalty_text: impl Into<String>) -> Self {
        self.penalty_text = Some(penalty_text.into());
        self
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = Some(frequency.into());
        self
    }
}

/// A user's responsibility for one obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub obligation_id: ObligationId,
    pub assignee: UserId,
    pub percent_complete: u8,
    pub status: AssignmentStatus,
    /// Optimistic concurrency counter; bumped on every accepted update.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(obligation_id: ObligationId, assignee: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: AssignmentId::generate(),
            obligation_id,
            assignee,
            percent_complete: 0,
            status: derived_status(0),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only proof-of-work item attached to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,
    pub assignment_id: AssignmentId,
    pub object_key: String,
    pub uploaded_by: UserId,
    pub note: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Append-only penalty risk snapshot for an obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyRisk {
    pub obligation_id: ObligationId,
    pub computed_at: DateTime<Utc>,
    /// Risk score in [0, 1].
    pub score: f64,
    /// Human-readable derivation citing the inputs and formula branch.
    pub basis: String,
    /// Estimated penalty amount in minor units, when the penalty text
    /// carries a parsable percentage and the contract value is known.
    pub amount_minor: Option<u64>,
}

/// Active permission grant: (user, project) -> level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub level: AccessLevel,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

/// Reminder or risk-alert category for a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    DueSoon,
    Overdue,
    RiskThreshold,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
            Self::RiskThreshold => "risk_threshold",
        }
    }
}

/// Delivery state of a claimed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationState {
    /// Idempotency key claimed; send not yet confirmed.
    Claimed,
    /// Send confirmed. Final.
    Sent,
}

/// A scheduled notification, unique per idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    /// Deterministic key: hash of (obligation, assignee, date bucket, kind).
    pub idempotency_key: String,
    pub obligation_id: ObligationId,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub bucket_date: NaiveDate,
    pub message: String,
    pub state: NotificationState,
    pub created_at: DateTime<Utc>,
}
