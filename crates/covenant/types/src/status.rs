use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered permission tier a user holds on a project.
///
/// The derived `Ord` follows declaration order, so
/// `Viewer < Contributor < Manager < Owner` and any check
/// "requires level L" is `granted >= L`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    Viewer,
    Contributor,
    Manager,
    Owner,
}

/// Origin of a metadata field or obligation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Entered by a human. Authoritative: automated writes never replace it.
    Manual,
    /// Produced by the automated extraction capability.
    Ai,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Active,
    Archived,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Draft,
    Active,
    Expired,
    Terminated,
}

impl ContractStatus {
    /// Whether the contract still accepts mutations.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

/// Folder classification for uploaded contract files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FolderKind {
    Original,
    Amendment,
    Correspondence,
    Evidence,
    Other,
}

/// Assignment progress state, fully determined by percent complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Open,
    InProgress,
    Completed,
    /// Display-only: due date passed and not completed. Never persisted.
    Overdue,
}

/// Map percent complete to the persisted status.
pub fn derived_status(percent_complete: u8) -> AssignmentStatus {
    match percent_complete {
        0 => AssignmentStatus::Open,
        100 => AssignmentStatus::Completed,
        _ => AssignmentStatus::InProgress,
    }
}

/// Whether an obligation counts as overdue for display and scheduling.
pub fn is_overdue(due_date: Option<NaiveDate>, today: NaiveDate, status: AssignmentStatus) -> bool {
    match due_date {
        Some(due) => today > due && status != AssignmentStatus::Completed,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn access_levels_are_totally_ordered() {
        assert!(AccessLevel::Viewer < AccessLevel::Contributor);
        assert!(AccessLevel::Contributor < AccessLevel::Manager);
        assert!(AccessLevel::Manager < AccessLevel::Owner);
        assert!(AccessLevel::Owner >= AccessLevel::Manager);
    }

    #[test]
    fn overdue_requires_past_due_and_incomplete() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let later = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(is_overdue(Some(due), later, AssignmentStatus::Open));
        assert!(!is_overdue(Some(due), later, AssignmentStatus::Completed));
        assert!(!is_overdue(Some(due), due, AssignmentStatus::Open));
        assert!(!is_overdue(None, later, AssignmentStatus::Open));
    }

    proptest! {
        #[test]
        fn percent_determines_status(percent in 0u8..=100) {
            let status = derived_status(percent);
            match percent {
                0 => prop_assert_eq!(status, AssignmentStatus::Open),
                100 => prop_assert_eq!(status, AssignmentStatus::Completed),
                _ => prop_assert_eq!(status, AssignmentStatus::InProgress),
            }
            prop_assert_eq!(percent == 100, status == AssignmentStatus::Completed);
        }
    }
}
