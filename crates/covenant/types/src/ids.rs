use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Create an identifier from a known string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Unique identifier for a Project.
    ProjectId
);
opaque_id!(
    /// Unique identifier for a Contract.
    ContractId
);
opaque_id!(
    /// Unique identifier for a ContractFile version row.
    FileId
);
opaque_id!(
    /// Unique identifier for an Obligation.
    ObligationId
);
opaque_id!(
    /// Unique identifier for an Assignment.
    AssignmentId
);
opaque_id!(
    /// Unique identifier for an Evidence item.
    EvidenceId
);
opaque_id!(
    /// Unique identifier for a user account.
    UserId
);
opaque_id!(
    /// Unique identifier for a stored Notification.
    NotificationId
);
