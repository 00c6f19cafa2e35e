//! Core types for the covenant contract compliance engine.
//!
//! This crate defines the entity model shared by every component:
//! - opaque identifiers for projects, contracts, obligations, and users
//! - provenance-tagged metadata and obligation records
//! - the assignment state machine and its pure derivations
//! - the error taxonomy every operation surfaces
//! - engine configuration knobs

#![deny(unsafe_code)]

mod cancel;
mod config;
mod entities;
mod error;
mod ids;
mod status;

pub use cancel::{Cancellable, CancellationToken};
pub use config::EngineConfig;
pub use entities::{
    Assignment, Contract, ContractFile, Evidence, Grant, MetadataField, Notification,
    NotificationKind, NotificationState, Obligation, PenaltyRisk, Project, TextSpan,
};
pub use error::{CoreError, CoreResult};
pub use ids::{
    AssignmentId, ContractId, EvidenceId, FileId, NotificationId, ObligationId, ProjectId, UserId,
};
pub use status::{
    derived_status, is_overdue, AccessLevel, AssignmentStatus, ContractStatus, FolderKind,
    ProjectStatus, Provenance,
};
