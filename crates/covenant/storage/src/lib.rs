//! Covenant storage abstractions.
//!
//! This crate defines the storage contract for the compliance engine:
//! - permission grants (system of record for access checks)
//! - contracts, files, provenance-tagged metadata, and obligations
//! - assignments and append-only evidence
//! - append-only penalty risk snapshots
//! - idempotency-keyed notifications (insert-if-absent claims)
//! - append-only, hash-linked audit records
//!
//! Design stance:
//! - A transactional backend remains the source of truth in production.
//! - The in-memory adapter is the deterministic reference used by tests;
//!   it enforces the same invariants a real backend must (atomic merge
//!   batches, per-scope file versioning, optimistic assignment updates,
//!   atomic notification claims).

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{AuditAppend, AuditFilter, AuditRecord, ClaimOutcome, FileUpload, MergeBatch};
pub use traits::{
    AssignmentStore, AuditStore, ContractStore, CovenantStorage, GrantStore, NotificationStore,
    ObligationStore, QueryWindow, RiskStore,
};
