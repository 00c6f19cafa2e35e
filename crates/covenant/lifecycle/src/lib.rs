//! Lifecycle operations - the write paths for projects, contracts, files,
//! metadata, obligations, assignments, and evidence.
//!
//! Every operation takes an explicit actor and is access-checked against
//! the owning project before touching storage. Successful mutations and
//! rejected ones both land in the audit trail.

#![deny(unsafe_code)]

mod object_store;
mod service;

pub use object_store::{InMemoryObjectStore, ObjectStore};
pub use service::{LifecycleService, ObligationEdit};
