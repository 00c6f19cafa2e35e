//! Extraction and merge: pull metadata/obligation candidates from the
//! external extraction capability and fold them into contract state,
//! respecting provenance precedence.
//!
//! Manual entries are authoritative: no AI-sourced write ever replaces a
//! Manual field or obligation. Merges are serialized per contract and
//! commit atomically.

#![deny(unsafe_code)]

mod capability;
mod merger;

pub use capability::{
    extract_with_retry, DocumentContent, ExtractionCapability, ExtractorError,
    ExtractionResult, MetadataCandidate, ObligationCandidate,
};
pub use merger::{ExtractionMerger, MergeSummary};
