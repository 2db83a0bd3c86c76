//! # vigil-sync
//!
//! The manifest reconciliation engine for the vigil dependency-health
//! dashboard.
//!
//! Teams host a JSON manifest describing their services; this crate keeps the
//! dashboard's local records converged with those manifests without
//! clobbering local edits. One run is a fixed pipeline:
//!
//! 1. **Fetch** the team's manifest over HTTPS ([`fetch`])
//! 2. **Validate** it structurally, reporting every issue ([`validate`])
//! 3. **Diff** entries against a consistent local snapshot ([`diff`])
//! 4. **Resolve** differences through the team's policy ([`resolve`])
//! 5. **Apply** the plan with per-action error isolation ([`reconcile`])
//! 6. **Record** an append-only audit row ([`orchestrator`])
//!
//! Disagreements the policy withholds become [`drift`] flags for human
//! review. Fetch and validation failures fail a run closed: zero local
//! mutations, one audit row. At most one run per team is in flight at a time;
//! concurrent requests are rejected, not queued.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod diff;
pub mod drift;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod orchestrator;
pub mod reconcile;
pub mod resolve;
pub mod store;
pub mod validate;

pub use error::{Error, Result};
pub use orchestrator::SyncOrchestrator;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::drift::{BulkTransitionOutcome, DriftFlagManager, RaiseOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::fetch::{FetchFailure, HttpManifestFetcher, ManifestFetcher};
    pub use crate::orchestrator::{InFlightRegistry, SyncOrchestrator, UrlTestOutcome};
    pub use crate::reconcile::Reconciler;
    pub use crate::store::{DriftFlagFilter, InMemorySyncStore, SyncStore, TeamSnapshot};
    pub use crate::validate::{
        validate_manifest, ManifestValidationResult, Severity, ValidationIssue,
    };
}
