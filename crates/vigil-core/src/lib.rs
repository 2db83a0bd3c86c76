//! # vigil-core
//!
//! Shared domain model for the vigil dependency-health dashboard.
//!
//! This crate defines the types every vigil component agrees on:
//!
//! - **Identifiers**: strongly-typed ULID newtypes
//! - **Manifest wire types**: the externally-hosted JSON document teams author
//! - **Local records**: services, aliases, overrides, associations, team config
//! - **Policy**: the per-team conflict policy value object
//! - **Drift**: flag rows, composite keys, and the status state machine
//! - **Sync outcomes**: change entries, summaries, results, history rows
//!
//! The reconciliation engine itself lives in `vigil-sync`; this crate has no
//! I/O and no async code.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod drift;
pub mod error;
pub mod id;
pub mod manifest;
pub mod policy;
pub mod record;
pub mod sync;

pub use error::{Error, Result};
pub use id::{DriftFlagId, ServiceId, SyncHistoryId, TeamId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::drift::{DriftFlag, DriftKey, DriftStatus, DriftType};
    pub use crate::error::{Error, Result};
    pub use crate::id::{DriftFlagId, ServiceId, SyncHistoryId, TeamId};
    pub use crate::manifest::{
        ManifestAssociationEntry, ManifestDependencyEntry, ManifestDocument, ManifestServiceEntry,
    };
    pub use crate::policy::{
        FieldDriftPolicy, ManifestSyncPolicy, RelationRemovalPolicy, RemovalPolicy,
    };
    pub use crate::record::{
        AssociationKey, DependencyAlias, DependencyOverride, ServiceAssociation, ServiceField,
        ServiceRecord, TeamManifestConfig,
    };
    pub use crate::sync::{
        ManifestSyncChange, ManifestSyncResult, ManifestSyncSummary, SyncAction, SyncHistoryEntry,
        SyncStatus, TriggerType,
    };
}
