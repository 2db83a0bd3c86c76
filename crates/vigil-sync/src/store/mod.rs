//! Pluggable storage for reconciliation state.
//!
//! The [`SyncStore`] trait defines the persistence boundary for team
//! configuration, service records and their relations, drift flags, and the
//! append-only sync history. The production implementation wraps the
//! dashboard's row storage engine; tests use
//! [`memory::InMemorySyncStore`].
//!
//! ## Design Principles
//!
//! - **Snapshot reads**: a run reads everything it diffs against in one
//!   scoped call, so the diff sees a consistent view
//! - **Narrow writes**: the reconciler mutates one row per call so a single
//!   failed write degrades one action, not the run
//! - **Testability**: the in-memory implementation supports one-shot failure
//!   injection to exercise per-action error isolation

pub mod memory;

pub use memory::{InMemorySyncStore, TeamRowCounts};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_core::drift::{DriftFlag, DriftKey, DriftStatus, DriftType};
use vigil_core::record::{
    AssociationKey, DependencyAlias, DependencyOverride, ServiceAssociation, ServiceRecord,
    TeamManifestConfig,
};
use vigil_core::sync::SyncHistoryEntry;
use vigil_core::{DriftFlagId, ServiceId, TeamId};

use crate::error::Result;

/// A consistent read of everything one team's run diffs against.
#[derive(Debug, Clone)]
pub struct TeamSnapshot {
    /// The team's manifest configuration.
    pub config: TeamManifestConfig,

    /// All service records for the team, manifest-managed or not.
    pub services: Vec<ServiceRecord>,

    /// Dependency aliases for the team's services.
    pub aliases: Vec<DependencyAlias>,

    /// Dependency overrides for the team's services.
    pub overrides: Vec<DependencyOverride>,

    /// Associations for the team's services.
    pub associations: Vec<ServiceAssociation>,

    /// Drift flags still open (pending or accepted) for the team.
    pub open_drift_flags: Vec<DriftFlag>,
}

impl TeamSnapshot {
    /// Drift flags an admin has accepted, to be consumed as one-shot
    /// manifest-wins overrides by this run.
    #[must_use]
    pub fn accepted_flags(&self) -> Vec<&DriftFlag> {
        self.open_drift_flags
            .iter()
            .filter(|f| f.status == DriftStatus::Accepted)
            .collect()
    }
}

/// Filter for drift-flag listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFlagFilter {
    /// Restrict to one status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DriftStatus>,

    /// Restrict to one drift type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_type: Option<DriftType>,

    /// Restrict to one service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
}

impl DriftFlagFilter {
    /// Returns true if `flag` passes the filter.
    #[must_use]
    pub fn matches(&self, flag: &DriftFlag) -> bool {
        self.status.is_none_or_eq(flag.status)
            && self.drift_type.is_none_or_eq(flag.key.drift_type)
            && self.service_id.is_none_or_eq(flag.key.service_id)
    }
}

trait OptionMatch<T: PartialEq> {
    fn is_none_or_eq(&self, value: T) -> bool;
}

impl<T: PartialEq> OptionMatch<T> for Option<T> {
    fn is_none_or_eq(&self, value: T) -> bool {
        match self {
            None => true,
            Some(expected) => *expected == value,
        }
    }
}

/// Storage abstraction for reconciliation state.
///
/// All methods are `Send + Sync` to support concurrent per-team runs. The
/// reconciler is the only caller of the write methods during a run; the CRUD
/// surface owns writes between runs.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // --- Team configuration ---

    /// Gets a team's manifest configuration.
    async fn get_team_config(&self, team_id: TeamId) -> Result<Option<TeamManifestConfig>>;

    /// Lists every team's manifest configuration.
    async fn list_team_configs(&self) -> Result<Vec<TeamManifestConfig>>;

    /// Inserts or replaces a team's manifest configuration.
    async fn put_team_config(&self, config: &TeamManifestConfig) -> Result<()>;

    // --- Snapshot read ---

    /// Reads the team's full reconciliation snapshot in one call.
    ///
    /// Returns `None` if the team has no manifest configuration.
    async fn load_snapshot(&self, team_id: TeamId) -> Result<Option<TeamSnapshot>>;

    // --- Service writes ---

    /// Gets one service record.
    async fn get_service(&self, service_id: ServiceId) -> Result<Option<ServiceRecord>>;

    /// Inserts a new service record.
    async fn insert_service(&self, record: &ServiceRecord) -> Result<()>;

    /// Replaces an existing service record.
    async fn update_service(&self, record: &ServiceRecord) -> Result<()>;

    /// Sets a service's active flag, retaining the row.
    async fn set_service_active(&self, service_id: ServiceId, is_active: bool) -> Result<()>;

    /// Hard-deletes a service row. Relations are removed separately so the
    /// cascade honors the relation removal policies.
    async fn delete_service(&self, service_id: ServiceId) -> Result<()>;

    // --- Relation writes ---

    /// Inserts or replaces a dependency alias.
    async fn upsert_alias(&self, alias: &DependencyAlias) -> Result<()>;

    /// Removes a dependency alias.
    async fn remove_alias(&self, service_id: ServiceId, dependency_name: &str) -> Result<()>;

    /// Inserts or replaces a dependency override.
    async fn upsert_override(&self, record: &DependencyOverride) -> Result<()>;

    /// Removes a dependency override.
    async fn remove_override(&self, service_id: ServiceId, dependency_name: &str) -> Result<()>;

    /// Inserts an association.
    async fn insert_association(&self, association: &ServiceAssociation) -> Result<()>;

    /// Removes an association by its composite key.
    async fn remove_association(&self, service_id: ServiceId, key: &AssociationKey) -> Result<()>;

    // --- Drift flags ---

    /// Gets one drift flag by ID.
    async fn get_drift_flag(&self, flag_id: DriftFlagId) -> Result<Option<DriftFlag>>;

    /// Finds the open (pending or accepted) flag for a drift key, if any.
    ///
    /// At most one open flag exists per key; the drift manager's dedup
    /// depends on it.
    async fn find_open_flag(&self, team_id: TeamId, key: &DriftKey) -> Result<Option<DriftFlag>>;

    /// Inserts or replaces a drift flag row.
    async fn put_drift_flag(&self, flag: &DriftFlag) -> Result<()>;

    /// Lists a team's drift flags, filtered.
    async fn list_drift_flags(
        &self,
        team_id: TeamId,
        filter: &DriftFlagFilter,
    ) -> Result<Vec<DriftFlag>>;

    // --- Sync history ---

    /// Appends one immutable history row. Rejects duplicate IDs.
    async fn append_history(&self, entry: &SyncHistoryEntry) -> Result<()>;

    /// Lists a team's history rows, most recent first.
    async fn list_history(&self, team_id: TeamId, limit: usize) -> Result<Vec<SyncHistoryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::record::ServiceField;

    #[test]
    fn empty_filter_matches_everything() {
        let flag = DriftFlag::new(
            TeamId::generate(),
            DriftKey::field_change(ServiceId::generate(), ServiceField::Name),
            None,
            None,
            None,
        );
        assert!(DriftFlagFilter::default().matches(&flag));
    }

    #[test]
    fn filter_restricts_by_status_and_type() {
        let flag = DriftFlag::new(
            TeamId::generate(),
            DriftKey::service_removal(ServiceId::generate()),
            None,
            None,
            None,
        );

        let matching = DriftFlagFilter {
            status: Some(DriftStatus::Pending),
            drift_type: Some(DriftType::ServiceRemoval),
            service_id: None,
        };
        assert!(matching.matches(&flag));

        let wrong_type = DriftFlagFilter {
            drift_type: Some(DriftType::FieldChange),
            ..DriftFlagFilter::default()
        };
        assert!(!wrong_type.matches(&flag));
    }
}
