//! Sync run outcomes: changes, summaries, results, and the audit history row.
//!
//! A [`ManifestSyncResult`] is the in-memory return value of one orchestrated
//! run; a [`SyncHistoryEntry`] is the append-only audit row recorded for the
//! same run. Exactly one history row exists per run, whether it succeeded,
//! degraded to partial, or failed before any diffing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{SyncHistoryId, TeamId};
use crate::record::ServiceField;

/// Overall status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Every resolved action applied cleanly.
    Success,
    /// At least one per-item apply error; remaining actions still ran.
    Partial,
    /// Fetch or validation failed before any diffing; zero local mutations.
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Partial => f.write_str("partial"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// User-initiated from the admin UI.
    Manual,
    /// Initiated by the sync scheduler.
    Scheduled,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// What one applied action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// A service was created from a manifest entry.
    Created,
    /// One or more service fields were updated from the manifest.
    Updated,
    /// The manifest entry matched local state; nothing written.
    Unchanged,
    /// A drift condition was flagged (or left for human review under
    /// `local_wins`); the field was not written.
    DriftFlagged,
    /// The service was deactivated under the `deactivate` removal policy.
    Deactivated,
    /// The service row was hard-deleted under the `delete` removal policy.
    Deleted,
    /// A dependency alias was created.
    AliasCreated,
    /// A dependency alias was updated.
    AliasUpdated,
    /// A dependency alias was removed.
    AliasRemoved,
    /// A dependency override was created.
    OverrideCreated,
    /// A dependency override was updated.
    OverrideUpdated,
    /// A dependency override was removed.
    OverrideRemoved,
    /// A service association was created.
    AssociationCreated,
    /// A service association was removed.
    AssociationRemoved,
}

/// One per-item outcome within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSyncChange {
    /// The manifest key of the affected service.
    pub manifest_key: String,

    /// The service name at the time of the change.
    pub service_name: String,

    /// What happened.
    pub action: SyncAction,

    /// For `updated`: the fields written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_changed: Option<Vec<ServiceField>>,

    /// For `drift_flagged`: the fields left for review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_fields: Option<Vec<ServiceField>>,
}

impl ManifestSyncChange {
    /// A change entry with no field detail.
    #[must_use]
    pub fn new(
        manifest_key: impl Into<String>,
        service_name: impl Into<String>,
        action: SyncAction,
    ) -> Self {
        Self {
            manifest_key: manifest_key.into(),
            service_name: service_name.into(),
            action,
            fields_changed: None,
            drift_fields: None,
        }
    }
}

/// Per-kind service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounts {
    /// Services created.
    #[serde(default)]
    pub created: u32,
    /// Services updated.
    #[serde(default)]
    pub updated: u32,
    /// Services left untouched.
    #[serde(default)]
    pub unchanged: u32,
    /// Services with drift left for review.
    #[serde(default)]
    pub drift_flagged: u32,
    /// Services deactivated.
    #[serde(default)]
    pub deactivated: u32,
    /// Services hard-deleted.
    #[serde(default)]
    pub deleted: u32,
}

/// Per-kind relation counters (aliases, overrides, associations).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCounts {
    /// Rows created.
    #[serde(default)]
    pub created: u32,
    /// Rows updated.
    #[serde(default)]
    pub updated: u32,
    /// Rows removed.
    #[serde(default)]
    pub removed: u32,
}

/// Aggregated counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSyncSummary {
    /// Service outcomes.
    #[serde(default)]
    pub services: ServiceCounts,
    /// Alias outcomes.
    #[serde(default)]
    pub aliases: RelationCounts,
    /// Override outcomes.
    #[serde(default)]
    pub overrides: RelationCounts,
    /// Association outcomes.
    #[serde(default)]
    pub associations: RelationCounts,
    /// Drift flags raised or refreshed this run.
    #[serde(default)]
    pub drift_flags_raised: u32,
    /// Pending flags auto-resolved by applying the manifest value.
    #[serde(default)]
    pub drift_flags_resolved: u32,
}

impl ManifestSyncSummary {
    /// Bumps the counter matching an applied action.
    pub fn record(&mut self, action: SyncAction) {
        match action {
            SyncAction::Created => self.services.created += 1,
            SyncAction::Updated => self.services.updated += 1,
            SyncAction::Unchanged => self.services.unchanged += 1,
            SyncAction::DriftFlagged => self.services.drift_flagged += 1,
            SyncAction::Deactivated => self.services.deactivated += 1,
            SyncAction::Deleted => self.services.deleted += 1,
            SyncAction::AliasCreated => self.aliases.created += 1,
            SyncAction::AliasUpdated => self.aliases.updated += 1,
            SyncAction::AliasRemoved => self.aliases.removed += 1,
            SyncAction::OverrideCreated => self.overrides.created += 1,
            SyncAction::OverrideUpdated => self.overrides.updated += 1,
            SyncAction::OverrideRemoved => self.overrides.removed += 1,
            SyncAction::AssociationCreated => self.associations.created += 1,
            SyncAction::AssociationRemoved => self.associations.removed += 1,
        }
    }

    /// Returns true if the run wrote nothing and flagged nothing.
    #[must_use]
    pub fn is_all_unchanged(&self) -> bool {
        let s = self.services;
        s.created == 0
            && s.updated == 0
            && s.drift_flagged == 0
            && s.deactivated == 0
            && s.deleted == 0
            && self.aliases == RelationCounts::default()
            && self.overrides == RelationCounts::default()
            && self.associations == RelationCounts::default()
            && self.drift_flags_raised == 0
    }
}

/// The in-memory, non-persisted outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSyncResult {
    /// The team that was synced.
    pub team_id: TeamId,

    /// Overall status.
    pub status: SyncStatus,

    /// Aggregated counters.
    pub summary: ManifestSyncSummary,

    /// Fetch, validation, or per-item apply errors.
    pub errors: Vec<String>,

    /// Validation warnings (the run still syncs with warnings).
    pub warnings: Vec<String>,

    /// Per-item outcomes, in apply order.
    pub changes: Vec<ManifestSyncChange>,
}

impl ManifestSyncResult {
    /// A failed result with zero mutations, for fetch/validation failures.
    #[must_use]
    pub fn failed(team_id: TeamId, errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            team_id,
            status: SyncStatus::Failed,
            summary: ManifestSyncSummary::default(),
            errors,
            warnings,
            changes: Vec::new(),
        }
    }
}

/// One append-only audit row per orchestrated run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// Row identity, generated at run start.
    pub id: SyncHistoryId,

    /// The team that was synced.
    pub team_id: TeamId,

    /// How the run was triggered.
    pub trigger_type: TriggerType,

    /// Who triggered the run, for manual triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,

    /// The manifest URL that was fetched.
    pub manifest_url: String,

    /// Overall status.
    pub status: SyncStatus,

    /// Aggregated counters.
    pub summary: ManifestSyncSummary,

    /// Errors recorded during the run.
    pub errors: Vec<String>,

    /// Warnings recorded during the run.
    pub warnings: Vec<String>,

    /// Per-item outcomes, in apply order.
    pub changes: Vec<ManifestSyncChange>,

    /// Wall-clock duration from fetch start to history write.
    pub duration_ms: u64,

    /// When the row was written.
    pub created_at: DateTime<Utc>,
}
