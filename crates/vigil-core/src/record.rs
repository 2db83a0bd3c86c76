//! Locally-mutable records reconciled against a team's manifest.
//!
//! These rows are owned by the row storage engine (an external collaborator);
//! the reconciliation engine is the only writer during a sync, while team
//! administrators may edit them directly through the CRUD surface between
//! syncs. That independent editing is the source of "drift".

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ServiceId, TeamId};
use crate::manifest::ManifestServiceEntry;
use crate::policy::ManifestSyncPolicy;
use crate::sync::{ManifestSyncSummary, SyncStatus};

/// The service fields mirrored from a manifest entry.
///
/// Modeled as an enum rather than raw strings so diffing, drift-flag keys,
/// and the last-synced-fields set stay exact and refactor-safe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceField {
    /// Human-readable service name.
    Name,
    /// Health-check endpoint URL.
    HealthEndpoint,
    /// Optional metrics endpoint URL.
    MetricsEndpoint,
    /// Optional free-form description.
    Description,
}

impl ServiceField {
    /// All mirrored fields, in diff order.
    pub const ALL: [Self; 4] = [
        Self::Name,
        Self::HealthEndpoint,
        Self::MetricsEndpoint,
        Self::Description,
    ];

    /// Stable wire name for this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::HealthEndpoint => "health_endpoint",
            Self::MetricsEndpoint => "metrics_endpoint",
            Self::Description => "description",
        }
    }

    /// Extracts this field's declared value from a manifest entry.
    ///
    /// `None` means the manifest did not declare the field (possible only for
    /// the optional fields; `name` and `health_endpoint` are required by
    /// validation).
    #[must_use]
    pub fn manifest_value(self, entry: &ManifestServiceEntry) -> Option<String> {
        match self {
            Self::Name => Some(entry.name.clone()),
            Self::HealthEndpoint => Some(entry.health_endpoint.clone()),
            Self::MetricsEndpoint => entry.metrics_endpoint.clone(),
            Self::Description => entry.description.clone(),
        }
    }
}

impl std::fmt::Display for ServiceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally-stored service row.
///
/// Services created outside a manifest have `manifest_key = None` and are
/// never touched by reconciliation. A non-null `manifest_key` is unique per
/// team and joins the row to exactly one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Internal row key.
    pub id: ServiceId,

    /// Owning team.
    pub team_id: TeamId,

    /// Join key to the team manifest, if this service is manifest-managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_key: Option<String>,

    /// Whether the service is active. Removal policy `deactivate` clears
    /// this instead of deleting the row.
    pub is_active: bool,

    /// Human-readable service name.
    pub name: String,

    /// Health-check endpoint URL.
    pub health_endpoint: String,

    /// Optional metrics endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,

    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Fields last written by a sync, by field name.
    ///
    /// Distinguishes "the manifest never declared this field" from "local
    /// value equals the manifest value by coincidence" when a later manifest
    /// omits the field.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub last_synced_fields: BTreeSet<ServiceField>,

    /// The manifest-origin value per field as of the last sync that wrote it.
    ///
    /// Three-way comparison against this map is what separates a true
    /// conflict (manifest and local both moved) from a manifest-only change
    /// (local still equals what the last sync wrote).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub manifest_origin: BTreeMap<ServiceField, Option<String>>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified (by sync or CRUD surface).
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// Builds a new manifest-managed service from a manifest entry.
    ///
    /// All declared fields are recorded as manifest-origin so the next sync
    /// starts from an exact baseline.
    #[must_use]
    pub fn from_manifest_entry(team_id: TeamId, entry: &ManifestServiceEntry) -> Self {
        let now = Utc::now();
        let mut record = Self {
            id: ServiceId::generate(),
            team_id,
            manifest_key: Some(entry.manifest_key.clone()),
            is_active: true,
            name: entry.name.clone(),
            health_endpoint: entry.health_endpoint.clone(),
            metrics_endpoint: entry.metrics_endpoint.clone(),
            description: entry.description.clone(),
            last_synced_fields: BTreeSet::new(),
            manifest_origin: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        for field in ServiceField::ALL {
            if let Some(value) = field.manifest_value(entry) {
                record.record_sync_write(field, Some(value));
            }
        }
        record
    }

    /// Returns the current local value of a mirrored field.
    #[must_use]
    pub fn field_value(&self, field: ServiceField) -> Option<String> {
        match field {
            ServiceField::Name => Some(self.name.clone()),
            ServiceField::HealthEndpoint => Some(self.health_endpoint.clone()),
            ServiceField::MetricsEndpoint => self.metrics_endpoint.clone(),
            ServiceField::Description => self.description.clone(),
        }
    }

    /// Writes a mirrored field without updating sync bookkeeping.
    ///
    /// This is the CRUD-surface write path; sync writes go through
    /// [`Self::apply_sync_write`].
    pub fn set_field_value(&mut self, field: ServiceField, value: Option<String>) {
        match field {
            ServiceField::Name => self.name = value.unwrap_or_default(),
            ServiceField::HealthEndpoint => self.health_endpoint = value.unwrap_or_default(),
            ServiceField::MetricsEndpoint => self.metrics_endpoint = value,
            ServiceField::Description => self.description = value,
        }
        self.updated_at = Utc::now();
    }

    /// Applies a manifest value to a field and records it as sync-written.
    pub fn apply_sync_write(&mut self, field: ServiceField, value: Option<String>) {
        self.set_field_value(field, value.clone());
        self.record_sync_write(field, value);
    }

    /// The manifest-origin value for a field, if any sync has written it.
    #[must_use]
    pub fn origin_value(&self, field: ServiceField) -> Option<&Option<String>> {
        self.manifest_origin.get(&field)
    }

    /// Returns true if any prior sync declared this field.
    #[must_use]
    pub fn field_ever_synced(&self, field: ServiceField) -> bool {
        self.last_synced_fields.contains(&field)
    }

    fn record_sync_write(&mut self, field: ServiceField, value: Option<String>) {
        self.last_synced_fields.insert(field);
        self.manifest_origin.insert(field, value);
    }
}

/// A display alias for one of a service's dependencies.
///
/// Keyed by `(service_id, dependency_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAlias {
    /// The service whose dependency is aliased.
    pub service_id: ServiceId,

    /// Dependency name as reported by the service.
    pub dependency_name: String,

    /// Display alias.
    pub alias: String,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Contact/impact overrides for one of a service's dependencies.
///
/// Keyed by `(service_id, dependency_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyOverride {
    /// The service whose dependency is annotated.
    pub service_id: ServiceId,

    /// Dependency name as reported by the service.
    pub dependency_name: String,

    /// Who to contact when the dependency is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    /// What breaks when the dependency is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Composite identity of a service-to-service association.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssociationKey {
    /// The dependency this association annotates.
    pub dependency_name: String,

    /// `manifest_key` of the linked service.
    pub linked_service_key: String,

    /// Kind of relationship.
    pub association_type: String,
}

/// A link from one service's dependency to another service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAssociation {
    /// The service owning the dependency.
    pub service_id: ServiceId,

    /// Composite association identity.
    #[serde(flatten)]
    pub key: AssociationKey,

    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// Per-team manifest configuration and last-run bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamManifestConfig {
    /// The team this configuration belongs to.
    pub team_id: TeamId,

    /// Where the team hosts its manifest. One manifest URL per team.
    pub manifest_url: String,

    /// Whether scheduled syncs include this team. Manual syncs are allowed
    /// regardless; pressing "sync now" on a disabled team is explicit intent.
    pub is_enabled: bool,

    /// The team's conflict policy, snapshotted at sync start.
    pub policy: ManifestSyncPolicy,

    /// When the most recent run finished, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Status of the most recent run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_status: Option<SyncStatus>,

    /// First recorded error of the most recent run, if it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,

    /// Summary of the most recent run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_summary: Option<ManifestSyncSummary>,
}

impl TeamManifestConfig {
    /// Creates a new enabled configuration with the default (least
    /// destructive) policy.
    #[must_use]
    pub fn new(team_id: TeamId, manifest_url: impl Into<String>) -> Self {
        Self {
            team_id,
            manifest_url: manifest_url.into(),
            is_enabled: true,
            policy: ManifestSyncPolicy::default(),
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            last_sync_summary: None,
        }
    }
}
