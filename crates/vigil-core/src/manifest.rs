//! Wire types for the externally-hosted team manifest.
//!
//! A manifest is a declarative JSON document a team hosts at a URL of its
//! choosing, enumerating the team's services and their metadata. It is
//! fetched and reconciled against local records by `vigil-sync`; nothing in
//! this process writes the manifest back.
//!
//! # Wire format
//!
//! ```json
//! { "version": 1,
//!   "services": [
//!     { "manifest_key": "svc-payments",
//!       "name": "Payments",
//!       "health_endpoint": "https://payments.internal/health",
//!       "dependencies": [{ "name": "postgres", "alias": "payments-db" }],
//!       "associations": [{ "dependency_name": "ledger-api",
//!                          "linked_service_key": "svc-ledger",
//!                          "association_type": "api_call" }]
//!     }
//!   ] }
//! ```

use serde::{Deserialize, Serialize};

/// Manifest schema versions this engine understands.
///
/// A document with any other `version` is rejected entirely; there is no
/// partial validation across schema versions.
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// A complete, externally-authored manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    /// Manifest schema version.
    pub version: u32,

    /// The team's declared services.
    pub services: Vec<ManifestServiceEntry>,
}

/// One declared service within a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestServiceEntry {
    /// Stable identity, unique within a manifest. Joins to
    /// [`ServiceRecord::manifest_key`](crate::record::ServiceRecord::manifest_key)
    /// across syncs.
    pub manifest_key: String,

    /// Human-readable service name.
    pub name: String,

    /// Health-check endpoint URL. Polled by a separate poller, not by the
    /// reconciliation engine.
    pub health_endpoint: String,

    /// Optional metrics endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,

    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared dependencies of this service.
    #[serde(default)]
    pub dependencies: Vec<ManifestDependencyEntry>,

    /// Declared service-to-service associations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associations: Option<Vec<ManifestAssociationEntry>>,
}

impl ManifestServiceEntry {
    /// Returns the declared associations, or an empty slice when none were
    /// declared.
    #[must_use]
    pub fn associations(&self) -> &[ManifestAssociationEntry] {
        self.associations.as_deref().unwrap_or_default()
    }
}

/// One declared dependency of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDependencyEntry {
    /// Dependency name as reported by the service.
    pub name: String,

    /// Optional display alias for the dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Optional contact override shown when the dependency is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_override: Option<String>,

    /// Optional impact override shown when the dependency is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_override: Option<String>,
}

impl ManifestDependencyEntry {
    /// Returns true if this entry declares a contact or impact override.
    #[must_use]
    pub fn has_override(&self) -> bool {
        self.contact_override.is_some() || self.impact_override.is_some()
    }
}

/// A declared association between a dependency and another service in the
/// same manifest (or another team's manifest, by key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAssociationEntry {
    /// The dependency this association annotates.
    pub dependency_name: String,

    /// `manifest_key` of the linked service.
    pub linked_service_key: String,

    /// Kind of relationship, e.g. `api_call`, `queue`, `database`.
    pub association_type: String,
}
