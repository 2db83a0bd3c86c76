//! Per-team conflict policy for manifest reconciliation.
//!
//! The policy is a value object consumed only by the resolver; every other
//! component of the engine is policy-agnostic. It is snapshotted when a run
//! enters the running state, so a mid-run policy edit affects the next run,
//! not the in-flight one.

use serde::{Deserialize, Serialize};

/// What to do when a field changed in both the manifest and the local store
/// since the last sync, to different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDriftPolicy {
    /// Raise a drift flag for human review; do not write the field.
    Flag,
    /// The manifest value wins; any pending flag is auto-resolved.
    ManifestWins,
    /// The local value wins; record a drift change entry for visibility.
    LocalWins,
}

/// What to do when a local service's `manifest_key` is absent from the new
/// manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Raise a `service_removal` drift flag; keep the row untouched.
    Flag,
    /// Set `is_active = false`, retaining the row.
    Deactivate,
    /// Hard-delete the row, cascading per the relation removal policies.
    Delete,
}

/// What to do when an alias/override/association is present locally but
/// absent from the manifest, for a service still present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationRemovalPolicy {
    /// Delete the row.
    Remove,
    /// Leave the row in place.
    Keep,
}

/// A team's complete reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSyncPolicy {
    /// Field-level conflict handling.
    pub on_field_drift: FieldDriftPolicy,

    /// Service removal handling.
    pub on_removal: RemovalPolicy,

    /// Alias removal handling.
    pub on_alias_removal: RelationRemovalPolicy,

    /// Contact/impact override removal handling.
    pub on_override_removal: RelationRemovalPolicy,

    /// Association removal handling.
    pub on_association_removal: RelationRemovalPolicy,
}

impl Default for ManifestSyncPolicy {
    /// The least destructive policy: flag conflicts and removals, keep
    /// relation rows.
    fn default() -> Self {
        Self {
            on_field_drift: FieldDriftPolicy::Flag,
            on_removal: RemovalPolicy::Flag,
            on_alias_removal: RelationRemovalPolicy::Keep,
            on_override_removal: RelationRemovalPolicy::Keep,
            on_association_removal: RelationRemovalPolicy::Keep,
        }
    }
}

impl ManifestSyncPolicy {
    /// A fully manifest-authoritative policy, useful for teams that never
    /// edit records by hand.
    #[must_use]
    pub const fn manifest_authoritative() -> Self {
        Self {
            on_field_drift: FieldDriftPolicy::ManifestWins,
            on_removal: RemovalPolicy::Delete,
            on_alias_removal: RelationRemovalPolicy::Remove,
            on_override_removal: RelationRemovalPolicy::Remove,
            on_association_removal: RelationRemovalPolicy::Remove,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_least_destructive() {
        let policy = ManifestSyncPolicy::default();
        assert_eq!(policy.on_field_drift, FieldDriftPolicy::Flag);
        assert_eq!(policy.on_removal, RemovalPolicy::Flag);
        assert_eq!(policy.on_alias_removal, RelationRemovalPolicy::Keep);
    }

    #[test]
    fn policy_round_trips_as_snake_case_json() {
        let policy = ManifestSyncPolicy::manifest_authoritative();
        let json = serde_json::to_value(policy).expect("serialize");
        assert_eq!(json["on_field_drift"], "manifest_wins");
        assert_eq!(json["on_removal"], "delete");

        let parsed: ManifestSyncPolicy = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, policy);
    }
}
