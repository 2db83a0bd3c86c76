//! Pure diff computation between a validated manifest and a team snapshot.
//!
//! The diff engine has no side effects and no policy knowledge: it classifies
//! what changed and whether each field change is a true conflict, leaving the
//! decision of what to do about it to the resolver.
//!
//! ## Three-way field comparison
//!
//! Each mirrored field is compared across three values: the manifest's
//! declared value, the stored manifest-origin value (what the last sync
//! wrote), and the current local value. A field is *changed* only when the
//! manifest moved away from its origin AND the local value differs from the
//! manifest value; it is a *conflict* when the local value also moved away
//! from the origin. This keeps two cases quiet: fields a user never touched,
//! and fields where manifest and local already happen to agree.
//!
//! An absent manifest field is "no opinion" unless some prior sync declared
//! the field for this service (tracked in the per-service last-synced-fields
//! set), in which case the omission is an opinion to clear it.

use std::collections::{BTreeMap, HashMap, HashSet};

use vigil_core::manifest::ManifestServiceEntry;
use vigil_core::record::{AssociationKey, ServiceField, ServiceRecord};
use vigil_core::ServiceId;

use crate::store::TeamSnapshot;

/// One field-level difference between manifest and local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// The affected field.
    pub field: ServiceField,

    /// The manifest's effective opinion (None clears the field).
    pub manifest_value: Option<String>,

    /// The current local value.
    pub current_value: Option<String>,

    /// True when both sides moved since the last sync, to different values.
    pub conflict: bool,
}

/// Per-entry classification against the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDiff {
    /// No local record carries this entry's `manifest_key`.
    Created {
        /// The manifest entry to create from.
        entry: ManifestServiceEntry,
    },

    /// The matched record differs on one or more fields.
    Updated {
        /// The matched local record.
        service_id: ServiceId,
        /// The join key.
        manifest_key: String,
        /// Current local service name, for change entries.
        service_name: String,
        /// Field-level differences, conflict-marked.
        changes: Vec<FieldChange>,
    },

    /// The matched record agrees with the manifest on every declared field.
    Unchanged {
        /// The matched local record.
        service_id: ServiceId,
        /// The join key.
        manifest_key: String,
        /// Current local service name.
        service_name: String,
    },

    /// A local manifest-managed record whose key is absent from the new
    /// manifest.
    RemovalCandidate {
        /// The orphaned local record.
        service_id: ServiceId,
        /// The join key no longer present.
        manifest_key: String,
        /// Current local service name.
        service_name: String,
        /// Whether the record is still active (an inactive record under the
        /// `deactivate` policy needs no further action).
        is_active: bool,
        /// Dependency names of the record's aliases, for delete cascades.
        alias_names: Vec<String>,
        /// Dependency names of the record's overrides, for delete cascades.
        override_names: Vec<String>,
        /// Association keys of the record, for delete cascades.
        association_keys: Vec<AssociationKey>,
    },
}

/// A relation-level difference for a service still present in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDiff {
    /// Manifest declares an alias with no local row.
    AliasCreate(RelationContext, String, String),
    /// Manifest and local alias values differ.
    AliasUpdate(RelationContext, String, String),
    /// Local alias row with no manifest counterpart.
    AliasRemovalCandidate(RelationContext, String),
    /// Manifest declares an override with no local row.
    OverrideCreate(RelationContext, String, OverridePair),
    /// Manifest and local override values differ.
    OverrideUpdate(RelationContext, String, OverridePair),
    /// Local override row with no manifest counterpart.
    OverrideRemovalCandidate(RelationContext, String),
    /// Manifest declares an association with no local row.
    AssociationCreate(RelationContext, AssociationKey),
    /// Local association row with no manifest counterpart.
    AssociationRemovalCandidate(RelationContext, AssociationKey),
}

/// The service a relation diff belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationContext {
    /// The owning service.
    pub service_id: ServiceId,
    /// The owning service's manifest key.
    pub manifest_key: String,
    /// The owning service's current name.
    pub service_name: String,
}

/// Contact/impact override values from a manifest dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePair {
    /// Contact override.
    pub contact: Option<String>,
    /// Impact override.
    pub impact: Option<String>,
}

/// The complete diff for one team's run.
#[derive(Debug, Clone, Default)]
pub struct TeamDiff {
    /// Per-entry and per-removal-candidate service diffs.
    pub services: Vec<ServiceDiff>,

    /// Relation diffs for services present in both manifest and store.
    pub relations: Vec<RelationDiff>,
}

/// Computes the diff between validated manifest entries and the snapshot.
///
/// Records with `manifest_key = None` were created outside a manifest and
/// are never considered.
#[must_use]
pub fn diff_team(entries: &[ManifestServiceEntry], snapshot: &TeamSnapshot) -> TeamDiff {
    let mut diff = TeamDiff::default();

    let by_key: HashMap<&str, &ServiceRecord> = snapshot
        .services
        .iter()
        .filter_map(|s| s.manifest_key.as_deref().map(|k| (k, s)))
        .collect();

    for entry in entries {
        match by_key.get(entry.manifest_key.as_str()) {
            None => diff.services.push(ServiceDiff::Created {
                entry: entry.clone(),
            }),
            Some(record) => {
                let changes = diff_fields(entry, record);
                if changes.is_empty() {
                    diff.services.push(ServiceDiff::Unchanged {
                        service_id: record.id,
                        manifest_key: entry.manifest_key.clone(),
                        service_name: record.name.clone(),
                    });
                } else {
                    diff.services.push(ServiceDiff::Updated {
                        service_id: record.id,
                        manifest_key: entry.manifest_key.clone(),
                        service_name: record.name.clone(),
                        changes,
                    });
                }
                diff_relations(entry, record, snapshot, &mut diff.relations);
            }
        }
    }

    // Local manifest-managed records absent from the new manifest.
    let manifest_keys: HashSet<&str> = entries.iter().map(|e| e.manifest_key.as_str()).collect();
    for record in &snapshot.services {
        let Some(key) = record.manifest_key.as_deref() else {
            continue;
        };
        if manifest_keys.contains(key) {
            continue;
        }
        diff.services.push(ServiceDiff::RemovalCandidate {
            service_id: record.id,
            manifest_key: key.to_string(),
            service_name: record.name.clone(),
            is_active: record.is_active,
            alias_names: snapshot
                .aliases
                .iter()
                .filter(|a| a.service_id == record.id)
                .map(|a| a.dependency_name.clone())
                .collect(),
            override_names: snapshot
                .overrides
                .iter()
                .filter(|o| o.service_id == record.id)
                .map(|o| o.dependency_name.clone())
                .collect(),
            association_keys: snapshot
                .associations
                .iter()
                .filter(|a| a.service_id == record.id)
                .map(|a| a.key.clone())
                .collect(),
        });
    }

    diff
}

fn diff_fields(entry: &ManifestServiceEntry, record: &ServiceRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for field in ServiceField::ALL {
        let opinion = match field.manifest_value(entry) {
            Some(value) => Some(value),
            // Absent field: an opinion to clear only if a prior sync
            // declared it for this service.
            None if record.field_ever_synced(field) => None,
            None => continue,
        };

        let local = record.field_value(field);
        if local == opinion {
            continue;
        }

        let origin = record.origin_value(field).cloned();
        let manifest_moved = match &origin {
            Some(origin_value) => *origin_value != opinion,
            None => true,
        };
        if !manifest_moved {
            // Local-only edit; the manifest still declares what it always
            // did, so this is not the manifest's concern.
            continue;
        }

        let local_moved = match &origin {
            Some(origin_value) => local != *origin_value,
            // Never synced: a populated local value is a local edit, an
            // empty one is virgin ground.
            None => local.is_some(),
        };

        changes.push(FieldChange {
            field,
            manifest_value: opinion,
            current_value: local,
            conflict: local_moved,
        });
    }

    changes
}

fn diff_relations(
    entry: &ManifestServiceEntry,
    record: &ServiceRecord,
    snapshot: &TeamSnapshot,
    out: &mut Vec<RelationDiff>,
) {
    let context = RelationContext {
        service_id: record.id,
        manifest_key: entry.manifest_key.clone(),
        service_name: record.name.clone(),
    };

    // Aliases, keyed by dependency name.
    let desired_aliases: BTreeMap<&str, &str> = entry
        .dependencies
        .iter()
        .filter_map(|d| d.alias.as_deref().map(|a| (d.name.as_str(), a)))
        .collect();
    let current_aliases: BTreeMap<&str, &str> = snapshot
        .aliases
        .iter()
        .filter(|a| a.service_id == record.id)
        .map(|a| (a.dependency_name.as_str(), a.alias.as_str()))
        .collect();

    for (name, alias) in &desired_aliases {
        match current_aliases.get(name) {
            None => out.push(RelationDiff::AliasCreate(
                context.clone(),
                (*name).to_string(),
                (*alias).to_string(),
            )),
            Some(current) if current != alias => out.push(RelationDiff::AliasUpdate(
                context.clone(),
                (*name).to_string(),
                (*alias).to_string(),
            )),
            Some(_) => {}
        }
    }
    for name in current_aliases.keys() {
        if !desired_aliases.contains_key(name) {
            out.push(RelationDiff::AliasRemovalCandidate(
                context.clone(),
                (*name).to_string(),
            ));
        }
    }

    // Overrides, keyed by dependency name.
    let desired_overrides: BTreeMap<&str, OverridePair> = entry
        .dependencies
        .iter()
        .filter(|d| d.has_override())
        .map(|d| {
            (
                d.name.as_str(),
                OverridePair {
                    contact: d.contact_override.clone(),
                    impact: d.impact_override.clone(),
                },
            )
        })
        .collect();
    let current_overrides: BTreeMap<&str, OverridePair> = snapshot
        .overrides
        .iter()
        .filter(|o| o.service_id == record.id)
        .map(|o| {
            (
                o.dependency_name.as_str(),
                OverridePair {
                    contact: o.contact.clone(),
                    impact: o.impact.clone(),
                },
            )
        })
        .collect();

    for (name, pair) in &desired_overrides {
        match current_overrides.get(name) {
            None => out.push(RelationDiff::OverrideCreate(
                context.clone(),
                (*name).to_string(),
                pair.clone(),
            )),
            Some(current) if current != pair => out.push(RelationDiff::OverrideUpdate(
                context.clone(),
                (*name).to_string(),
                pair.clone(),
            )),
            Some(_) => {}
        }
    }
    for name in current_overrides.keys() {
        if !desired_overrides.contains_key(name) {
            out.push(RelationDiff::OverrideRemovalCandidate(
                context.clone(),
                (*name).to_string(),
            ));
        }
    }

    // Associations, keyed by the full composite key.
    let desired_associations: Vec<AssociationKey> = entry
        .associations()
        .iter()
        .map(|a| AssociationKey {
            dependency_name: a.dependency_name.clone(),
            linked_service_key: a.linked_service_key.clone(),
            association_type: a.association_type.clone(),
        })
        .collect();
    let current_associations: Vec<&AssociationKey> = snapshot
        .associations
        .iter()
        .filter(|a| a.service_id == record.id)
        .map(|a| &a.key)
        .collect();

    for key in &desired_associations {
        if !current_associations.contains(&key) {
            out.push(RelationDiff::AssociationCreate(context.clone(), key.clone()));
        }
    }
    for key in current_associations {
        if !desired_associations.contains(key) {
            out.push(RelationDiff::AssociationRemovalCandidate(
                context.clone(),
                key.clone(),
            ));
        }
    }
}
