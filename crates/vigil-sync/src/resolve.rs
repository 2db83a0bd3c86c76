//! Policy resolution: turns a [`TeamDiff`](crate::diff::TeamDiff) into an
//! ordered plan of storage actions.
//!
//! The resolver is the only component that reads the team's sync policy. It
//! never touches storage; the output plan is applied by the reconciler with
//! per-action error isolation.
//!
//! Accepted drift flags act as one-shot overrides: an `accepted` flag whose
//! key matches a pending decision forces the manifest side for that decision
//! alone, and the plan records the flag so the apply phase can mark it
//! resolved.

use std::collections::HashMap;

use vigil_core::drift::DriftKey;
use vigil_core::manifest::ManifestServiceEntry;
use vigil_core::policy::{FieldDriftPolicy, ManifestSyncPolicy, RelationRemovalPolicy, RemovalPolicy};
use vigil_core::record::{AssociationKey, ServiceField};
use vigil_core::{DriftFlagId, ServiceId};

use crate::diff::{OverridePair, RelationDiff, ServiceDiff, TeamDiff};
use crate::store::TeamSnapshot;

/// One field write within a service update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWrite {
    /// The field to write.
    pub field: ServiceField,
    /// The value to write (None clears the field).
    pub value: Option<String>,
}

/// All resolved writes against one existing service.
#[derive(Debug, Clone)]
pub struct ServiceUpdate {
    /// The target service.
    pub service_id: ServiceId,
    /// The service's manifest key, for change reporting.
    pub manifest_key: String,
    /// The service's current name, for change reporting.
    pub service_name: String,
    /// Field writes to apply.
    pub writes: Vec<FieldWrite>,
    /// Accepted flags consumed by these writes.
    pub consumed_flags: Vec<DriftFlagId>,
}

/// A drift condition the apply phase should flag (or refresh).
#[derive(Debug, Clone)]
pub struct DriftObservation {
    /// The deduplication key.
    pub key: DriftKey,
    /// The affected service's manifest key.
    pub manifest_key: String,
    /// The affected service's current name.
    pub service_name: String,
    /// The manifest-side value at detection time.
    pub manifest_value: Option<String>,
    /// The local value at detection time.
    pub current_value: Option<String>,
}

/// A resolved relation write.
#[derive(Debug, Clone)]
pub enum RelationAction {
    /// Create or update a dependency alias.
    UpsertAlias {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The aliased dependency.
        dependency_name: String,
        /// The alias value.
        alias: String,
        /// True for a new row, false for an update.
        created: bool,
    },
    /// Remove a dependency alias.
    RemoveAlias {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The aliased dependency.
        dependency_name: String,
    },
    /// Create or update a dependency override.
    UpsertOverride {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The overridden dependency.
        dependency_name: String,
        /// Contact and impact values.
        values: OverridePair,
        /// True for a new row, false for an update.
        created: bool,
    },
    /// Remove a dependency override.
    RemoveOverride {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The overridden dependency.
        dependency_name: String,
    },
    /// Create a service association.
    AddAssociation {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The association to add.
        key: AssociationKey,
    },
    /// Remove a service association.
    RemoveAssociation {
        /// The owning service.
        service_id: ServiceId,
        /// The owning service's manifest key.
        manifest_key: String,
        /// The owning service's name.
        service_name: String,
        /// The association to remove.
        key: AssociationKey,
    },
}

/// A resolved removal write.
#[derive(Debug, Clone)]
pub enum RemovalAction {
    /// Mark the service inactive.
    Deactivate {
        /// The target service.
        service_id: ServiceId,
        /// The target's manifest key.
        manifest_key: String,
        /// The target's name.
        service_name: String,
        /// Accepted flag consumed by this removal, if any.
        consumed_flag: Option<DriftFlagId>,
    },
    /// Delete the service row and the relation rows the relation policies
    /// allow cascading to.
    Delete {
        /// The target service.
        service_id: ServiceId,
        /// The target's manifest key.
        manifest_key: String,
        /// The target's name.
        service_name: String,
        /// Alias rows to cascade-delete.
        alias_names: Vec<String>,
        /// Override rows to cascade-delete.
        override_names: Vec<String>,
        /// Association rows to cascade-delete.
        association_keys: Vec<AssociationKey>,
        /// Accepted flag consumed by this removal, if any.
        consumed_flag: Option<DriftFlagId>,
    },
}

/// A matched service the manifest agrees with, kept for summary counting.
#[derive(Debug, Clone)]
pub struct UnchangedService {
    /// The matched service's manifest key.
    pub manifest_key: String,
    /// The matched service's name.
    pub service_name: String,
}

/// The ordered plan for one team's run.
///
/// The apply order is fixed: creates, then field updates, then relations,
/// then drift flags, then removals.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPlan {
    /// New services to create from manifest entries.
    pub creates: Vec<ManifestServiceEntry>,
    /// Field writes against existing services.
    pub updates: Vec<ServiceUpdate>,
    /// Relation writes against existing services.
    pub relations: Vec<RelationAction>,
    /// Drift conditions to flag.
    pub drift: Vec<DriftObservation>,
    /// Conflicts kept local under `local_wins`: reported as `drift_flagged`
    /// change entries for visibility, but no flag row is written.
    pub drift_notes: Vec<DriftObservation>,
    /// Removal writes.
    pub removals: Vec<RemovalAction>,
    /// Matched services with no differences.
    pub unchanged: Vec<UnchangedService>,
}

/// Resolves a diff into a plan under the snapshot's policy.
#[must_use]
pub fn resolve_team(diff: &TeamDiff, snapshot: &TeamSnapshot) -> ResolvedPlan {
    let policy = &snapshot.config.policy;
    let mut plan = ResolvedPlan::default();

    // Accepted flags indexed by key; each may be consumed at most once.
    let mut accepted: HashMap<DriftKey, DriftFlagId> = snapshot
        .accepted_flags()
        .into_iter()
        .map(|flag| (flag.key, flag.id))
        .collect();

    for service in &diff.services {
        match service {
            ServiceDiff::Created { entry } => plan.creates.push(entry.clone()),
            ServiceDiff::Unchanged {
                manifest_key,
                service_name,
                ..
            } => plan.unchanged.push(UnchangedService {
                manifest_key: manifest_key.clone(),
                service_name: service_name.clone(),
            }),
            ServiceDiff::Updated {
                service_id,
                manifest_key,
                service_name,
                changes,
            } => {
                let mut update = ServiceUpdate {
                    service_id: *service_id,
                    manifest_key: manifest_key.clone(),
                    service_name: service_name.clone(),
                    writes: Vec::new(),
                    consumed_flags: Vec::new(),
                };
                let mut withheld = false;
                for change in changes {
                    let key = DriftKey::field_change(*service_id, change.field);
                    let accepted_flag = accepted.remove(&key);

                    let observation = || DriftObservation {
                        key,
                        manifest_key: manifest_key.clone(),
                        service_name: service_name.clone(),
                        manifest_value: change.manifest_value.clone(),
                        current_value: change.current_value.clone(),
                    };
                    let write = if change.conflict {
                        if let Some(flag_id) = accepted_flag {
                            update.consumed_flags.push(flag_id);
                            true
                        } else {
                            match policy.on_field_drift {
                                FieldDriftPolicy::ManifestWins => true,
                                FieldDriftPolicy::LocalWins => {
                                    plan.drift_notes.push(observation());
                                    withheld = true;
                                    false
                                }
                                FieldDriftPolicy::Flag => {
                                    plan.drift.push(observation());
                                    withheld = true;
                                    false
                                }
                            }
                        }
                    } else {
                        // Only the manifest moved; applies under any policy.
                        true
                    };

                    if write {
                        update.writes.push(FieldWrite {
                            field: change.field,
                            value: change.manifest_value.clone(),
                        });
                    }
                }
                debug_assert!(!update.writes.is_empty() || withheld);
                // A service whose every change was withheld is represented by
                // its drift entries alone, not double-counted as unchanged.
                if !update.writes.is_empty() {
                    plan.updates.push(update);
                }
            }
            ServiceDiff::RemovalCandidate {
                service_id,
                manifest_key,
                service_name,
                is_active,
                alias_names,
                override_names,
                association_keys,
            } => {
                let key = DriftKey::service_removal(*service_id);
                let consumed_flag = accepted.remove(&key);

                if consumed_flag.is_some() {
                    // An accepted removal flag deactivates regardless of the
                    // configured removal policy.
                    plan.removals.push(RemovalAction::Deactivate {
                        service_id: *service_id,
                        manifest_key: manifest_key.clone(),
                        service_name: service_name.clone(),
                        consumed_flag,
                    });
                    continue;
                }

                match policy.on_removal {
                    RemovalPolicy::Flag => plan.drift.push(DriftObservation {
                        key,
                        manifest_key: manifest_key.clone(),
                        service_name: service_name.clone(),
                        manifest_value: None,
                        current_value: Some(service_name.clone()),
                    }),
                    RemovalPolicy::Deactivate => {
                        if *is_active {
                            plan.removals.push(RemovalAction::Deactivate {
                                service_id: *service_id,
                                manifest_key: manifest_key.clone(),
                                service_name: service_name.clone(),
                                consumed_flag: None,
                            });
                        }
                        // Already inactive: nothing to do, keeps reruns quiet.
                    }
                    RemovalPolicy::Delete => plan.removals.push(RemovalAction::Delete {
                        service_id: *service_id,
                        manifest_key: manifest_key.clone(),
                        service_name: service_name.clone(),
                        alias_names: cascade(policy.on_alias_removal, alias_names),
                        override_names: cascade(policy.on_override_removal, override_names),
                        association_keys: cascade(policy.on_association_removal, association_keys),
                        consumed_flag: None,
                    }),
                }
            }
        }
    }

    for relation in &diff.relations {
        resolve_relation(relation, policy, &mut plan);
    }

    plan
}

fn cascade<T: Clone>(policy: RelationRemovalPolicy, rows: &[T]) -> Vec<T> {
    match policy {
        RelationRemovalPolicy::Remove => rows.to_vec(),
        RelationRemovalPolicy::Keep => Vec::new(),
    }
}

fn resolve_relation(relation: &RelationDiff, policy: &ManifestSyncPolicy, plan: &mut ResolvedPlan) {
    match relation {
        RelationDiff::AliasCreate(ctx, name, alias)
        | RelationDiff::AliasUpdate(ctx, name, alias) => {
            plan.relations.push(RelationAction::UpsertAlias {
                service_id: ctx.service_id,
                manifest_key: ctx.manifest_key.clone(),
                service_name: ctx.service_name.clone(),
                dependency_name: name.clone(),
                alias: alias.clone(),
                created: matches!(relation, RelationDiff::AliasCreate(..)),
            });
        }
        RelationDiff::AliasRemovalCandidate(ctx, name) => {
            if policy.on_alias_removal == RelationRemovalPolicy::Remove {
                plan.relations.push(RelationAction::RemoveAlias {
                    service_id: ctx.service_id,
                    manifest_key: ctx.manifest_key.clone(),
                    service_name: ctx.service_name.clone(),
                    dependency_name: name.clone(),
                });
            }
        }
        RelationDiff::OverrideCreate(ctx, name, values)
        | RelationDiff::OverrideUpdate(ctx, name, values) => {
            plan.relations.push(RelationAction::UpsertOverride {
                service_id: ctx.service_id,
                manifest_key: ctx.manifest_key.clone(),
                service_name: ctx.service_name.clone(),
                dependency_name: name.clone(),
                values: values.clone(),
                created: matches!(relation, RelationDiff::OverrideCreate(..)),
            });
        }
        RelationDiff::OverrideRemovalCandidate(ctx, name) => {
            if policy.on_override_removal == RelationRemovalPolicy::Remove {
                plan.relations.push(RelationAction::RemoveOverride {
                    service_id: ctx.service_id,
                    manifest_key: ctx.manifest_key.clone(),
                    service_name: ctx.service_name.clone(),
                    dependency_name: name.clone(),
                });
            }
        }
        RelationDiff::AssociationCreate(ctx, key) => {
            plan.relations.push(RelationAction::AddAssociation {
                service_id: ctx.service_id,
                manifest_key: ctx.manifest_key.clone(),
                service_name: ctx.service_name.clone(),
                key: key.clone(),
            });
        }
        RelationDiff::AssociationRemovalCandidate(ctx, key) => {
            if policy.on_association_removal == RelationRemovalPolicy::Remove {
                plan.relations.push(RelationAction::RemoveAssociation {
                    service_id: ctx.service_id,
                    manifest_key: ctx.manifest_key.clone(),
                    service_name: ctx.service_name.clone(),
                    key: key.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::drift::{DriftFlag, DriftStatus};
    use vigil_core::record::TeamManifestConfig;
    use vigil_core::TeamId;

    use crate::diff::FieldChange;

    fn snapshot_with_policy(policy: ManifestSyncPolicy) -> TeamSnapshot {
        let mut config = TeamManifestConfig::new(TeamId::generate(), "https://t/manifest.json");
        config.policy = policy;
        TeamSnapshot {
            config,
            services: Vec::new(),
            aliases: Vec::new(),
            overrides: Vec::new(),
            associations: Vec::new(),
            open_drift_flags: Vec::new(),
        }
    }

    fn conflict_diff(service_id: ServiceId) -> TeamDiff {
        TeamDiff {
            services: vec![ServiceDiff::Updated {
                service_id,
                manifest_key: "svc-a".into(),
                service_name: "A".into(),
                changes: vec![FieldChange {
                    field: ServiceField::Name,
                    manifest_value: Some("Manifest name".into()),
                    current_value: Some("Local name".into()),
                    conflict: true,
                }],
            }],
            relations: Vec::new(),
        }
    }

    #[test]
    fn conflict_under_flag_policy_withholds_the_write() {
        let snapshot = snapshot_with_policy(ManifestSyncPolicy::default());
        let plan = resolve_team(&conflict_diff(ServiceId::generate()), &snapshot);

        assert!(plan.updates.is_empty());
        assert_eq!(plan.drift.len(), 1);
        assert_eq!(plan.drift[0].manifest_value.as_deref(), Some("Manifest name"));
        // Represented by its drift entry, not double-counted as unchanged.
        assert!(plan.unchanged.is_empty());
    }

    #[test]
    fn conflict_under_manifest_wins_writes() {
        let snapshot = snapshot_with_policy(ManifestSyncPolicy::manifest_authoritative());
        let plan = resolve_team(&conflict_diff(ServiceId::generate()), &snapshot);

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].writes[0].value.as_deref(), Some("Manifest name"));
        assert!(plan.drift.is_empty());
    }

    #[test]
    fn conflict_under_local_wins_is_noted_but_never_flagged() {
        let mut policy = ManifestSyncPolicy::default();
        policy.on_field_drift = FieldDriftPolicy::LocalWins;
        let snapshot = snapshot_with_policy(policy);
        let plan = resolve_team(&conflict_diff(ServiceId::generate()), &snapshot);

        assert!(plan.updates.is_empty());
        assert!(plan.drift.is_empty());
        assert_eq!(plan.drift_notes.len(), 1);
        assert_eq!(plan.drift_notes[0].current_value.as_deref(), Some("Local name"));
    }

    #[test]
    fn accepted_flag_forces_the_manifest_side_once() {
        let service_id = ServiceId::generate();
        let mut snapshot = snapshot_with_policy(ManifestSyncPolicy::default());
        let mut flag = DriftFlag::new(
            snapshot.config.team_id,
            DriftKey::field_change(service_id, ServiceField::Name),
            Some("Manifest name".into()),
            Some("Local name".into()),
            None,
        );
        flag.status = DriftStatus::Accepted;
        let flag_id = flag.id;
        snapshot.open_drift_flags.push(flag);

        let plan = resolve_team(&conflict_diff(service_id), &snapshot);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].consumed_flags, vec![flag_id]);
        assert!(plan.drift.is_empty());
    }

    #[test]
    fn accepted_removal_flag_deactivates_under_any_policy() {
        let service_id = ServiceId::generate();
        let mut snapshot = snapshot_with_policy(ManifestSyncPolicy::default());
        let mut flag = DriftFlag::new(
            snapshot.config.team_id,
            DriftKey::service_removal(service_id),
            None,
            Some("A".into()),
            None,
        );
        flag.status = DriftStatus::Accepted;
        snapshot.open_drift_flags.push(flag);

        let diff = TeamDiff {
            services: vec![ServiceDiff::RemovalCandidate {
                service_id,
                manifest_key: "svc-a".into(),
                service_name: "A".into(),
                is_active: true,
                alias_names: Vec::new(),
                override_names: Vec::new(),
                association_keys: Vec::new(),
            }],
            relations: Vec::new(),
        };
        let plan = resolve_team(&diff, &snapshot);
        assert!(matches!(
            &plan.removals[0],
            RemovalAction::Deactivate { consumed_flag: Some(_), .. }
        ));
    }

    #[test]
    fn already_inactive_candidate_under_deactivate_policy_is_a_no_op() {
        let mut policy = ManifestSyncPolicy::default();
        policy.on_removal = RemovalPolicy::Deactivate;
        let snapshot = snapshot_with_policy(policy);

        let diff = TeamDiff {
            services: vec![ServiceDiff::RemovalCandidate {
                service_id: ServiceId::generate(),
                manifest_key: "svc-a".into(),
                service_name: "A".into(),
                is_active: false,
                alias_names: Vec::new(),
                override_names: Vec::new(),
                association_keys: Vec::new(),
            }],
            relations: Vec::new(),
        };
        let plan = resolve_team(&diff, &snapshot);
        assert!(plan.removals.is_empty());
        assert!(plan.drift.is_empty());
    }

    #[test]
    fn delete_cascade_honors_relation_keep_policies() {
        let mut policy = ManifestSyncPolicy::default();
        policy.on_removal = RemovalPolicy::Delete;
        policy.on_alias_removal = RelationRemovalPolicy::Remove;
        policy.on_override_removal = RelationRemovalPolicy::Keep;
        let snapshot = snapshot_with_policy(policy);

        let diff = TeamDiff {
            services: vec![ServiceDiff::RemovalCandidate {
                service_id: ServiceId::generate(),
                manifest_key: "svc-a".into(),
                service_name: "A".into(),
                is_active: true,
                alias_names: vec!["postgres".into()],
                override_names: vec!["postgres".into()],
                association_keys: Vec::new(),
            }],
            relations: Vec::new(),
        };
        let plan = resolve_team(&diff, &snapshot);
        let RemovalAction::Delete {
            alias_names,
            override_names,
            ..
        } = &plan.removals[0]
        else {
            panic!("expected delete");
        };
        assert_eq!(alias_names, &["postgres".to_string()]);
        assert!(override_names.is_empty());
    }

    #[test]
    fn kept_relation_removal_candidates_produce_no_action() {
        let snapshot = snapshot_with_policy(ManifestSyncPolicy::default());
        let diff = TeamDiff {
            services: Vec::new(),
            relations: vec![RelationDiff::AliasRemovalCandidate(
                crate::diff::RelationContext {
                    service_id: ServiceId::generate(),
                    manifest_key: "svc-a".into(),
                    service_name: "A".into(),
                },
                "postgres".into(),
            )],
        };
        let plan = resolve_team(&diff, &snapshot);
        assert!(plan.relations.is_empty());
    }
}
