//! Plan application with per-action error isolation.
//!
//! The reconciler walks a [`ResolvedPlan`](crate::resolve::ResolvedPlan) in a
//! fixed order: creates, field updates, relations, drift flags, removals. A
//! failed storage write is recorded as an error string and the walk continues,
//! so one bad row degrades the run to partial instead of aborting it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use vigil_core::manifest::ManifestServiceEntry;
use vigil_core::record::{
    DependencyAlias, DependencyOverride, ServiceAssociation, ServiceRecord,
};
use vigil_core::sync::{ManifestSyncChange, ManifestSyncSummary, SyncAction};
use vigil_core::{drift::DriftKey, ServiceId, SyncHistoryId, TeamId};

use crate::drift::DriftFlagManager;
use crate::resolve::{RelationAction, RemovalAction, ResolvedPlan};
use crate::store::{SyncStore, TeamSnapshot};

/// The accumulated outcome of applying one plan.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Aggregated counters.
    pub summary: ManifestSyncSummary,
    /// Per-item outcomes, in apply order.
    pub changes: Vec<ManifestSyncChange>,
    /// Per-item apply errors; non-empty degrades the run to partial.
    pub errors: Vec<String>,
}

impl ApplyOutcome {
    fn record_change(&mut self, change: ManifestSyncChange) {
        self.summary.record(change.action);
        self.changes.push(change);
    }

    fn record_error(&mut self, context: &str, err: impl std::fmt::Display) {
        warn!(context, error = %err, "sync action failed");
        self.errors.push(format!("{context}: {err}"));
    }
}

/// Applies resolved plans against a [`SyncStore`].
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn SyncStore>,
    drift: DriftFlagManager,
}

impl Reconciler {
    /// Creates a reconciler over the given store.
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        let drift = DriftFlagManager::new(store.clone());
        Self { store, drift }
    }

    /// Applies a plan, returning counters, per-item changes, and errors.
    ///
    /// `sync_history_id` is the ID of the history row the caller will write
    /// after this returns; flags raised here reference it.
    pub async fn apply_plan(
        &self,
        snapshot: &TeamSnapshot,
        plan: &ResolvedPlan,
        sync_history_id: SyncHistoryId,
    ) -> ApplyOutcome {
        let team_id = snapshot.config.team_id;
        let mut outcome = ApplyOutcome::default();

        for entry in &plan.creates {
            self.apply_create(team_id, entry, &mut outcome).await;
        }

        self.apply_updates(snapshot, plan, &mut outcome).await;

        for action in &plan.relations {
            self.apply_relation(action, &mut outcome).await;
        }

        self.apply_drift(team_id, plan, sync_history_id, &mut outcome)
            .await;

        for removal in &plan.removals {
            self.apply_removal(team_id, removal, &mut outcome).await;
        }

        for unchanged in &plan.unchanged {
            outcome.record_change(ManifestSyncChange::new(
                &unchanged.manifest_key,
                &unchanged.service_name,
                SyncAction::Unchanged,
            ));
        }

        outcome
    }

    async fn apply_create(
        &self,
        team_id: TeamId,
        entry: &ManifestServiceEntry,
        outcome: &mut ApplyOutcome,
    ) {
        let record = ServiceRecord::from_manifest_entry(team_id, entry);
        let service_id = record.id;
        if let Err(err) = self.store.insert_service(&record).await {
            outcome.record_error(&format!("create service {}", entry.manifest_key), err);
            return;
        }
        outcome.record_change(ManifestSyncChange::new(
            &entry.manifest_key,
            &entry.name,
            SyncAction::Created,
        ));

        // A new service brings its manifest relations with it.
        let now = Utc::now();
        for dep in &entry.dependencies {
            if let Some(alias) = &dep.alias {
                let row = DependencyAlias {
                    service_id,
                    dependency_name: dep.name.clone(),
                    alias: alias.clone(),
                    updated_at: now,
                };
                match self.store.upsert_alias(&row).await {
                    Ok(()) => outcome.record_change(ManifestSyncChange::new(
                        &entry.manifest_key,
                        &entry.name,
                        SyncAction::AliasCreated,
                    )),
                    Err(err) => outcome.record_error(
                        &format!("create alias {}/{}", entry.manifest_key, dep.name),
                        err,
                    ),
                }
            }
            if dep.has_override() {
                let row = DependencyOverride {
                    service_id,
                    dependency_name: dep.name.clone(),
                    contact: dep.contact_override.clone(),
                    impact: dep.impact_override.clone(),
                    updated_at: now,
                };
                match self.store.upsert_override(&row).await {
                    Ok(()) => outcome.record_change(ManifestSyncChange::new(
                        &entry.manifest_key,
                        &entry.name,
                        SyncAction::OverrideCreated,
                    )),
                    Err(err) => outcome.record_error(
                        &format!("create override {}/{}", entry.manifest_key, dep.name),
                        err,
                    ),
                }
            }
        }
        for assoc in entry.associations() {
            let row = ServiceAssociation {
                service_id,
                key: vigil_core::record::AssociationKey {
                    dependency_name: assoc.dependency_name.clone(),
                    linked_service_key: assoc.linked_service_key.clone(),
                    association_type: assoc.association_type.clone(),
                },
                created_at: now,
            };
            match self.store.insert_association(&row).await {
                Ok(()) => outcome.record_change(ManifestSyncChange::new(
                    &entry.manifest_key,
                    &entry.name,
                    SyncAction::AssociationCreated,
                )),
                Err(err) => outcome.record_error(
                    &format!(
                        "create association {}/{}",
                        entry.manifest_key, assoc.dependency_name
                    ),
                    err,
                ),
            }
        }
    }

    async fn apply_updates(
        &self,
        snapshot: &TeamSnapshot,
        plan: &ResolvedPlan,
        outcome: &mut ApplyOutcome,
    ) {
        let team_id = snapshot.config.team_id;
        for update in &plan.updates {
            let Some(base) = snapshot
                .services
                .iter()
                .find(|s| s.id == update.service_id)
            else {
                outcome.record_error(
                    &format!("update service {}", update.manifest_key),
                    "service missing from snapshot",
                );
                continue;
            };

            let mut record = base.clone();
            for write in &update.writes {
                record.apply_sync_write(write.field, write.value.clone());
            }
            match self.store.update_service(&record).await {
                Ok(()) => {
                    let mut change = ManifestSyncChange::new(
                        &update.manifest_key,
                        &update.service_name,
                        SyncAction::Updated,
                    );
                    change.fields_changed =
                        Some(update.writes.iter().map(|w| w.field).collect());
                    outcome.record_change(change);

                    // Writing the manifest value removes the disagreement any
                    // open flag was tracking.
                    for write in &update.writes {
                        let key = DriftKey::field_change(update.service_id, write.field);
                        match self.drift.resolve_if_present(team_id, &key).await {
                            Ok(true) => outcome.summary.drift_flags_resolved += 1,
                            Ok(false) => {}
                            Err(err) => outcome.record_error(
                                &format!("resolve drift flag {}", update.manifest_key),
                                err,
                            ),
                        }
                    }
                }
                Err(err) => {
                    outcome
                        .record_error(&format!("update service {}", update.manifest_key), err);
                    continue;
                }
            }

            for &flag_id in &update.consumed_flags {
                match self.drift.resolve_consumed(flag_id).await {
                    Ok(()) => outcome.summary.drift_flags_resolved += 1,
                    Err(err) => {
                        outcome.record_error(&format!("consume accepted flag {flag_id}"), err);
                    }
                }
            }
        }
    }

    async fn apply_relation(&self, action: &RelationAction, outcome: &mut ApplyOutcome) {
        match action {
            RelationAction::UpsertAlias {
                service_id,
                manifest_key,
                service_name,
                dependency_name,
                alias,
                created,
            } => {
                let row = DependencyAlias {
                    service_id: *service_id,
                    dependency_name: dependency_name.clone(),
                    alias: alias.clone(),
                    updated_at: Utc::now(),
                };
                match self.store.upsert_alias(&row).await {
                    Ok(()) => outcome.record_change(ManifestSyncChange::new(
                        manifest_key,
                        service_name,
                        if *created {
                            SyncAction::AliasCreated
                        } else {
                            SyncAction::AliasUpdated
                        },
                    )),
                    Err(err) => outcome.record_error(
                        &format!("upsert alias {manifest_key}/{dependency_name}"),
                        err,
                    ),
                }
            }
            RelationAction::RemoveAlias {
                service_id,
                manifest_key,
                service_name,
                dependency_name,
            } => match self.store.remove_alias(*service_id, dependency_name).await {
                Ok(()) => outcome.record_change(ManifestSyncChange::new(
                    manifest_key,
                    service_name,
                    SyncAction::AliasRemoved,
                )),
                Err(err) => outcome.record_error(
                    &format!("remove alias {manifest_key}/{dependency_name}"),
                    err,
                ),
            },
            RelationAction::UpsertOverride {
                service_id,
                manifest_key,
                service_name,
                dependency_name,
                values,
                created,
            } => {
                let row = DependencyOverride {
                    service_id: *service_id,
                    dependency_name: dependency_name.clone(),
                    contact: values.contact.clone(),
                    impact: values.impact.clone(),
                    updated_at: Utc::now(),
                };
                match self.store.upsert_override(&row).await {
                    Ok(()) => outcome.record_change(ManifestSyncChange::new(
                        manifest_key,
                        service_name,
                        if *created {
                            SyncAction::OverrideCreated
                        } else {
                            SyncAction::OverrideUpdated
                        },
                    )),
                    Err(err) => outcome.record_error(
                        &format!("upsert override {manifest_key}/{dependency_name}"),
                        err,
                    ),
                }
            }
            RelationAction::RemoveOverride {
                service_id,
                manifest_key,
                service_name,
                dependency_name,
            } => match self
                .store
                .remove_override(*service_id, dependency_name)
                .await
            {
                Ok(()) => outcome.record_change(ManifestSyncChange::new(
                    manifest_key,
                    service_name,
                    SyncAction::OverrideRemoved,
                )),
                Err(err) => outcome.record_error(
                    &format!("remove override {manifest_key}/{dependency_name}"),
                    err,
                ),
            },
            RelationAction::AddAssociation {
                service_id,
                manifest_key,
                service_name,
                key,
            } => {
                let row = ServiceAssociation {
                    service_id: *service_id,
                    key: key.clone(),
                    created_at: Utc::now(),
                };
                match self.store.insert_association(&row).await {
                    Ok(()) => outcome.record_change(ManifestSyncChange::new(
                        manifest_key,
                        service_name,
                        SyncAction::AssociationCreated,
                    )),
                    Err(err) => outcome.record_error(
                        &format!("add association {manifest_key}/{}", key.dependency_name),
                        err,
                    ),
                }
            }
            RelationAction::RemoveAssociation {
                service_id,
                manifest_key,
                service_name,
                key,
            } => match self.store.remove_association(*service_id, key).await {
                Ok(()) => outcome.record_change(ManifestSyncChange::new(
                    manifest_key,
                    service_name,
                    SyncAction::AssociationRemoved,
                )),
                Err(err) => outcome.record_error(
                    &format!("remove association {manifest_key}/{}", key.dependency_name),
                    err,
                ),
            },
        }
    }

    async fn apply_drift(
        &self,
        team_id: TeamId,
        plan: &ResolvedPlan,
        sync_history_id: SyncHistoryId,
        outcome: &mut ApplyOutcome,
    ) {
        // One drift_flagged change per service, listing all withheld fields.
        let mut field_groups: BTreeMap<String, (String, Vec<vigil_core::record::ServiceField>)> =
            BTreeMap::new();

        for obs in &plan.drift {
            match self.drift.raise(team_id, obs, sync_history_id).await {
                Ok(_) => outcome.summary.drift_flags_raised += 1,
                Err(err) => {
                    outcome.record_error(&format!("raise drift flag {}", obs.manifest_key), err);
                    continue;
                }
            }
            match obs.key.field {
                Some(field) => {
                    field_groups
                        .entry(obs.manifest_key.clone())
                        .or_insert_with(|| (obs.service_name.clone(), Vec::new()))
                        .1
                        .push(field);
                }
                None => outcome.record_change(ManifestSyncChange::new(
                    &obs.manifest_key,
                    &obs.service_name,
                    SyncAction::DriftFlagged,
                )),
            }
        }

        // local_wins conflicts: visible in the change log, no flag row.
        for obs in &plan.drift_notes {
            match obs.key.field {
                Some(field) => {
                    field_groups
                        .entry(obs.manifest_key.clone())
                        .or_insert_with(|| (obs.service_name.clone(), Vec::new()))
                        .1
                        .push(field);
                }
                None => outcome.record_change(ManifestSyncChange::new(
                    &obs.manifest_key,
                    &obs.service_name,
                    SyncAction::DriftFlagged,
                )),
            }
        }

        for (manifest_key, (service_name, fields)) in field_groups {
            let mut change =
                ManifestSyncChange::new(manifest_key, service_name, SyncAction::DriftFlagged);
            change.drift_fields = Some(fields);
            outcome.record_change(change);
        }
    }

    async fn apply_removal(
        &self,
        team_id: TeamId,
        removal: &RemovalAction,
        outcome: &mut ApplyOutcome,
    ) {
        match removal {
            RemovalAction::Deactivate {
                service_id,
                manifest_key,
                service_name,
                consumed_flag,
            } => {
                match self.store.set_service_active(*service_id, false).await {
                    Ok(()) => {
                        outcome.record_change(ManifestSyncChange::new(
                            manifest_key,
                            service_name,
                            SyncAction::Deactivated,
                        ));
                        self.close_removal_flag(team_id, *service_id, manifest_key, outcome)
                            .await;
                    }
                    Err(err) => {
                        outcome.record_error(&format!("deactivate service {manifest_key}"), err);
                        return;
                    }
                }
                if let Some(flag_id) = consumed_flag {
                    match self.drift.resolve_consumed(*flag_id).await {
                        Ok(()) => outcome.summary.drift_flags_resolved += 1,
                        Err(err) => outcome
                            .record_error(&format!("consume accepted flag {flag_id}"), err),
                    }
                }
            }
            RemovalAction::Delete {
                service_id,
                manifest_key,
                service_name,
                alias_names,
                override_names,
                association_keys,
                consumed_flag,
            } => {
                // Cascade first so a mid-cascade failure never orphans
                // relation rows behind a deleted service.
                for name in alias_names {
                    match self.store.remove_alias(*service_id, name).await {
                        Ok(()) => outcome.summary.aliases.removed += 1,
                        Err(err) => outcome
                            .record_error(&format!("remove alias {manifest_key}/{name}"), err),
                    }
                }
                for name in override_names {
                    match self.store.remove_override(*service_id, name).await {
                        Ok(()) => outcome.summary.overrides.removed += 1,
                        Err(err) => outcome
                            .record_error(&format!("remove override {manifest_key}/{name}"), err),
                    }
                }
                for key in association_keys {
                    match self.store.remove_association(*service_id, key).await {
                        Ok(()) => outcome.summary.associations.removed += 1,
                        Err(err) => outcome.record_error(
                            &format!("remove association {manifest_key}/{}", key.dependency_name),
                            err,
                        ),
                    }
                }

                match self.store.delete_service(*service_id).await {
                    Ok(()) => {
                        outcome.record_change(ManifestSyncChange::new(
                            manifest_key,
                            service_name,
                            SyncAction::Deleted,
                        ));
                        self.close_removal_flag(team_id, *service_id, manifest_key, outcome)
                            .await;
                    }
                    Err(err) => {
                        outcome.record_error(&format!("delete service {manifest_key}"), err);
                    }
                }
                if let Some(flag_id) = consumed_flag {
                    match self.drift.resolve_consumed(*flag_id).await {
                        Ok(()) => outcome.summary.drift_flags_resolved += 1,
                        Err(err) => outcome
                            .record_error(&format!("consume accepted flag {flag_id}"), err),
                    }
                }
            }
        }
    }

    /// Closes any still-pending removal flag once the removal is carried out,
    /// e.g. after the team's policy changed from `flag` to `deactivate`.
    async fn close_removal_flag(
        &self,
        team_id: TeamId,
        service_id: ServiceId,
        manifest_key: &str,
        outcome: &mut ApplyOutcome,
    ) {
        let key = DriftKey::service_removal(service_id);
        match self.drift.resolve_if_present(team_id, &key).await {
            Ok(true) => outcome.summary.drift_flags_resolved += 1,
            Ok(false) => {}
            Err(err) => {
                outcome.record_error(&format!("resolve removal flag {manifest_key}"), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::manifest::ManifestDependencyEntry;
    use vigil_core::record::TeamManifestConfig;

    use crate::diff::diff_team;
    use crate::resolve::resolve_team;
    use crate::store::InMemorySyncStore;

    fn entry(key: &str) -> ManifestServiceEntry {
        ManifestServiceEntry {
            manifest_key: key.into(),
            name: key.to_uppercase(),
            health_endpoint: format!("https://{key}/health"),
            metrics_endpoint: None,
            description: None,
            dependencies: Vec::new(),
            associations: None,
        }
    }

    async fn seeded_store() -> (Arc<InMemorySyncStore>, TeamId) {
        let store = Arc::new(InMemorySyncStore::new());
        let team_id = TeamId::generate();
        store
            .put_team_config(&TeamManifestConfig::new(team_id, "https://t/manifest.json"))
            .await
            .expect("put config");
        (store, team_id)
    }

    async fn snapshot(store: &InMemorySyncStore, team_id: TeamId) -> TeamSnapshot {
        store
            .load_snapshot(team_id)
            .await
            .expect("load")
            .expect("team exists")
    }

    #[tokio::test]
    async fn create_brings_relations_along() {
        let (store, team_id) = seeded_store().await;
        let mut e = entry("svc-a");
        e.dependencies = vec![ManifestDependencyEntry {
            name: "postgres".into(),
            alias: Some("db".into()),
            contact_override: Some("#team-data".into()),
            impact_override: None,
        }];

        let snap = snapshot(&store, team_id).await;
        let plan = resolve_team(&diff_team(&[e], &snap), &snap);
        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.summary.services.created, 1);
        assert_eq!(outcome.summary.aliases.created, 1);
        assert_eq!(outcome.summary.overrides.created, 1);
        let counts = store.team_row_counts(team_id).expect("counts");
        assert_eq!(counts.services, 1);
        assert_eq!(counts.aliases, 1);
        assert_eq!(counts.overrides, 1);
    }

    #[tokio::test]
    async fn failed_create_degrades_but_other_actions_apply() {
        let (store, team_id) = seeded_store().await;
        store.inject_failure("insert_service", "svc-bad");

        let snap = snapshot(&store, team_id).await;
        let plan = resolve_team(&diff_team(&[entry("svc-bad"), entry("svc-ok")], &snap), &snap);
        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("svc-bad"));
        assert_eq!(outcome.summary.services.created, 1);
        let counts = store.team_row_counts(team_id).expect("counts");
        assert_eq!(counts.services, 1);
    }

    #[tokio::test]
    async fn applying_a_manifest_value_resolves_the_open_flag() {
        let (store, team_id) = seeded_store().await;
        let e = entry("svc-a");

        // First run creates the record.
        let snap = snapshot(&store, team_id).await;
        let plan = resolve_team(&diff_team(&[e.clone()], &snap), &snap);
        let reconciler = Reconciler::new(store.clone());
        reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;

        // Local edit plus manifest rename: conflict, flagged under default
        // policy.
        let mut snap = snapshot(&store, team_id).await;
        let mut record = snap.services[0].clone();
        record.set_field_value(vigil_core::record::ServiceField::Name, Some("Local".into()));
        store.update_service(&record).await.expect("update");
        snap = snapshot(&store, team_id).await;

        let mut renamed = e.clone();
        renamed.name = "Manifest".into();
        let plan = resolve_team(&diff_team(&[renamed.clone()], &snap), &snap);
        let outcome = reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;
        assert_eq!(outcome.summary.drift_flags_raised, 1);

        // Policy flips to manifest_wins; the write resolves the flag.
        let mut config = snap.config.clone();
        config.policy = vigil_core::policy::ManifestSyncPolicy::manifest_authoritative();
        store.put_team_config(&config).await.expect("put config");

        let snap = snapshot(&store, team_id).await;
        let plan = resolve_team(&diff_team(&[renamed], &snap), &snap);
        let outcome = reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;
        assert_eq!(outcome.summary.services.updated, 1);
        assert_eq!(outcome.summary.drift_flags_resolved, 1);
    }

    #[tokio::test]
    async fn delete_cascades_before_the_service_row() {
        let (store, team_id) = seeded_store().await;
        let mut e = entry("svc-a");
        e.dependencies = vec![ManifestDependencyEntry {
            name: "postgres".into(),
            alias: Some("db".into()),
            contact_override: None,
            impact_override: None,
        }];

        let snap = snapshot(&store, team_id).await;
        let reconciler = Reconciler::new(store.clone());
        let plan = resolve_team(&diff_team(&[e], &snap), &snap);
        reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;

        let mut config = snapshot(&store, team_id).await.config;
        config.policy.on_removal = vigil_core::policy::RemovalPolicy::Delete;
        config.policy.on_alias_removal = vigil_core::policy::RelationRemovalPolicy::Remove;
        store.put_team_config(&config).await.expect("put config");

        let snap = snapshot(&store, team_id).await;
        let plan = resolve_team(&diff_team(&[], &snap), &snap);
        let outcome = reconciler
            .apply_plan(&snap, &plan, SyncHistoryId::generate())
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.summary.services.deleted, 1);
        assert_eq!(outcome.summary.aliases.removed, 1);
        let counts = store.team_row_counts(team_id).expect("counts");
        assert_eq!(counts.services, 0);
        assert_eq!(counts.aliases, 0);
    }
}
