//! In-memory store implementation for testing.
//!
//! This module provides [`InMemorySyncStore`], a simple in-memory
//! implementation of the [`SyncStore`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use vigil_core::drift::{DriftFlag, DriftKey};
use vigil_core::record::{
    AssociationKey, DependencyAlias, DependencyOverride, ServiceAssociation, ServiceRecord,
    TeamManifestConfig,
};
use vigil_core::sync::SyncHistoryEntry;
use vigil_core::{DriftFlagId, ServiceId, TeamId};

use super::{DriftFlagFilter, SyncStore, TeamSnapshot};
use crate::error::{Error, Result};

/// Row counts per table for one team. Used by tests to assert the fail-closed
/// property: a failed fetch leaves every count untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamRowCounts {
    /// Service rows.
    pub services: usize,
    /// Alias rows.
    pub aliases: usize,
    /// Override rows.
    pub overrides: usize,
    /// Association rows.
    pub associations: usize,
}

#[derive(Debug, Default)]
struct State {
    configs: HashMap<TeamId, TeamManifestConfig>,
    services: HashMap<ServiceId, ServiceRecord>,
    aliases: HashMap<(ServiceId, String), DependencyAlias>,
    overrides: HashMap<(ServiceId, String), DependencyOverride>,
    associations: HashMap<(ServiceId, AssociationKey), ServiceAssociation>,
    flags: HashMap<DriftFlagId, DriftFlag>,
    history: Vec<SyncHistoryEntry>,
}

/// In-memory store for testing.
///
/// Thread-safe via `RwLock`; supports one-shot failure injection keyed by
/// `(operation, row key)` so tests can fail exactly one apply action and
/// assert the run degrades to partial instead of aborting.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    state: RwLock<State>,
    injected_failures: RwLock<HashSet<(String, String)>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemorySyncStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot failure for `operation` on the row identified by
    /// `key` (a service ID, manifest key, or dependency name, depending on
    /// the operation). The next matching call fails once with a storage
    /// error, then the injection is consumed.
    pub fn inject_failure(&self, operation: &str, key: &str) {
        if let Ok(mut failures) = self.injected_failures.write() {
            failures.insert((operation.to_string(), key.to_string()));
        }
    }

    /// Row counts for one team, for fail-closed assertions.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn team_row_counts(&self, team_id: TeamId) -> Result<TeamRowCounts> {
        let state = self.state.read().map_err(poison_err)?;
        let service_ids: HashSet<ServiceId> = state
            .services
            .values()
            .filter(|s| s.team_id == team_id)
            .map(|s| s.id)
            .collect();
        Ok(TeamRowCounts {
            services: service_ids.len(),
            aliases: state
                .aliases
                .keys()
                .filter(|(id, _)| service_ids.contains(id))
                .count(),
            overrides: state
                .overrides
                .keys()
                .filter(|(id, _)| service_ids.contains(id))
                .count(),
            associations: state
                .associations
                .keys()
                .filter(|(id, _)| service_ids.contains(id))
                .count(),
        })
    }

    /// Number of history rows across all teams.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn history_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.history.len())
    }

    fn take_injected(&self, operation: &str, keys: &[&str]) -> Result<()> {
        let mut failures = self.injected_failures.write().map_err(poison_err)?;
        for key in keys {
            if failures.remove(&(operation.to_string(), (*key).to_string())) {
                return Err(Error::storage(format!(
                    "injected failure: {operation} on '{key}'"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn get_team_config(&self, team_id: TeamId) -> Result<Option<TeamManifestConfig>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.configs.get(&team_id).cloned())
    }

    async fn list_team_configs(&self) -> Result<Vec<TeamManifestConfig>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut configs: Vec<_> = state.configs.values().cloned().collect();
        configs.sort_by_key(|c| c.team_id);
        Ok(configs)
    }

    async fn put_team_config(&self, config: &TeamManifestConfig) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.configs.insert(config.team_id, config.clone());
        Ok(())
    }

    async fn load_snapshot(&self, team_id: TeamId) -> Result<Option<TeamSnapshot>> {
        let state = self.state.read().map_err(poison_err)?;
        let Some(config) = state.configs.get(&team_id).cloned() else {
            return Ok(None);
        };

        let mut services: Vec<_> = state
            .services
            .values()
            .filter(|s| s.team_id == team_id)
            .cloned()
            .collect();
        services.sort_by_key(|s| s.id);
        let service_ids: HashSet<ServiceId> = services.iter().map(|s| s.id).collect();

        let mut aliases: Vec<_> = state
            .aliases
            .values()
            .filter(|a| service_ids.contains(&a.service_id))
            .cloned()
            .collect();
        aliases.sort_by(|a, b| {
            (a.service_id, &a.dependency_name).cmp(&(b.service_id, &b.dependency_name))
        });

        let mut overrides: Vec<_> = state
            .overrides
            .values()
            .filter(|o| service_ids.contains(&o.service_id))
            .cloned()
            .collect();
        overrides.sort_by(|a, b| {
            (a.service_id, &a.dependency_name).cmp(&(b.service_id, &b.dependency_name))
        });

        let mut associations: Vec<_> = state
            .associations
            .values()
            .filter(|a| service_ids.contains(&a.service_id))
            .cloned()
            .collect();
        associations.sort_by(|a, b| (a.service_id, &a.key).cmp(&(b.service_id, &b.key)));

        let mut open_drift_flags: Vec<_> = state
            .flags
            .values()
            .filter(|f| f.team_id == team_id && f.status.is_open())
            .cloned()
            .collect();
        open_drift_flags.sort_by_key(|f| f.id);

        Ok(Some(TeamSnapshot {
            config,
            services,
            aliases,
            overrides,
            associations,
            open_drift_flags,
        }))
    }

    async fn get_service(&self, service_id: ServiceId) -> Result<Option<ServiceRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.services.get(&service_id).cloned())
    }

    async fn insert_service(&self, record: &ServiceRecord) -> Result<()> {
        self.take_injected(
            "insert_service",
            &[
                &record.id.to_string(),
                record.manifest_key.as_deref().unwrap_or(""),
            ],
        )?;
        let mut state = self.state.write().map_err(poison_err)?;
        if state.services.contains_key(&record.id) {
            return Err(Error::storage(format!(
                "service {} already exists",
                record.id
            )));
        }
        state.services.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_service(&self, record: &ServiceRecord) -> Result<()> {
        self.take_injected(
            "update_service",
            &[
                &record.id.to_string(),
                record.manifest_key.as_deref().unwrap_or(""),
            ],
        )?;
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.services.contains_key(&record.id) {
            return Err(vigil_core::Error::resource_not_found("service", record.id).into());
        }
        state.services.insert(record.id, record.clone());
        Ok(())
    }

    async fn set_service_active(&self, service_id: ServiceId, is_active: bool) -> Result<()> {
        self.take_injected("set_service_active", &[&service_id.to_string()])?;
        let mut state = self.state.write().map_err(poison_err)?;
        let record = state
            .services
            .get_mut(&service_id)
            .ok_or_else(|| vigil_core::Error::resource_not_found("service", service_id))?;
        record.is_active = is_active;
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete_service(&self, service_id: ServiceId) -> Result<()> {
        self.take_injected("delete_service", &[&service_id.to_string()])?;
        let mut state = self.state.write().map_err(poison_err)?;
        if state.services.remove(&service_id).is_none() {
            return Err(vigil_core::Error::resource_not_found("service", service_id).into());
        }
        Ok(())
    }

    async fn upsert_alias(&self, alias: &DependencyAlias) -> Result<()> {
        self.take_injected("upsert_alias", &[&alias.dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .aliases
            .insert((alias.service_id, alias.dependency_name.clone()), alias.clone());
        Ok(())
    }

    async fn remove_alias(&self, service_id: ServiceId, dependency_name: &str) -> Result<()> {
        self.take_injected("remove_alias", &[dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .aliases
            .remove(&(service_id, dependency_name.to_string()));
        Ok(())
    }

    async fn upsert_override(&self, record: &DependencyOverride) -> Result<()> {
        self.take_injected("upsert_override", &[&record.dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state.overrides.insert(
            (record.service_id, record.dependency_name.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn remove_override(&self, service_id: ServiceId, dependency_name: &str) -> Result<()> {
        self.take_injected("remove_override", &[dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .overrides
            .remove(&(service_id, dependency_name.to_string()));
        Ok(())
    }

    async fn insert_association(&self, association: &ServiceAssociation) -> Result<()> {
        self.take_injected("insert_association", &[&association.key.dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state.associations.insert(
            (association.service_id, association.key.clone()),
            association.clone(),
        );
        Ok(())
    }

    async fn remove_association(&self, service_id: ServiceId, key: &AssociationKey) -> Result<()> {
        self.take_injected("remove_association", &[&key.dependency_name])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state.associations.remove(&(service_id, key.clone()));
        Ok(())
    }

    async fn get_drift_flag(&self, flag_id: DriftFlagId) -> Result<Option<DriftFlag>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.flags.get(&flag_id).cloned())
    }

    async fn find_open_flag(&self, team_id: TeamId, key: &DriftKey) -> Result<Option<DriftFlag>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .flags
            .values()
            .find(|f| f.team_id == team_id && f.key == *key && f.status.is_open())
            .cloned())
    }

    async fn put_drift_flag(&self, flag: &DriftFlag) -> Result<()> {
        self.take_injected("put_drift_flag", &[&flag.id.to_string()])?;
        let mut state = self.state.write().map_err(poison_err)?;
        state.flags.insert(flag.id, flag.clone());
        Ok(())
    }

    async fn list_drift_flags(
        &self,
        team_id: TeamId,
        filter: &DriftFlagFilter,
    ) -> Result<Vec<DriftFlag>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut flags: Vec<_> = state
            .flags
            .values()
            .filter(|f| f.team_id == team_id && filter.matches(f))
            .cloned()
            .collect();
        flags.sort_by_key(|f| f.id);
        Ok(flags)
    }

    async fn append_history(&self, entry: &SyncHistoryEntry) -> Result<()> {
        self.take_injected("append_history", &[&entry.id.to_string()])?;
        let mut state = self.state.write().map_err(poison_err)?;
        if state.history.iter().any(|h| h.id == entry.id) {
            return Err(Error::storage(format!(
                "history row {} already written; history is append-only",
                entry.id
            )));
        }
        state.history.push(entry.clone());
        Ok(())
    }

    async fn list_history(&self, team_id: TeamId, limit: usize) -> Result<Vec<SyncHistoryEntry>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut rows: Vec<_> = state
            .history
            .iter()
            .filter(|h| h.team_id == team_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::drift::{DriftKey, DriftStatus};
    use vigil_core::manifest::ManifestServiceEntry;
    use vigil_core::record::ServiceField;

    fn service(team_id: TeamId, key: &str) -> ServiceRecord {
        ServiceRecord::from_manifest_entry(
            team_id,
            &ManifestServiceEntry {
                manifest_key: key.into(),
                name: key.to_uppercase(),
                health_endpoint: format!("https://{key}/health"),
                metrics_endpoint: None,
                description: None,
                dependencies: Vec::new(),
                associations: None,
            },
        )
    }

    #[tokio::test]
    async fn snapshot_scopes_to_one_team() {
        let store = InMemorySyncStore::new();
        let team_a = TeamId::generate();
        let team_b = TeamId::generate();
        store
            .put_team_config(&TeamManifestConfig::new(team_a, "https://a/manifest.json"))
            .await
            .expect("config a");
        store
            .put_team_config(&TeamManifestConfig::new(team_b, "https://b/manifest.json"))
            .await
            .expect("config b");

        store
            .insert_service(&service(team_a, "svc-a"))
            .await
            .expect("insert a");
        store
            .insert_service(&service(team_b, "svc-b"))
            .await
            .expect("insert b");

        let snapshot = store
            .load_snapshot(team_a)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(snapshot.services.len(), 1);
        assert_eq!(snapshot.services[0].manifest_key.as_deref(), Some("svc-a"));
    }

    #[tokio::test]
    async fn snapshot_missing_team_is_none() {
        let store = InMemorySyncStore::new();
        assert!(store
            .load_snapshot(TeamId::generate())
            .await
            .expect("load")
            .is_none());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemorySyncStore::new();
        let team_id = TeamId::generate();
        let record = service(team_id, "svc-a");

        store.inject_failure("insert_service", "svc-a");
        let err = store.insert_service(&record).await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));

        // Consumed: the retry succeeds.
        store.insert_service(&record).await.expect("second insert");
    }

    #[tokio::test]
    async fn history_is_append_only() {
        let store = InMemorySyncStore::new();
        let team_id = TeamId::generate();
        let entry = SyncHistoryEntry {
            id: vigil_core::SyncHistoryId::generate(),
            team_id,
            trigger_type: vigil_core::sync::TriggerType::Manual,
            triggered_by: Some("admin".into()),
            manifest_url: "https://a/manifest.json".into(),
            status: vigil_core::sync::SyncStatus::Success,
            summary: vigil_core::sync::ManifestSyncSummary::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            changes: Vec::new(),
            duration_ms: 12,
            created_at: chrono::Utc::now(),
        };

        store.append_history(&entry).await.expect("first write");
        assert!(store.append_history(&entry).await.is_err());
        assert_eq!(store.history_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn find_open_flag_ignores_closed_flags() {
        let store = InMemorySyncStore::new();
        let team_id = TeamId::generate();
        let service_id = ServiceId::generate();
        let key = DriftKey::field_change(service_id, ServiceField::Name);

        let mut flag = DriftFlag::new(team_id, key, Some("m".into()), Some("l".into()), None);
        flag.transition_to(DriftStatus::Resolved, None).expect("resolve");
        store.put_drift_flag(&flag).await.expect("put");

        assert!(store
            .find_open_flag(team_id, &key)
            .await
            .expect("find")
            .is_none());
    }
}
