//! Drift flag lifecycle: raising with deduplication, sync-driven resolution,
//! and the human review operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use vigil_core::drift::{DriftFlag, DriftKey, DriftStatus};
use vigil_core::{DriftFlagId, SyncHistoryId, TeamId};

use crate::error::Result;
use crate::resolve::DriftObservation;
use crate::store::{DriftFlagFilter, SyncStore};

/// Whether a detection created a new flag or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// No open flag existed for the key; a new pending flag was created.
    Raised,
    /// An open flag already covered the key; its detection time and values
    /// were refreshed.
    Refreshed,
}

/// One failed flag in a bulk operation.
#[derive(Debug, Clone)]
pub struct BulkFlagError {
    /// The flag that failed.
    pub flag_id: DriftFlagId,
    /// Why it failed.
    pub error: String,
}

/// Outcome of a bulk status transition.
#[derive(Debug, Clone, Default)]
pub struct BulkTransitionOutcome {
    /// Flags transitioned successfully.
    pub succeeded: u32,
    /// Flags that failed to transition.
    pub failed: u32,
    /// Per-flag failure reasons.
    pub errors: Vec<BulkFlagError>,
}

/// Manages drift flag rows on top of a [`SyncStore`].
///
/// One open flag exists per [`DriftKey`]: re-detection refreshes the existing
/// row instead of inserting a duplicate, so a conflict that persists across
/// fifty scheduled runs is still a single line in the review queue.
#[derive(Clone)]
pub struct DriftFlagManager {
    store: Arc<dyn SyncStore>,
}

impl DriftFlagManager {
    /// Creates a manager over the given store.
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Raises a flag for an observed drift condition, deduplicating against
    /// any open flag with the same key.
    pub async fn raise(
        &self,
        team_id: TeamId,
        observation: &DriftObservation,
        sync_history_id: SyncHistoryId,
    ) -> Result<RaiseOutcome> {
        if let Some(mut existing) = self.store.find_open_flag(team_id, &observation.key).await? {
            existing.last_detected_at = Utc::now();
            existing.manifest_value = observation.manifest_value.clone();
            existing.current_value = observation.current_value.clone();
            existing.sync_history_id = Some(sync_history_id);
            self.store.put_drift_flag(&existing).await?;
            debug!(
                flag_id = %existing.id,
                drift_type = %observation.key.drift_type,
                "refreshed open drift flag"
            );
            return Ok(RaiseOutcome::Refreshed);
        }

        let flag = DriftFlag::new(
            team_id,
            observation.key,
            observation.manifest_value.clone(),
            observation.current_value.clone(),
            Some(sync_history_id),
        );
        debug!(
            flag_id = %flag.id,
            drift_type = %observation.key.drift_type,
            "raised drift flag"
        );
        self.store.put_drift_flag(&flag).await?;
        Ok(RaiseOutcome::Raised)
    }

    /// Resolves the pending flag for a key, if one exists.
    ///
    /// Called when a sync writes the manifest value for a previously flagged
    /// condition: the disagreement no longer exists, so the flag closes
    /// without a human action. Accepted flags are not touched here; they are
    /// consumed through [`Self::resolve_consumed`] by the run that honors
    /// them.
    pub async fn resolve_if_present(&self, team_id: TeamId, key: &DriftKey) -> Result<bool> {
        let Some(mut flag) = self.store.find_open_flag(team_id, key).await? else {
            return Ok(false);
        };
        if flag.status != DriftStatus::Pending {
            return Ok(false);
        }
        flag.transition_to(DriftStatus::Resolved, None)?;
        self.store.put_drift_flag(&flag).await?;
        debug!(flag_id = %flag.id, "drift flag resolved by sync");
        Ok(true)
    }

    /// Resolves a specific flag by ID, for accepted flags consumed by a run.
    pub async fn resolve_consumed(&self, flag_id: DriftFlagId) -> Result<()> {
        let mut flag = self
            .store
            .get_drift_flag(flag_id)
            .await?
            .ok_or_else(|| vigil_core::Error::resource_not_found("drift flag", flag_id))?;
        flag.transition_to(DriftStatus::Resolved, None)?;
        self.store.put_drift_flag(&flag).await?;
        debug!(flag_id = %flag_id, "accepted drift flag consumed");
        Ok(())
    }

    /// Transitions one flag on behalf of a reviewer.
    ///
    /// # Errors
    ///
    /// Returns [`vigil_core::Error::ResourceNotFound`] for an unknown flag and
    /// [`vigil_core::Error::InvalidStatusTransition`] when the state machine
    /// rejects the move.
    pub async fn transition(
        &self,
        flag_id: DriftFlagId,
        target: DriftStatus,
        actor: Option<String>,
    ) -> Result<DriftFlag> {
        let mut flag = self
            .store
            .get_drift_flag(flag_id)
            .await?
            .ok_or_else(|| vigil_core::Error::resource_not_found("drift flag", flag_id))?;
        flag.transition_to(target, actor)?;
        self.store.put_drift_flag(&flag).await?;
        Ok(flag)
    }

    /// Dismisses a pending flag: the local value stands.
    pub async fn dismiss(&self, flag_id: DriftFlagId, actor: Option<String>) -> Result<DriftFlag> {
        self.transition(flag_id, DriftStatus::Dismissed, actor).await
    }

    /// Accepts a pending flag: the next sync applies the manifest value.
    pub async fn accept(&self, flag_id: DriftFlagId, actor: Option<String>) -> Result<DriftFlag> {
        self.transition(flag_id, DriftStatus::Accepted, actor).await
    }

    /// Manually resolves an open flag.
    pub async fn resolve(&self, flag_id: DriftFlagId, actor: Option<String>) -> Result<DriftFlag> {
        self.transition(flag_id, DriftStatus::Resolved, actor).await
    }

    /// Lists a team's flags with the given filter.
    pub async fn list(&self, team_id: TeamId, filter: &DriftFlagFilter) -> Result<Vec<DriftFlag>> {
        self.store.list_drift_flags(team_id, filter).await
    }

    /// Transitions many flags, isolating per-flag failures.
    ///
    /// A flag that is missing or in a terminal status lands in the outcome's
    /// error list; the rest still transition.
    pub async fn bulk_transition(
        &self,
        flag_ids: &[DriftFlagId],
        target: DriftStatus,
        actor: Option<String>,
    ) -> Result<BulkTransitionOutcome> {
        let mut outcome = BulkTransitionOutcome::default();
        for &flag_id in flag_ids {
            match self.transition(flag_id, target, actor.clone()).await {
                Ok(_) => outcome.succeeded += 1,
                Err(err) => {
                    outcome.failed += 1;
                    outcome.errors.push(BulkFlagError {
                        flag_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::drift::DriftType;
    use vigil_core::record::{ServiceField, TeamManifestConfig};
    use vigil_core::ServiceId;

    use crate::store::InMemorySyncStore;

    fn observation(service_id: ServiceId) -> DriftObservation {
        DriftObservation {
            key: DriftKey::field_change(service_id, ServiceField::Name),
            manifest_key: "svc-a".into(),
            service_name: "A".into(),
            manifest_value: Some("Manifest name".into()),
            current_value: Some("Local name".into()),
        }
    }

    async fn setup() -> (DriftFlagManager, Arc<InMemorySyncStore>, TeamId) {
        let store = Arc::new(InMemorySyncStore::new());
        let team_id = TeamId::generate();
        store
            .put_team_config(&TeamManifestConfig::new(team_id, "https://t/manifest.json"))
            .await
            .expect("put config");
        (DriftFlagManager::new(store.clone()), store, team_id)
    }

    #[tokio::test]
    async fn repeat_detection_refreshes_instead_of_duplicating() {
        let (manager, store, team_id) = setup().await;
        let obs = observation(ServiceId::generate());
        let run_a = SyncHistoryId::generate();
        let run_b = SyncHistoryId::generate();

        assert_eq!(
            manager.raise(team_id, &obs, run_a).await.expect("raise"),
            RaiseOutcome::Raised
        );
        assert_eq!(
            manager.raise(team_id, &obs, run_b).await.expect("raise"),
            RaiseOutcome::Refreshed
        );

        let flags = store
            .list_drift_flags(team_id, &DriftFlagFilter::default())
            .await
            .expect("list");
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].sync_history_id, Some(run_b));
        assert!(flags[0].last_detected_at >= flags[0].first_detected_at);
    }

    #[tokio::test]
    async fn sync_resolution_closes_the_open_flag() {
        let (manager, _store, team_id) = setup().await;
        let service_id = ServiceId::generate();
        let obs = observation(service_id);
        manager
            .raise(team_id, &obs, SyncHistoryId::generate())
            .await
            .expect("raise");

        let resolved = manager
            .resolve_if_present(team_id, &obs.key)
            .await
            .expect("resolve");
        assert!(resolved);

        // No open flag remains; a second call is a no-op.
        let resolved_again = manager
            .resolve_if_present(team_id, &obs.key)
            .await
            .expect("resolve");
        assert!(!resolved_again);
    }

    #[tokio::test]
    async fn dismissed_flag_cannot_be_accepted() {
        let (manager, store, team_id) = setup().await;
        manager
            .raise(
                team_id,
                &observation(ServiceId::generate()),
                SyncHistoryId::generate(),
            )
            .await
            .expect("raise");
        let flags = store
            .list_drift_flags(team_id, &DriftFlagFilter::default())
            .await
            .expect("list");
        let flag_id = flags[0].id;

        manager
            .dismiss(flag_id, Some("admin".into()))
            .await
            .expect("dismiss");
        let err = manager.accept(flag_id, None).await.unwrap_err();
        assert!(err.to_string().contains("invalid drift status transition"));
    }

    #[tokio::test]
    async fn bulk_transition_isolates_failures() {
        let (manager, store, team_id) = setup().await;
        manager
            .raise(
                team_id,
                &observation(ServiceId::generate()),
                SyncHistoryId::generate(),
            )
            .await
            .expect("raise");
        let flags = store
            .list_drift_flags(team_id, &DriftFlagFilter::default())
            .await
            .expect("list");
        let good = flags[0].id;
        let missing = DriftFlagId::generate();

        let outcome = manager
            .bulk_transition(&[good, missing], DriftStatus::Dismissed, Some("admin".into()))
            .await
            .expect("bulk");
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].flag_id, missing);
    }

    #[tokio::test]
    async fn removal_flags_dedup_on_the_removal_key() {
        let (manager, store, team_id) = setup().await;
        let service_id = ServiceId::generate();
        let obs = DriftObservation {
            key: DriftKey::service_removal(service_id),
            manifest_key: "svc-gone".into(),
            service_name: "Gone".into(),
            manifest_value: None,
            current_value: Some("Gone".into()),
        };

        manager
            .raise(team_id, &obs, SyncHistoryId::generate())
            .await
            .expect("raise");
        manager
            .raise(team_id, &obs, SyncHistoryId::generate())
            .await
            .expect("raise");

        let flags = store
            .list_drift_flags(
                team_id,
                &DriftFlagFilter {
                    drift_type: Some(DriftType::ServiceRemoval),
                    ..DriftFlagFilter::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(flags.len(), 1);
    }
}
