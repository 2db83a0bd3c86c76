//! Run orchestration: fetch, validate, diff, resolve, apply, record.
//!
//! The orchestrator owns the full run pipeline and the two properties the
//! pipeline must hold end to end: fail-closed (a fetch or validation failure
//! mutates nothing and still leaves an audit row) and single-flight (at most
//! one in-flight run per team, with concurrent requests rejected rather than
//! queued).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::future;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vigil_core::sync::{
    ManifestSyncResult, SyncHistoryEntry, SyncStatus, TriggerType,
};
use vigil_core::{SyncHistoryId, TeamId};

use crate::diff::diff_team;
use crate::error::{Error, Result};
use crate::fetch::ManifestFetcher;
use crate::metrics;
use crate::reconcile::Reconciler;
use crate::resolve::resolve_team;
use crate::store::SyncStore;
use crate::validate::{validate_manifest, ManifestValidationResult};

/// Outcome of testing a manifest URL from the configuration UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTestOutcome {
    /// Whether the URL answered with a parseable JSON body.
    pub fetch_success: bool,

    /// The fetch failure, when unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,

    /// The validation report, when fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ManifestValidationResult>,
}

/// In-process registry of teams with an in-flight run.
///
/// Purely in-process: the engine assumes a single writer process, so no
/// storage-backed lease is involved. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    teams: Arc<Mutex<HashSet<TeamId>>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to claim the team. Returns `None` when a run is already in
    /// flight; the returned guard releases the claim on drop.
    #[must_use]
    pub fn try_acquire(&self, team_id: TeamId) -> Option<InFlightGuard> {
        let mut teams = match self.teams.lock() {
            Ok(teams) => teams,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !teams.insert(team_id) {
            return None;
        }
        Some(InFlightGuard {
            registry: self.clone(),
            team_id,
        })
    }

    /// Returns true if the team currently has an in-flight run.
    #[must_use]
    pub fn is_in_flight(&self, team_id: TeamId) -> bool {
        match self.teams.lock() {
            Ok(teams) => teams.contains(&team_id),
            Err(poisoned) => poisoned.into_inner().contains(&team_id),
        }
    }

    fn release(&self, team_id: TeamId) {
        let mut teams = match self.teams.lock() {
            Ok(teams) => teams,
            Err(poisoned) => poisoned.into_inner(),
        };
        teams.remove(&team_id);
    }
}

/// RAII claim on a team's sync slot. Releases on drop, so every exit path
/// out of a run (including panics unwinding through it) frees the slot.
pub struct InFlightGuard {
    registry: InFlightRegistry,
    team_id: TeamId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(self.team_id);
    }
}

/// Orchestrates manifest sync runs for all teams.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    fetcher: Arc<dyn ManifestFetcher>,
    reconciler: Reconciler,
    in_flight: InFlightRegistry,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over the given store and fetcher.
    pub fn new(store: Arc<dyn SyncStore>, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        let reconciler = Reconciler::new(store.clone());
        Self {
            store,
            fetcher,
            reconciler,
            in_flight: InFlightRegistry::new(),
        }
    }

    /// Runs one sync for a team.
    ///
    /// A manual trigger is honored even when the team's scheduled syncs are
    /// disabled; disablement only opts the team out of [`Self::sync_all`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TeamNotFound`] for an unconfigured team and
    /// [`Error::SyncInProgress`] when a run is already in flight. Fetch and
    /// validation failures are not errors: they produce a `failed` result
    /// with an audit row and zero mutations.
    pub async fn sync_team(
        &self,
        team_id: TeamId,
        trigger: TriggerType,
        triggered_by: Option<String>,
    ) -> Result<ManifestSyncResult> {
        let config = self
            .store
            .get_team_config(team_id)
            .await?
            .ok_or(Error::TeamNotFound { team_id })?;

        let Some(_guard) = self.in_flight.try_acquire(team_id) else {
            metrics::record_rejected();
            return Err(Error::SyncInProgress { team_id });
        };

        let started = Instant::now();
        let history_id = SyncHistoryId::generate();
        info!(%team_id, %trigger, url = %config.manifest_url, "sync run starting");

        let document = match self.fetcher.fetch(&config.manifest_url).await {
            Ok(document) => document,
            Err(failure) => {
                warn!(%team_id, error = %failure, "manifest fetch failed");
                let result =
                    ManifestSyncResult::failed(team_id, vec![failure.to_string()], Vec::new());
                return self
                    .finish_run(
                        &config.manifest_url,
                        history_id,
                        trigger,
                        triggered_by,
                        result,
                        started,
                    )
                    .await;
            }
        };

        let validated = validate_manifest(&document);
        let warnings = validated.report.warning_messages();
        if !validated.report.valid {
            warn!(
                %team_id,
                errors = validated.report.error_messages().len(),
                "manifest validation failed"
            );
            let result = ManifestSyncResult::failed(
                team_id,
                validated.report.error_messages(),
                warnings,
            );
            return self
                .finish_run(
                    &config.manifest_url,
                    history_id,
                    trigger,
                    triggered_by,
                    result,
                    started,
                )
                .await;
        }

        let snapshot = self
            .store
            .load_snapshot(team_id)
            .await?
            .ok_or(Error::TeamNotFound { team_id })?;

        let diff = diff_team(&validated.entries, &snapshot);
        let plan = resolve_team(&diff, &snapshot);
        let outcome = self.reconciler.apply_plan(&snapshot, &plan, history_id).await;

        let status = if outcome.errors.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        let result = ManifestSyncResult {
            team_id,
            status,
            summary: outcome.summary,
            errors: outcome.errors,
            warnings,
            changes: outcome.changes,
        };
        self.finish_run(
            &config.manifest_url,
            history_id,
            trigger,
            triggered_by,
            result,
            started,
        )
        .await
    }

    /// Runs scheduled syncs for every enabled team, one independent run per
    /// team, in parallel.
    ///
    /// Per-team isolation: one team's failure never aborts another team's
    /// run. Teams with a run already in flight are skipped.
    pub async fn sync_all(&self, trigger: TriggerType) -> Result<Vec<ManifestSyncResult>> {
        let configs = self.store.list_team_configs().await?;
        let runs = configs
            .into_iter()
            .filter(|config| config.is_enabled && !config.manifest_url.is_empty())
            .map(|config| {
                let orchestrator = self.clone();
                async move {
                    let outcome = orchestrator.sync_team(config.team_id, trigger, None).await;
                    (config.team_id, outcome)
                }
            });

        let mut results = Vec::new();
        for (team_id, outcome) in future::join_all(runs).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(Error::SyncInProgress { .. }) => {
                    warn!(%team_id, "skipping team with in-flight run");
                }
                Err(err) => {
                    warn!(%team_id, error = %err, "team sync errored");
                    results.push(ManifestSyncResult::failed(
                        team_id,
                        vec![err.to_string()],
                        Vec::new(),
                    ));
                }
            }
        }
        Ok(results)
    }

    /// Validates a raw document without fetching or touching any team state.
    #[must_use]
    pub fn validate_only(document: &serde_json::Value) -> ManifestValidationResult {
        validate_manifest(document).report
    }

    /// Fetches and validates a URL without touching any team state.
    ///
    /// Backs the configuration UI's connection test. An unreachable URL is
    /// reported in the outcome, not returned as an error.
    pub async fn test_url(&self, url: &str) -> UrlTestOutcome {
        match self.fetcher.fetch(url).await {
            Ok(document) => UrlTestOutcome {
                fetch_success: true,
                fetch_error: None,
                validation: Some(validate_manifest(&document).report),
            },
            Err(failure) => UrlTestOutcome {
                fetch_success: false,
                fetch_error: Some(failure.to_string()),
                validation: None,
            },
        }
    }

    /// Writes the run's audit row, updates the team's last-sync bookkeeping,
    /// and records metrics. Always called exactly once per started run.
    async fn finish_run(
        &self,
        manifest_url: &str,
        history_id: SyncHistoryId,
        trigger: TriggerType,
        triggered_by: Option<String>,
        mut result: ManifestSyncResult,
        started: Instant,
    ) -> Result<ManifestSyncResult> {
        let duration = started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let now = Utc::now();

        let entry = SyncHistoryEntry {
            id: history_id,
            team_id: result.team_id,
            trigger_type: trigger,
            triggered_by,
            manifest_url: manifest_url.to_string(),
            status: result.status,
            summary: result.summary,
            errors: result.errors.clone(),
            warnings: result.warnings.clone(),
            changes: result.changes.clone(),
            duration_ms,
            created_at: now,
        };
        if let Err(err) = self.store.append_history(&entry).await {
            warn!(team_id = %result.team_id, error = %err, "failed to write sync history");
            result.errors.push(format!("record history: {err}"));
            if result.status == SyncStatus::Success {
                result.status = SyncStatus::Partial;
            }
        }

        match self.store.get_team_config(result.team_id).await {
            Ok(Some(mut config)) => {
                config.last_sync_at = Some(now);
                config.last_sync_status = Some(result.status);
                config.last_sync_error = result.errors.first().cloned();
                config.last_sync_summary = Some(result.summary);
                if let Err(err) = self.store.put_team_config(&config).await {
                    warn!(team_id = %result.team_id, error = %err, "failed to update sync bookkeeping");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(team_id = %result.team_id, error = %err, "failed to reload team config");
            }
        }

        metrics::record_run(
            result.status,
            trigger,
            &result.summary,
            result.errors.len(),
            duration.as_secs_f64(),
        );
        info!(
            team_id = %result.team_id,
            status = %result.status,
            duration_ms,
            errors = result.errors.len(),
            "sync run finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let registry = InFlightRegistry::new();
        let team_id = TeamId::generate();

        let guard = registry.try_acquire(team_id).expect("first claim");
        assert!(registry.is_in_flight(team_id));
        assert!(registry.try_acquire(team_id).is_none());

        drop(guard);
        assert!(!registry.is_in_flight(team_id));
        assert!(registry.try_acquire(team_id).is_some());
    }

    #[test]
    fn distinct_teams_do_not_contend() {
        let registry = InFlightRegistry::new();
        let _a = registry.try_acquire(TeamId::generate()).expect("claim a");
        let _b = registry.try_acquire(TeamId::generate()).expect("claim b");
    }
}
