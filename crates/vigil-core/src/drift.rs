//! Drift flags: detected disagreements between manifest and local state.
//!
//! Drift is not an error. It is an expected, policy-governed outcome surfaced
//! as data for human review: one row per `(service, drift_type, field)`,
//! deduplicated on re-detection while pending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{DriftFlagId, ServiceId, SyncHistoryId, TeamId};
use crate::record::ServiceField;

/// What kind of disagreement a flag records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    /// Manifest and local store disagree on a mirrored field's value.
    FieldChange,
    /// The service's `manifest_key` is absent from the new manifest.
    ServiceRemoval,
}

impl std::fmt::Display for DriftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldChange => f.write_str("field_change"),
            Self::ServiceRemoval => f.write_str("service_removal"),
        }
    }
}

/// Lifecycle status of a drift flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Detected and awaiting human review.
    Pending,
    /// An admin chose to keep the local value; the flag is closed.
    Dismissed,
    /// An admin chose the manifest value; the next sync applies it one-shot.
    Accepted,
    /// A later sync applied the manifest value (or the disagreement went
    /// away); the flag is closed.
    Resolved,
}

impl DriftStatus {
    /// Returns true if the transition from self to target is valid.
    ///
    /// `pending` is the only non-terminal status apart from `accepted`, which
    /// resolves once the one-shot override is consumed.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Dismissed | Self::Accepted | Self::Resolved),
            Self::Accepted => matches!(target, Self::Resolved),
            Self::Dismissed | Self::Resolved => false,
        }
    }

    /// Returns true if this flag still represents an open disagreement.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Dismissed => f.write_str("dismissed"),
            Self::Accepted => f.write_str("accepted"),
            Self::Resolved => f.write_str("resolved"),
        }
    }
}

/// Composite identity of a drift condition.
///
/// An explicit key type, not string concatenation, so matching and
/// deduplication stay exact. `field` is `None` for `service_removal` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriftKey {
    /// The affected service.
    pub service_id: ServiceId,

    /// The kind of disagreement.
    pub drift_type: DriftType,

    /// The affected field, for `field_change` flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<ServiceField>,
}

impl DriftKey {
    /// Key for a field-level disagreement.
    #[must_use]
    pub const fn field_change(service_id: ServiceId, field: ServiceField) -> Self {
        Self {
            service_id,
            drift_type: DriftType::FieldChange,
            field: Some(field),
        }
    }

    /// Key for a service-removal disagreement.
    #[must_use]
    pub const fn service_removal(service_id: ServiceId) -> Self {
        Self {
            service_id,
            drift_type: DriftType::ServiceRemoval,
            field: None,
        }
    }
}

/// One drift flag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFlag {
    /// Row identity.
    pub id: DriftFlagId,

    /// Owning team.
    pub team_id: TeamId,

    /// Composite drift identity.
    #[serde(flatten)]
    pub key: DriftKey,

    /// The manifest side of the disagreement at detection time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_value: Option<String>,

    /// The local side of the disagreement at detection time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<String>,

    /// Lifecycle status.
    pub status: DriftStatus,

    /// When the condition was first detected.
    pub first_detected_at: DateTime<Utc>,

    /// Updated on repeat detection while pending.
    pub last_detected_at: DateTime<Utc>,

    /// When the flag left the open states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who closed the flag, for human actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,

    /// The run that raised (or last refreshed) the flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_history_id: Option<SyncHistoryId>,
}

impl DriftFlag {
    /// Creates a new pending flag for a freshly detected condition.
    #[must_use]
    pub fn new(
        team_id: TeamId,
        key: DriftKey,
        manifest_value: Option<String>,
        current_value: Option<String>,
        sync_history_id: Option<SyncHistoryId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DriftFlagId::generate(),
            team_id,
            key,
            manifest_value,
            current_value,
            status: DriftStatus::Pending,
            first_detected_at: now,
            last_detected_at: now,
            resolved_at: None,
            resolved_by: None,
            sync_history_id,
        }
    }

    /// Transitions the flag's status, validating the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatusTransition`] if the transition is not
    /// allowed from the current status.
    pub fn transition_to(&mut self, target: DriftStatus, actor: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStatusTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        if !target.is_open() {
            self.resolved_at = Some(Utc::now());
            self.resolved_by = actor;
        }
        Ok(())
    }
}
