//! Error types for the reconciliation engine.
//!
//! The taxonomy matches how failures propagate: fetch and validation failures
//! fail a run closed (zero local mutations), per-item apply failures degrade
//! a run to partial and are carried as data in the result rather than as an
//! error value, and a concurrent sync request is rejected at the edge before
//! orchestration starts.

use vigil_core::TeamId;

/// The result type used throughout vigil-sync.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reconciliation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A sync is already running for this team. Rejected immediately, no
    /// queuing; the in-flight run is unaffected.
    #[error("sync already in progress for team {team_id}")]
    SyncInProgress {
        /// The team with an in-flight run.
        team_id: TeamId,
    },

    /// No manifest configuration exists for this team.
    #[error("no manifest configuration for team {team_id}")]
    TeamNotFound {
        /// The team that was looked up.
        team_id: TeamId,
    },

    /// A storage operation failed outside the per-action apply path.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from the domain model.
    #[error("core error: {0}")]
    Core(#[from] vigil_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_in_progress_names_the_team() {
        let team_id = TeamId::generate();
        let err = Error::SyncInProgress { team_id };
        assert!(err.to_string().contains(&team_id.to_string()));
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = vigil_core::Error::storage("row gone").into();
        assert!(matches!(err, Error::Core(_)));
    }
}
