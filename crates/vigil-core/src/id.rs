//! Strongly-typed identifiers for vigil entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: No coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use vigil_core::id::{ServiceId, TeamId};
//!
//! let team = TeamId::generate();
//! let service = ServiceId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: TeamId = service;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique ID.
            ///
            /// Uses ULID generation which is:
            /// - Lexicographically sortable by creation time
            /// - Globally unique without coordination
            /// - URL-safe and case-insensitive
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = self.0.timestamp_ms();
                chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!(concat!("invalid ", $label, " ID '{}': {}"), s, e),
                    })
            }
        }
    };
}

ulid_id!(
    /// A unique identifier for a team.
    ///
    /// Teams own a manifest URL and the services reconciled from it.
    TeamId,
    "team"
);

ulid_id!(
    /// A unique identifier for a service record.
    ///
    /// This is the internal row key; the manifest joins on
    /// [`ServiceRecord::manifest_key`](crate::record::ServiceRecord::manifest_key)
    /// instead.
    ServiceId,
    "service"
);

ulid_id!(
    /// A unique identifier for a drift flag row.
    DriftFlagId,
    "drift flag"
);

ulid_id!(
    /// A unique identifier for a sync history row.
    ///
    /// Generated at run start so drift flags raised during the run can
    /// reference the history row that will be written at the end.
    SyncHistoryId,
    "sync history"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = ServiceId::generate();
        let parsed: ServiceId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_id_is_rejected() {
        let result: Result<TeamId> = "not-a-ulid".parse();
        assert!(matches!(result, Err(Error::InvalidId { .. })));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = DriftFlagId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn generated_ids_sort_by_creation() {
        let a = SyncHistoryId::generate();
        let b = SyncHistoryId::generate();
        assert!(a <= b);
    }
}
