//! Error types and result aliases for the vigil domain model.
//!
//! This module defines the shared error types used across vigil components.
//! Errors are structured for programmatic handling and include context for
//! debugging.

use crate::drift::DriftStatus;

/// The result type used throughout vigil-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in domain-model operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The requested resource was not found.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An invalid drift-flag status transition was attempted.
    #[error("invalid drift status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// The current status.
        from: DriftStatus,
        /// The attempted target status.
        to: DriftStatus,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new resource not found error.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl std::fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn storage_error_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::storage_with_source("write failed", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("write failed"));
    }

    #[test]
    fn not_found_formats_resource_and_id() {
        let err = Error::resource_not_found("service", "01J");
        assert_eq!(err.to_string(), "not found: service with id 01J");
    }
}
