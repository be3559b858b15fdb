//! Error types and result aliases for autodev.
//!
//! This module defines the shared error taxonomy used across all autodev
//! components. Variants map onto the recovery classes the engine cares about:
//! contention (retried by the lock manager), preconditions (user errors),
//! not-found, and transport failures.

use std::fmt;

/// The result type used throughout autodev.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in autodev operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested key or cluster object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object being created already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A lock is held by another holder.
    #[error("lock contention on {name}: {message}")]
    Contention {
        /// The lock name that was contended.
        name: String,
        /// Description of the contention outcome.
        message: String,
    },

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A KV or cluster call failed in transit.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::Serialization {
            message: message.to_string(),
        }
    }

    /// Returns true when this error means "the thing does not exist".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
