//! Error types for session engine operations.

use thiserror::Error;

/// Result type alias for session engine operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur during session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session record does not exist in the KV store.
    #[error("session {session_id} not found")]
    NotFound {
        /// The session that was looked up.
        session_id: String,
    },

    /// Create was called on a record that is not the empty sentinel.
    #[error("session {session_id} is already populated, delete and reinitialize first")]
    AlreadyPopulated {
        /// The session that was targeted.
        session_id: String,
    },

    /// The session has a record but has not reached Running or Stopped yet.
    #[error("session {session_id} is still initializing")]
    StillInitializing {
        /// The session that was targeted.
        session_id: String,
    },

    /// A component declared a type outside the supported set.
    #[error("unsupported component type {kind:?}")]
    UnsupportedComponent {
        /// The declared type tag.
        kind: String,
    },

    /// The requested component is not part of the session's pod.
    #[error("component {component_id} not found in session {session_id}")]
    ComponentNotFound {
        /// The session that was inspected.
        session_id: String,
        /// The component that was looked up.
        component_id: String,
    },

    /// No pods have materialized for the session yet.
    #[error("no pods found for session {session_id}")]
    NoPods {
        /// The session that was inspected.
        session_id: String,
    },

    /// More than one pod matched the session label; multi-pod sessions are
    /// unsupported.
    #[error("session {session_id} has {count} pods, expected exactly one")]
    AmbiguousPods {
        /// The session that was inspected.
        session_id: String,
        /// Number of pods observed.
        count: usize,
    },

    /// An infrastructure (KV or cluster) error.
    #[error(transparent)]
    Core(#[from] autodev_core::Error),
}
