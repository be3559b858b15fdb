//! HTTP routes for the session API.
//!
//! Every session-mutating route acquires the per-session lock before calling
//! the engine; `create` and `delete` additionally acquire the shared ingress
//! lock (session lock first, ingress lock second) and release in reverse
//! order. The healthcheck does not lock.

pub mod logs;
pub mod sessions;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;

use autodev_core::LockGuard;

use crate::server::AppState;

/// Name of the shared lock serializing ingress read-modify-writes.
pub(crate) const INGRESS_LOCK: &str = "ingress";

/// Sanitizes a path-provided session name (stripping `/`) and prefixes it
/// with `session-` to form the object name used in the KV and the cluster.
#[must_use]
pub fn session_object_name(raw: &str) -> String {
    format!("session-{}", raw.replace('/', ""))
}

/// Releases a lock guard, logging (not propagating) release failures.
pub(crate) async fn release_lock(guard: LockGuard) {
    let name = guard.name().to_string();
    if let Err(e) = guard.release().await {
        tracing::warn!(lock = %name, error = %e, "failed to release lock");
    }
}

/// Builds the session routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/init/:session_id", post(sessions::init_session))
        .route("/create/:session_id", post(sessions::create_session))
        .route("/statuses/:session_id", get(sessions::session_statuses))
        .route("/logs/:session_id/:component_id", get(logs::component_logs))
        .route("/refresh/:session_id", post(sessions::refresh_session))
        .route("/toggle/:session_id", patch(sessions::toggle_session))
        .route("/:session_id", delete(sessions::delete_session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_object_name_strips_slashes_and_prefixes() {
        assert_eq!(session_object_name("abc"), "session-abc");
        assert_eq!(session_object_name("a/b/c"), "session-abc");
    }
}
