//! Session lifecycle routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use autodev_engine::{Component, ComponentState, SessionInfo};

use crate::error::{ApiError, ApiResult};
use crate::routes::{release_lock, session_object_name, INGRESS_LOCK};
use crate::server::AppState;

/// Request body for populating a session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Components the session should run.
    #[schema(value_type = Vec<Object>)]
    pub components: Vec<Component>,
}

/// Message-only response.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: String,
}

/// Response carrying the per-container runtime states.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusesResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Runtime state per container name.
    #[schema(value_type = Object)]
    pub result: BTreeMap<String, ComponentState>,
}

/// Response carrying the reconciled session record.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    /// Human-readable outcome.
    pub message: String,
    /// The session record, or null when the stale record was purged.
    #[schema(value_type = Object, nullable)]
    pub result: Option<SessionInfo>,
}

/// Initialize a session: record plus per-session claim.
#[utoipa::path(
    post,
    path = "/init/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    responses(
        (status = 201, description = "Session initialized", body = MessageResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn init_session(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);

    let guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let result = state.engine.init(&session_id).await;
    release_lock(guard).await;
    result.map_err(ApiError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("session {session_name} created successfully"),
        }),
    ))
}

/// Populate a session with its declared components.
#[utoipa::path(
    post,
    path = "/create/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Components created", body = MessageResponse),
        (status = 400, description = "Bad request body", body = ApiErrorBody),
        (status = 404, description = "Session not found", body = ApiErrorBody),
        (status = 409, description = "Session already populated", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn create_session(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.to_string()))?;

    let session_guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let ingress_guard = match state.locks.acquire(INGRESS_LOCK).await {
        Ok(guard) => guard,
        Err(e) => {
            release_lock(session_guard).await;
            return Err(ApiError::from(e));
        }
    };

    let result = state.engine.create(&session_id, body.components).await;

    release_lock(ingress_guard).await;
    release_lock(session_guard).await;
    result.map_err(ApiError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("components for session {session_name} have been created successfully"),
        }),
    ))
}

/// Fetch the per-container runtime states of a session's pod.
#[utoipa::path(
    get,
    path = "/statuses/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    responses(
        (status = 200, description = "Container statuses", body = StatusesResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn session_statuses(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);

    let guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let result = state.engine.container_statuses(&session_id).await;
    release_lock(guard).await;
    let statuses = result.map_err(ApiError::from)?;

    Ok(Json(StatusesResponse {
        message: format!("session {session_name} container statuses fetched successfully"),
        result: statuses,
    }))
}

/// Reconcile stored session state with the cluster.
#[utoipa::path(
    post,
    path = "/refresh/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    responses(
        (status = 200, description = "Session refreshed", body = RefreshResponse),
        (status = 404, description = "Session not found", body = ApiErrorBody),
        (status = 409, description = "Session still initializing", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn refresh_session(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);

    let guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let result = state.engine.refresh(&session_id).await;
    release_lock(guard).await;
    let info = result.map_err(ApiError::from)?;

    Ok(Json(RefreshResponse {
        message: format!("session {session_name} refreshed successfully"),
        result: info,
    }))
}

/// Toggle a session between Running and Stopped.
#[utoipa::path(
    patch,
    path = "/toggle/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    responses(
        (status = 200, description = "Session toggled", body = MessageResponse),
        (status = 404, description = "Session not found", body = ApiErrorBody),
        (status = 409, description = "Session still initializing", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn toggle_session(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);

    let guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let result = state.engine.toggle(&session_id).await;
    release_lock(guard).await;
    result.map_err(ApiError::from)?;

    Ok(Json(MessageResponse {
        message: format!("session {session_name} toggled successfully"),
    }))
}

/// Destroy a session and every derived cluster object.
#[utoipa::path(
    delete,
    path = "/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session name")),
    responses(
        (status = 200, description = "Session deleted", body = MessageResponse),
        (status = 404, description = "Session not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_name = session_name.replace('/', "");
    let session_id = session_object_name(&session_name);

    let session_guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let ingress_guard = match state.locks.acquire(INGRESS_LOCK).await {
        Ok(guard) => guard,
        Err(e) => {
            release_lock(session_guard).await;
            return Err(ApiError::from(e));
        }
    };

    let result = state.engine.delete(&session_id).await;

    release_lock(ingress_guard).await;
    release_lock(session_guard).await;
    result.map_err(ApiError::from)?;

    Ok(Json(MessageResponse {
        message: format!("session {session_name} deleted successfully"),
    }))
}
