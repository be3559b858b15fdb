//! OpenAPI document for the session API, served on `/openapi.json`.

use axum::Json;
use utoipa::OpenApi;

use crate::error::ApiErrorBody;
use crate::routes::{logs, sessions};

/// OpenAPI description of the session API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "autodev",
        description = "Session-oriented development-environment orchestrator"
    ),
    paths(
        crate::server::healthcheck,
        sessions::init_session,
        sessions::create_session,
        sessions::session_statuses,
        sessions::refresh_session,
        sessions::toggle_session,
        sessions::delete_session,
        logs::component_logs,
    ),
    components(schemas(
        ApiErrorBody,
        sessions::CreateSessionRequest,
        sessions::MessageResponse,
        sessions::StatusesResponse,
        sessions::RefreshResponse,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "sessions", description = "Session lifecycle operations"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI document.
pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
