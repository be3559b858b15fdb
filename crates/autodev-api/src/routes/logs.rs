//! Component log streaming over server-sent events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::routes::{release_lock, session_object_name};
use crate::server::AppState;

/// Stream one component's container logs as `logs` events.
///
/// The lock is held only while the stream is opened; the follow stream
/// itself is pass-through and closed by the client disconnecting.
#[utoipa::path(
    get,
    path = "/logs/{session_id}/{component_id}",
    tag = "sessions",
    params(
        ("session_id" = String, Path, description = "Session name"),
        ("component_id" = String, Path, description = "Component ID"),
    ),
    responses(
        (status = 200, description = "SSE stream of `logs` events"),
        (status = 404, description = "Component not found", body = crate::error::ApiErrorBody),
        (status = 500, description = "Internal error", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn component_logs(
    State(state): State<Arc<AppState>>,
    Path((session_name, component_id)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_name = session_name.replace('/', "");
    let component_id = component_id.replace('/', "");
    let session_id = session_object_name(&session_name);

    let guard = state.locks.acquire(&session_id).await.map_err(ApiError::from)?;
    let result = state.engine.logs(&session_id, &component_id).await;
    release_lock(guard).await;
    let reader = result.map_err(ApiError::from)?;

    let stream = ReaderStream::new(reader).filter_map(|chunk| async move {
        match chunk {
            Ok(bytes) if !bytes.is_empty() => Some(Ok(Event::default()
                .event("logs")
                .data(String::from_utf8_lossy(&bytes).into_owned()))),
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
