use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, put};
use axum::Router;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::Notice;

use super::error::{ApiError, ApiResult};
use super::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notices", get(list_notices))
        .route("/notices/stream", get(stream_notices))
        .route("/notices/:id/read", put(set_read))
        .route("/notices/read-all", put(mark_all_read))
}

async fn list_notices(State(state): State<AppState>) -> Json<Vec<Notice>> {
    Json(state.engine.notify.list_all().await)
}

/// Live notice stream over SSE. The first event is the `hello` handshake
/// carrying the reconnect hint; every notice published while the client is
/// connected follows as a `notification` event with a JSON body.
async fn stream_notices(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.engine.notify.clone().subscribe();
    let stream = subscription.map(|frame| {
        let mut event = Event::default()
            .event(frame.event)
            .id(frame.id)
            .data(frame.data);
        if let Some(retry) = frame.retry {
            event = event.retry(retry);
        }
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct ReadFlag {
    #[serde(default = "default_true")]
    value: bool,
}

fn default_true() -> bool {
    true
}

async fn set_read(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Query(flag): Query<ReadFlag>,
) -> ApiResult<Json<Notice>> {
    match state.engine.notify.set_read(id, flag.value).await? {
        Some(notice) => Ok(Json(notice)),
        None => Err(ApiError(EngineError::NotFound(id))),
    }
}

async fn mark_all_read(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.engine.notify.mark_all_read().await?;
    Ok(StatusCode::NO_CONTENT)
}
