use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{Ms, Slot, now_ms};

use super::error::ApiResult;
use super::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/slots", post(create_slot))
        .route("/slots/resource/:resource_id", get(list_available))
        .route("/slots/:id", delete(remove_slot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSlotRequest {
    resource_id: Ulid,
    start: Ms,
    duration_minutes: Option<i64>,
}

async fn create_slot(
    State(state): State<AppState>,
    Json(req): Json<CreateSlotRequest>,
) -> ApiResult<(StatusCode, Json<Slot>)> {
    let slot = state
        .engine
        .create_slot(req.resource_id, req.start, req.duration_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn list_available(
    State(state): State<AppState>,
    Path(resource_id): Path<Ulid>,
) -> Json<Vec<Slot>> {
    Json(state.engine.available_slots(resource_id, now_ms()).await)
}

async fn remove_slot(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_slot(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
