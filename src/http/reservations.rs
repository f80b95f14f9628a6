use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::BookingRequest;
use crate::model::{ArchiveEntry, Ms, Reservation, ReservationStatus, now_ms};

use super::error::ApiResult;
use super::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/client/:client_id", get(list_for_client))
        .route("/reservations/resource/:resource_id", get(list_for_resource))
        .route(
            "/reservations/resource/:resource_id/pending",
            get(list_pending),
        )
        .route(
            "/reservations/resource/:resource_id/history",
            get(list_history),
        )
        .route("/reservations/:id/status", put(set_status))
        .route("/reservations/:id", delete(remove_reservation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReservationRequest {
    resource_id: Ulid,
    client_id: Ulid,
    slot: Ms,
    #[serde(default)]
    notes: String,
    service_name: String,
    service_duration_minutes: i64,
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: ReservationStatus,
}

/// Listing shape: the reservation enriched with the client's display name,
/// plus the archival timestamp for history entries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationView {
    id: Ulid,
    resource_id: Ulid,
    client_id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_username: Option<String>,
    slot: Ms,
    status: ReservationStatus,
    notes: String,
    service_name: String,
    service_duration_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_at: Option<Ms>,
}

async fn active_view(state: &AppState, r: Reservation) -> ReservationView {
    let client_username = state.engine.directory().display_name(r.client_id).await;
    ReservationView {
        id: r.id,
        resource_id: r.resource_id,
        client_id: r.client_id,
        client_username,
        slot: r.slot,
        status: r.status,
        notes: r.notes,
        service_name: r.service_name,
        service_duration_minutes: r.service_duration_minutes,
        archived_at: None,
    }
}

async fn archived_view(state: &AppState, entry: ArchiveEntry) -> ReservationView {
    let client_username = state.engine.directory().display_name(entry.client_id).await;
    ReservationView {
        id: entry.id,
        resource_id: entry.resource_id,
        client_id: entry.client_id,
        client_username,
        slot: entry.slot,
        status: entry.status,
        notes: entry.notes,
        service_name: entry.service_name,
        service_duration_minutes: entry.service_duration_minutes,
        archived_at: Some(entry.archived_at),
    }
}

async fn views(state: &AppState, items: Vec<Reservation>) -> Vec<ReservationView> {
    let mut out = Vec::with_capacity(items.len());
    for r in items {
        out.push(active_view(state, r).await);
    }
    out
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(req): Json<CreateReservationRequest>,
) -> ApiResult<(StatusCode, Json<Reservation>)> {
    let reservation = state
        .engine
        .create_reservation(BookingRequest {
            resource_id: req.resource_id,
            client_id: req.client_id,
            slot: req.slot,
            notes: req.notes,
            service_name: req.service_name,
            service_duration_minutes: req.service_duration_minutes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn list_for_client(
    State(state): State<AppState>,
    Path(client_id): Path<Ulid>,
) -> ApiResult<Json<Vec<ReservationView>>> {
    let items = state
        .engine
        .reservations_for_client(client_id, now_ms())
        .await?;
    Ok(Json(views(&state, items).await))
}

async fn list_for_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<Ulid>,
) -> ApiResult<Json<Vec<ReservationView>>> {
    let items = state
        .engine
        .reservations_for_resource(resource_id, now_ms())
        .await?;
    Ok(Json(views(&state, items).await))
}

async fn list_pending(
    State(state): State<AppState>,
    Path(resource_id): Path<Ulid>,
) -> Json<Vec<ReservationView>> {
    let items = state.engine.pending_for_resource(resource_id).await;
    // Pending listings never fail: an unknown resource is an empty book.
    Json(futures::future::join_all(items.into_iter().map(|r| active_view(&state, r))).await)
}

async fn list_history(
    State(state): State<AppState>,
    Path(resource_id): Path<Ulid>,
) -> ApiResult<Json<Vec<ReservationView>>> {
    let (active, archived) = state
        .engine
        .history_for_resource(resource_id, now_ms())
        .await?;
    let mut out = views(&state, active).await;
    for entry in archived {
        out.push(archived_view(&state, entry).await);
    }
    Ok(Json(out))
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<SetStatusRequest>,
) -> ApiResult<Json<Reservation>> {
    let reservation = state.engine.update_status(id, req.status).await?;
    Ok(Json(reservation))
}

async fn remove_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_reservation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
