use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use kindred_db::{Database, InvalidTransition, SaveKind};
use kindred_types::api::{
    ChannelListQuery, InterestListQuery, PairQuery, SaveChannelRequest, SaveInterestRequest,
};
use kindred_types::events::PushEvent;
use kindred_types::models::{Channel, Interest, InterestStatus};

use crate::AppState;
use crate::stomp_session;

/// Run a blocking database call off the async runtime.
async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            if let Some(invalid) = e.downcast_ref::<InvalidTransition>() {
                warn!("Rejected save: {}", invalid);
                return StatusCode::CONFLICT;
            }
            error!("Database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// -- Interests --

pub async fn get_interest(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<Json<Interest>, StatusCode> {
    let row = with_db(&state, move |db| db.get_interest(query.from_user_id, query.to_user_id)).await?;
    row.map(|r| Json(r.into_interest())).ok_or(StatusCode::NOT_FOUND)
}

/// Create or respond to one directional interest and notify the other side.
/// Settled records are final: changing one is a 409.
pub async fn save_interest(
    State(state): State<AppState>,
    Json(req): Json<SaveInterestRequest>,
) -> Result<Json<Interest>, StatusCode> {
    if req.from_user_id == req.to_user_id || req.status == Some(InterestStatus::Unknown) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (from, to) = (req.from_user_id, req.to_user_id);
    let status = req.status.map(|s| s.as_str());
    let (row, kind) = with_db(&state, move |db| db.save_interest(from, to, status, now_ms())).await?;
    let interest = row.into_interest();

    match kind {
        SaveKind::Created => {
            info!("Interest {} -> {} created", from, to);
            state.hub.publish(to, &PushEvent::InterestReceived(interest.clone())).await;
        }
        SaveKind::Updated => {
            info!("Interest {} -> {} is now {}", from, to, interest.status);
            state.hub.publish(from, &PushEvent::InterestResponded(interest.clone())).await;
        }
        SaveKind::Unchanged => {}
    }

    Ok(Json(interest))
}

pub async fn list_incoming(
    State(state): State<AppState>,
    Query(query): Query<InterestListQuery>,
) -> Result<Json<Vec<Interest>>, StatusCode> {
    let status = query.status.map(|s| s.as_str());
    let rows = with_db(&state, move |db| db.list_interests_to(query.user_id, status)).await?;
    Ok(Json(rows.into_iter().map(|r| r.into_interest()).collect()))
}

pub async fn list_sent(
    State(state): State<AppState>,
    Query(query): Query<InterestListQuery>,
) -> Result<Json<Vec<Interest>>, StatusCode> {
    let status = query.status.map(|s| s.as_str());
    let rows = with_db(&state, move |db| db.list_interests_from(query.user_id, status)).await?;
    Ok(Json(rows.into_iter().map(|r| r.into_interest()).collect()))
}

// -- Channels --

pub async fn get_channel(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<Json<Channel>, StatusCode> {
    let row = with_db(&state, move |db| db.get_channel(query.from_user_id, query.to_user_id)).await?;
    row.map(|r| Json(r.into_channel())).ok_or(StatusCode::NOT_FOUND)
}

/// 201 with the new channel, or 409 with the one that already exists.
pub async fn save_channel(
    State(state): State<AppState>,
    Json(req): Json<SaveChannelRequest>,
) -> Result<Response, StatusCode> {
    if req.from_user_id == req.to_user_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (from, to) = (req.from_user_id, req.to_user_id);
    let (row, created) = with_db(&state, move |db| db.create_channel(from, to, now_ms())).await?;
    let channel = row.into_channel();

    if !created {
        return Ok((StatusCode::CONFLICT, Json(channel)).into_response());
    }

    info!("Channel {} created for {} and {}", channel.id, from, to);
    let event = PushEvent::ChannelCreated(channel.clone());
    state.hub.publish(from, &event).await;
    state.hub.publish(to, &event).await;

    Ok((StatusCode::CREATED, Json(channel)).into_response())
}

pub async fn list_channels(
    State(state): State<AppState>,
    Query(query): Query<ChannelListQuery>,
) -> Result<Json<Vec<Channel>>, StatusCode> {
    let rows = with_db(&state, move |db| db.list_channels(query.user_id)).await?;
    Ok(Json(rows.into_iter().map(|r| r.into_channel()).collect()))
}

// -- Push --

pub async fn rtm_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stomp_session::handle_socket(socket, state.hub.clone()))
}
