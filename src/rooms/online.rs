use std::sync::Arc;

use axum::{Json, debug_handler, extract::{Path, State}};
use serde::Serialize;

use crate::{AppResult, error::RelayError, session::Relay, store::RoomDirectory};

#[derive(Debug, Serialize)]
pub(crate) struct RoomOnline {
    room: String,
    online: Vec<String>,
    count: usize,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_online(
    Path(slug): Path<String>,
    State(relay): State<Relay>,
    State(rooms): State<Arc<dyn RoomDirectory>>,
) -> AppResult<Json<RoomOnline>> {
    let room = rooms
        .room_by_slug(&slug)
        .await?
        .ok_or(RelayError::RoomNotFound(slug))?;

    let online = relay.broker.usernames(&room.slug);
    Ok(Json(RoomOnline {
        room: room.slug,
        count: online.len(),
        online,
    }))
}
