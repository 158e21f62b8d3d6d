use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State, WebSocketUpgrade}, response::{IntoResponse, Response}};
use futures_util::StreamExt;
use tower_sessions::Session;
use tracing::warn;

use crate::{
    AppResult,
    auth,
    config::Config,
    error::RelayError,
    session::{Relay, drive},
    store::{Identity, Room, RoomDirectory, UserDirectory},
};

pub async fn admit_connection(
    session: &Session,
    users: &dyn UserDirectory,
    rooms: &dyn RoomDirectory,
    slug: &str,
) -> AppResult<(Room, Identity)> {
    let Some(identity) = auth::current_identity(session, users).await? else {
        return Err(RelayError::AuthRequired.into());
    };
    let room = rooms
        .room_by_slug(slug)
        .await?
        .ok_or_else(|| RelayError::RoomNotFound(slug.to_owned()))?;
    if !rooms.admit(&room, &identity).await? {
        warn!(room = %room.slug, user = %identity.username, "room access denied");
        return Err(RelayError::AccessDenied.into());
    }

    Ok((room, identity))
}

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(slug): Path<String>,
    State(relay): State<Relay>,
    State(users): State<Arc<dyn UserDirectory>>,
    State(rooms): State<Arc<dyn RoomDirectory>>,
    State(config): State<Arc<Config>>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let (room, identity) = admit_connection(&session, users.as_ref(), rooms.as_ref(), &slug).await?;
    let idle_timeout = config.idle_timeout();

    Ok(ws
        .on_upgrade(move |socket| async move {
            let (conn, outbound) = match relay.connect(room, Some(identity)).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "could not open session");
                    return;
                }
            };
            let (sink, stream) = socket.split();
            drive(conn, outbound, sink, stream, idle_timeout).await;
        })
        .into_response())
}
