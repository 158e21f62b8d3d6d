use std::sync::Arc;

use axum::{Json, debug_handler, extract::{Path, State}};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{AppResult, error::RelayError, session::Relay, store::UserDirectory};

#[derive(Debug, Serialize)]
pub(crate) struct UserPresence {
    username: String,
    is_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    last_seen: Option<OffsetDateTime>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn profile(
    Path(username): Path<String>,
    State(relay): State<Relay>,
    State(users): State<Arc<dyn UserDirectory>>,
) -> AppResult<Json<UserPresence>> {
    let identity = users
        .user_by_name(&username)
        .await?
        .ok_or(RelayError::UserNotFound(username))?;

    let (is_online, last_seen) = match relay.presence.get(identity.user_id) {
        Some(presence) => (presence.online, Some(presence.last_seen)),
        None => {
            let stored = relay.messages.profile(identity.user_id).await?;
            (false, stored.map(|profile| profile.last_seen))
        }
    };

    Ok(Json(UserPresence {
        username: identity.username,
        is_online,
        last_seen,
    }))
}
