mod online;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use ws::admit_connection;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{slug}/ws", get(ws::room_ws))
        .route("/{slug}/online", get(online::room_online))
}
