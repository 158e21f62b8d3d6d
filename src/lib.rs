pub mod appresult;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod presence;
pub mod profiles;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use session::Relay;

use store::{RoomDirectory, SqliteStore, UserDirectory};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Relay,
    pub users: Arc<dyn UserDirectory>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SqliteStore, config: Config) -> Self {
        let store = Arc::new(store);
        Self {
            relay: Relay::new(
                store.clone(),
                config.outbound_queue_capacity,
                config.persistence_timeout(),
            ),
            users: store.clone(),
            rooms: store,
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            state.config.session_expiry_minutes,
        )));

    Router::new()
        .nest("/r", rooms::router())
        .nest("/p", profiles::router())
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}
