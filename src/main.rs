use std::net::SocketAddr;

use anyhow::Context;
use roomrelay::{AppState, Config, app, store::SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomrelay=info,tower_http=info")),
        )
        .init();

    let store = SqliteStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("open database")?;

    let addr: SocketAddr = config.bind_addr.parse().context("parse BIND_ADDR")?;
    let app = app(AppState::new(store, config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind tcp listener")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server shutdown")?;

    Ok(())
}
