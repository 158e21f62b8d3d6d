use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub outbound_queue_capacity: usize,
    pub idle_timeout_secs: u64,
    pub persistence_timeout_ms: u64,
    pub session_expiry_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://roomrelay.db?mode=rwc".into(),
            bind_addr: "0.0.0.0:8080".into(),
            db_max_connections: 16,
            outbound_queue_capacity: 64,
            idle_timeout_secs: 120,
            persistence_timeout_ms: 5000,
            session_expiry_minutes: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        parse_into(&lookup, "DB_MAX_CONNECTIONS", &mut config.db_max_connections)?;
        parse_into(&lookup, "OUTBOUND_QUEUE_CAPACITY", &mut config.outbound_queue_capacity)?;
        parse_into(&lookup, "IDLE_TIMEOUT_SECS", &mut config.idle_timeout_secs)?;
        parse_into(&lookup, "PERSISTENCE_TIMEOUT_MS", &mut config.persistence_timeout_ms)?;
        parse_into(&lookup, "SESSION_EXPIRY_MINUTES", &mut config.session_expiry_minutes)?;

        anyhow::ensure!(config.outbound_queue_capacity > 0, "OUTBOUND_QUEUE_CAPACITY must be positive");
        anyhow::ensure!(config.idle_timeout_secs > 0, "IDLE_TIMEOUT_SECS must be positive");
        anyhow::ensure!(config.persistence_timeout_ms > 0, "PERSISTENCE_TIMEOUT_MS must be positive");
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}={raw:?}"))?;
    }
    Ok(())
}
