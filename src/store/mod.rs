mod schema;
mod sqlite;

use async_trait::async_trait;
use time::OffsetDateTime;

pub use schema::migrate;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomVisibility {
    Public,
    Private,
}

impl RoomVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomVisibility::Public => "public",
            RoomVisibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub visibility: RoomVisibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Recorded,
    AlreadyRead,
    OwnMessage,
    MissingMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: OffsetDateTime,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_id(&self, user_id: i64) -> anyhow::Result<Option<Identity>>;
    async fn user_by_name(&self, username: &str) -> anyhow::Result<Option<Identity>>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room_by_slug(&self, slug: &str) -> anyhow::Result<Option<Room>>;

    /// Public rooms admit everyone and record them as participants.
    async fn admit(&self, room: &Room, user: &Identity) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(
        &self,
        room_id: i64,
        sender: &Identity,
        content: &str,
    ) -> anyhow::Result<StoredMessage>;

    async fn mark_read(&self, message_id: i64, user_id: i64) -> anyhow::Result<ReadOutcome>;

    async fn read_by(&self, message_id: i64) -> anyhow::Result<Vec<i64>>;

    /// Writes are ordered by `last_seen`: an update older than the stored
    /// row is ignored. Returns the row as stored afterwards.
    async fn upsert_profile(
        &self,
        user_id: i64,
        is_online: bool,
        last_seen: OffsetDateTime,
    ) -> anyhow::Result<Profile>;

    async fn profile(&self, user_id: i64) -> anyhow::Result<Option<Profile>>;
}
