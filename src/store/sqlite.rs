use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::{
    Identity, MessageStore, Profile, ReadOutcome, Room, RoomDirectory, RoomVisibility,
    StoredMessage, UserDirectory,
};

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        // in-memory databases live and die with their one connection
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };
        let db_pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("connect to sqlite via {database_url}"))?;

        super::migrate(&db_pool).await?;
        Ok(Self::new(db_pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub async fn create_user(&self, username: &str) -> anyhow::Result<Identity> {
        let user_id = sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.db_pool)
            .await?
            .last_insert_rowid();

        Ok(Identity {
            user_id,
            username: username.to_owned(),
        })
    }

    pub async fn create_room(
        &self,
        slug: &str,
        name: &str,
        visibility: RoomVisibility,
    ) -> anyhow::Result<Room> {
        let id = sqlx::query("INSERT INTO rooms (slug,name,room_type) VALUES (?,?,?)")
            .bind(slug)
            .bind(name)
            .bind(visibility.as_str())
            .execute(&self.db_pool)
            .await?
            .last_insert_rowid();

        Ok(Room {
            id,
            slug: slug.to_owned(),
            name: name.to_owned(),
            visibility,
        })
    }

    pub async fn add_participant(&self, room_id: i64, user_id: i64) -> anyhow::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,user_id) VALUES (?,?)")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

fn to_unix_nanos(at: OffsetDateTime) -> anyhow::Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).with_context(|| format!("timestamp out of range: {at}"))
}

fn from_unix_nanos(nanos: i64) -> anyhow::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .with_context(|| format!("bad timestamp {nanos}"))
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn user_by_id(&self, user_id: i64) -> anyhow::Result<Option<Identity>> {
        let row: Option<(i64, String)> = sqlx::query_as("SELECT id,username FROM users WHERE id=?")
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(|(user_id, username)| Identity { user_id, username }))
    }

    async fn user_by_name(&self, username: &str) -> anyhow::Result<Option<Identity>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id,username FROM users WHERE username=?")
                .bind(username)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(|(user_id, username)| Identity { user_id, username }))
    }
}

#[async_trait]
impl RoomDirectory for SqliteStore {
    async fn room_by_slug(&self, slug: &str) -> anyhow::Result<Option<Room>> {
        let row: Option<(i64, String, String, String)> =
            sqlx::query_as("SELECT id,slug,name,room_type FROM rooms WHERE slug=?")
                .bind(slug)
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((id, slug, name, room_type)) = row else {
            return Ok(None);
        };
        let visibility = match room_type.as_str() {
            "public" => RoomVisibility::Public,
            "private" => RoomVisibility::Private,
            other => return Err(anyhow!("room {slug} has unknown type {other:?}")),
        };

        Ok(Some(Room {
            id,
            slug,
            name,
            visibility,
        }))
    }

    async fn admit(&self, room: &Room, user: &Identity) -> anyhow::Result<bool> {
        match room.visibility {
            RoomVisibility::Public => {
                self.add_participant(room.id, user.user_id).await?;
                Ok(true)
            }
            RoomVisibility::Private => {
                let row: Option<(i64,)> = sqlx::query_as(
                    "SELECT user_id FROM room_participants WHERE room_id=? AND user_id=?",
                )
                .bind(room.id)
                .bind(user.user_id)
                .fetch_optional(&self.db_pool)
                .await?;
                Ok(row.is_some())
            }
        }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn save_message(
        &self,
        room_id: i64,
        sender: &Identity,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let timestamp = OffsetDateTime::now_utc();
        let id = sqlx::query(
            "INSERT INTO messages (room_id,sender_id,content,timestamp) VALUES (?,?,?,?)",
        )
        .bind(room_id)
        .bind(sender.user_id)
        .bind(content)
        .bind(timestamp.format(&Rfc3339)?)
        .execute(&self.db_pool)
        .await?
        .last_insert_rowid();

        Ok(StoredMessage { id, timestamp })
    }

    async fn mark_read(&self, message_id: i64, user_id: i64) -> anyhow::Result<ReadOutcome> {
        let sender: Option<(i64,)> = sqlx::query_as("SELECT sender_id FROM messages WHERE id=?")
            .bind(message_id)
            .fetch_optional(&self.db_pool)
            .await?;

        let Some((sender_id,)) = sender else {
            return Ok(ReadOutcome::MissingMessage);
        };
        if sender_id == user_id {
            return Ok(ReadOutcome::OwnMessage);
        }

        let inserted =
            sqlx::query("INSERT OR IGNORE INTO message_reads (message_id,user_id) VALUES (?,?)")
                .bind(message_id)
                .bind(user_id)
                .execute(&self.db_pool)
                .await?
                .rows_affected();
        if inserted == 0 {
            return Ok(ReadOutcome::AlreadyRead);
        }

        sqlx::query("UPDATE messages SET is_read=1 WHERE id=? AND is_read=0")
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;

        Ok(ReadOutcome::Recorded)
    }

    async fn read_by(&self, message_id: i64) -> anyhow::Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM message_reads WHERE message_id=? ORDER BY user_id")
                .bind(message_id)
                .fetch_all(&self.db_pool)
                .await?;

        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn upsert_profile(
        &self,
        user_id: i64,
        is_online: bool,
        last_seen: OffsetDateTime,
    ) -> anyhow::Result<Profile> {
        sqlx::query(
            "INSERT INTO profiles (user_id,is_online,last_seen) VALUES (?,?,?)
             ON CONFLICT(user_id) DO UPDATE SET is_online=excluded.is_online, last_seen=excluded.last_seen
             WHERE excluded.last_seen > profiles.last_seen",
        )
        .bind(user_id)
        .bind(is_online)
        .bind(to_unix_nanos(last_seen)?)
        .execute(&self.db_pool)
        .await?;

        self.profile(user_id)
            .await?
            .ok_or_else(|| anyhow!("profile {user_id} missing after upsert"))
    }

    async fn profile(&self, user_id: i64) -> anyhow::Result<Option<Profile>> {
        let row: Option<(bool, i64)> =
            sqlx::query_as("SELECT is_online,last_seen FROM profiles WHERE user_id=?")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((is_online, last_seen)) = row else {
            return Ok(None);
        };
        Ok(Some(Profile {
            user_id,
            is_online,
            last_seen: from_unix_nanos(last_seen)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = store().await;
        super::super::migrate(store.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn save_message_assigns_increasing_ids() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let room = store
            .create_room("general", "General", RoomVisibility::Public)
            .await
            .unwrap();

        let first = store.save_message(room.id, &alice, "hi").await.unwrap();
        let second = store.save_message(room.id, &alice, "again").await.unwrap();
        assert!(second.id > first.id);
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let bob = store.create_user("bob").await.unwrap();
        let room = store
            .create_room("general", "General", RoomVisibility::Public)
            .await
            .unwrap();
        let msg = store.save_message(room.id, &alice, "hi").await.unwrap();

        assert_eq!(store.mark_read(msg.id, bob.user_id).await.unwrap(), ReadOutcome::Recorded);
        assert_eq!(store.mark_read(msg.id, bob.user_id).await.unwrap(), ReadOutcome::AlreadyRead);
        assert_eq!(store.read_by(msg.id).await.unwrap(), vec![bob.user_id]);

        let (is_read,): (bool,) = sqlx::query_as("SELECT is_read FROM messages WHERE id=?")
            .bind(msg.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!(is_read);
    }

    #[tokio::test]
    async fn sender_does_not_read_own_message() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let room = store
            .create_room("general", "General", RoomVisibility::Public)
            .await
            .unwrap();
        let msg = store.save_message(room.id, &alice, "hi").await.unwrap();

        assert_eq!(store.mark_read(msg.id, alice.user_id).await.unwrap(), ReadOutcome::OwnMessage);
        assert!(store.read_by(msg.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_message_is_noop() {
        let store = store().await;
        let bob = store.create_user("bob").await.unwrap();
        assert_eq!(
            store.mark_read(9999, bob.user_id).await.unwrap(),
            ReadOutcome::MissingMessage
        );
        assert!(store.read_by(9999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_rooms_only_admit_participants() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let bob = store.create_user("bob").await.unwrap();
        let room = store
            .create_room("secret", "Secret", RoomVisibility::Private)
            .await
            .unwrap();
        store.add_participant(room.id, alice.user_id).await.unwrap();

        assert!(store.admit(&room, &alice).await.unwrap());
        assert!(!store.admit(&room, &bob).await.unwrap());
    }

    #[tokio::test]
    async fn public_rooms_record_participants() {
        let store = store().await;
        let bob = store.create_user("bob").await.unwrap();
        let room = store
            .create_room("general", "General", RoomVisibility::Public)
            .await
            .unwrap();

        assert!(store.admit(&room, &bob).await.unwrap());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM room_participants WHERE room_id=?")
            .bind(room.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let found = store.room_by_slug("general").await.unwrap().unwrap();
        assert_eq!(found, room);
        assert!(store.room_by_slug("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_profile_round_trips() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let online_at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let offline_at = online_at + time::Duration::seconds(5);

        store.upsert_profile(alice.user_id, true, online_at).await.unwrap();
        let stored = store.upsert_profile(alice.user_id, false, offline_at).await.unwrap();
        assert!(!stored.is_online);
        assert_eq!(stored.last_seen, offline_at);

        let profile = store.profile(alice.user_id).await.unwrap().unwrap();
        assert_eq!(profile, stored);
        assert!(store.profile(4242).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn older_presence_write_does_not_overwrite_newer() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        let offline_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        // Same second, earlier sub-second part: RFC 3339 text would sort this wrong.
        let online_at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_900_000_000).unwrap();

        store.upsert_profile(alice.user_id, true, online_at).await.unwrap();
        let stored = store.upsert_profile(alice.user_id, false, offline_at).await.unwrap();

        assert!(stored.is_online);
        assert_eq!(stored.last_seen, online_at);
        assert_eq!(store.profile(alice.user_id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn users_resolve_by_id_and_name() {
        let store = store().await;
        let alice = store.create_user("alice").await.unwrap();
        assert_eq!(store.user_by_id(alice.user_id).await.unwrap(), Some(alice.clone()));
        assert_eq!(store.user_by_name("alice").await.unwrap(), Some(alice));
        assert!(store.user_by_name("mallory").await.unwrap().is_none());
    }
}
