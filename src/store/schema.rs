use anyhow::Context;
use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        slug      TEXT NOT NULL UNIQUE,
        name      TEXT NOT NULL,
        room_type TEXT NOT NULL DEFAULT 'public' CHECK (room_type IN ('public', 'private'))
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS room_participants (
        room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        PRIMARY KEY (room_id, user_id)
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id   INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        sender_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content   TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        is_read   INTEGER NOT NULL DEFAULT 0
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS message_reads (
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        PRIMARY KEY (message_id, user_id)
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        user_id   INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        is_online INTEGER NOT NULL DEFAULT 0,
        last_seen INTEGER NOT NULL
    );"#,
    "CREATE INDEX IF NOT EXISTS messages_room_timestamp ON messages (room_id, timestamp);",
];

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| {
                format!(
                    "apply migration: {}",
                    statement.trim().lines().next().unwrap_or_default()
                )
            })?;
    }
    Ok(())
}
