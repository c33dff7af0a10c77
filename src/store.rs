use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

/// Seconds a user-created room stays active before the sweep removes it.
const DEFAULT_ROOM_TTL_SECS: i64 = 24 * 60 * 60;

pub fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Idempotent schema setup, run once at startup.
pub async fn setup(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            topic_title TEXT,
            topic_description TEXT,
            topic_url TEXT,
            topic_source TEXT,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            expires_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            user_id TEXT,
            username TEXT NOT NULL,
            content TEXT NOT NULL,
            is_system INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (unixepoch())
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_room_created
         ON messages (room_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_stats (
            user_id TEXT PRIMARY KEY,
            total_messages INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// A durable room row. `expires_at`/`created_at` are unix seconds.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub is_pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_source: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Default)]
pub struct NewRoom {
    pub name: String,
    pub is_pinned: bool,
    pub topic_title: Option<String>,
    pub topic_description: Option<String>,
    pub topic_url: Option<String>,
    pub topic_source: Option<String>,
    /// Unix seconds; defaults to 24h from now when absent.
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub user_id: Option<String>,
    pub username: String,
    pub content: String,
    pub is_system: bool,
    pub created_at: i64,
}

#[derive(Debug)]
pub struct NewMessage {
    pub room_id: String,
    pub user_id: Option<Uuid>,
    pub username: String,
    pub content: String,
    pub is_system: bool,
}

/// Queries for rooms and their durable message log.
#[derive(Clone)]
pub struct RoomStore {
    pool: SqlitePool,
}

impl RoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, sqlx::Error> {
        let created_at = now_ts();
        let room = Room {
            id: Uuid::now_v7().to_string(),
            name: new.name,
            is_pinned: new.is_pinned,
            topic_title: new.topic_title,
            topic_description: new.topic_description,
            topic_url: new.topic_url,
            topic_source: new.topic_source,
            created_at,
            expires_at: new.expires_at.unwrap_or(created_at + DEFAULT_ROOM_TTL_SECS),
        };

        sqlx::query(
            "INSERT INTO rooms
                (id, name, is_pinned, topic_title, topic_description,
                 topic_url, topic_source, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(room.is_pinned)
        .bind(&room.topic_title)
        .bind(&room.topic_description)
        .bind(&room.topic_url)
        .bind(&room.topic_source)
        .bind(room.created_at)
        .bind(room.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(room)
    }

    /// Fetch a room only while it is unexpired; `None` otherwise.
    pub async fn room_by_id(&self, id: &Uuid) -> Result<Option<Room>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM rooms WHERE id = ? AND expires_at > unixepoch()")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn active_rooms(&self) -> Result<Vec<Room>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM rooms WHERE expires_at > unixepoch() ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_active_rooms(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM rooms WHERE expires_at > unixepoch()")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_pinned_rooms(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM rooms WHERE is_pinned = 1 AND expires_at > unixepoch()",
        )
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete_expired_rooms(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rooms WHERE expires_at <= unixepoch()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn create_message(&self, msg: NewMessage) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO messages (id, room_id, user_id, username, content, is_system)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&msg.room_id)
        .bind(msg.user_id.as_ref().map(Uuid::to_string))
        .bind(&msg.username)
        .bind(&msg.content)
        .bind(msg.is_system)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent `limit` messages of an unexpired room, oldest first.
    ///
    /// Message ids are v7 UUIDs, so the id is a chronological tiebreaker for
    /// rows sharing one creation second.
    pub async fn recent_messages(
        &self,
        room_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, sqlx::Error> {
        let mut messages: Vec<StoredMessage> = sqlx::query_as(
            "SELECT m.* FROM messages m
             INNER JOIN rooms r ON m.room_id = r.id
             WHERE m.room_id = ? AND r.expires_at > unixepoch()
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }
}

/// Per-user lifetime counters.
#[derive(Clone)]
pub struct StatsStore {
    pool: SqlitePool,
}

impl StatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn increment_message_count(&self, user_id: &Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_stats (user_id, total_messages) VALUES (?, 1)
             ON CONFLICT(user_id) DO UPDATE SET
                total_messages = total_messages + 1,
                updated_at = unixepoch()",
        )
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn total_messages(&self, user_id: &Uuid) -> Result<i64, sqlx::Error> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT total_messages FROM user_stats WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        setup(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_and_fetch_room() {
        let store = RoomStore::new(memory_pool().await);

        let room = store
            .create_room(NewRoom {
                name: "general".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(room.expires_at > room.created_at);

        let id = Uuid::parse_str(&room.id).unwrap();
        let fetched = store.room_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "general");
        assert!(!fetched.is_pinned);
    }

    #[tokio::test]
    async fn expired_rooms_are_invisible_and_swept() {
        let store = RoomStore::new(memory_pool().await);

        let dead = store
            .create_room(NewRoom {
                name: "dead".into(),
                expires_at: Some(now_ts() - 10),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_room(NewRoom {
                name: "alive".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let id = Uuid::parse_str(&dead.id).unwrap();
        assert!(store.room_by_id(&id).await.unwrap().is_none());
        assert_eq!(store.count_active_rooms().await.unwrap(), 1);
        assert_eq!(store.active_rooms().await.unwrap().len(), 1);

        assert_eq!(store.delete_expired_rooms().await.unwrap(), 1);
        assert_eq!(store.delete_expired_rooms().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pinned_rooms_counted_separately() {
        let store = RoomStore::new(memory_pool().await);
        store
            .create_room(NewRoom {
                name: "Tech Talk".into(),
                is_pinned: true,
                topic_title: Some("A story".into()),
                topic_source: Some("HackerNews".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_room(NewRoom {
                name: "plain".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.count_pinned_rooms().await.unwrap(), 1);
        assert_eq!(store.count_active_rooms().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recent_messages_come_back_oldest_first_and_capped() {
        let store = RoomStore::new(memory_pool().await);
        let room = store
            .create_room(NewRoom {
                name: "general".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        for i in 0..5 {
            store
                .create_message(NewMessage {
                    room_id: room.id.clone(),
                    user_id: None,
                    username: "ann".into(),
                    content: format!("msg {i}"),
                    is_system: false,
                })
                .await
                .unwrap();
        }

        let all = store.recent_messages(&room.id, 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "msg 0");
        assert_eq!(all[4].content, "msg 4");

        // The cap keeps the *newest* rows, still returned oldest first.
        let capped = store.recent_messages(&room.id, 3).await.unwrap();
        assert_eq!(capped.len(), 3);
        assert_eq!(capped[0].content, "msg 2");
        assert_eq!(capped[2].content, "msg 4");
    }

    #[tokio::test]
    async fn messages_of_expired_rooms_are_not_replayed() {
        let store = RoomStore::new(memory_pool().await);
        let room = store
            .create_room(NewRoom {
                name: "gone".into(),
                expires_at: Some(now_ts() - 10),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_message(NewMessage {
                room_id: room.id.clone(),
                user_id: None,
                username: "ann".into(),
                content: "too late".into(),
                is_system: false,
            })
            .await
            .unwrap();

        assert!(store.recent_messages(&room.id, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_count_upserts_then_increments() {
        let pool = memory_pool().await;
        let stats = StatsStore::new(pool);
        let user = Uuid::now_v7();

        assert_eq!(stats.total_messages(&user).await.unwrap(), 0);
        stats.increment_message_count(&user).await.unwrap();
        stats.increment_message_count(&user).await.unwrap();
        assert_eq!(stats.total_messages(&user).await.unwrap(), 2);
    }
}
