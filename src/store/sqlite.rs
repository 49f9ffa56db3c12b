use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::{
    validate_room_name, ClientRecord, Message, PresenceLogEntry, PresenceStatus, Role, Room,
};

use super::{Store, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        room_id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS clients (
        client_id TEXT PRIMARY KEY NOT NULL,
        room_id TEXT NOT NULL REFERENCES rooms(room_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        user_name TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY NOT NULL,
        room_id TEXT NOT NULL REFERENCES rooms(room_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        user_name TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_room_created ON messages (room_id, created_at)",
    "CREATE TABLE IF NOT EXISTS presence_logs (
        log_id TEXT PRIMARY KEY NOT NULL,
        client_id TEXT NOT NULL,
        room_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS presence_logs_user_room
        ON presence_logs (user_id, room_id, status, created_at)",
];

type RoomRow = (String, String, i64, i64);
type ClientRow = (String, String, String, String, String, i64, i64);
type MessageRow = (String, String, String, String, String, String, i64, i64);
type LogRow = (String, String, String, String, String, i64);

const CLIENT_COLUMNS: &str = "client_id,room_id,user_id,user_name,role,created_at,updated_at";
const MESSAGE_COLUMNS: &str =
    "message_id,room_id,user_id,client_id,user_name,content,created_at,updated_at";

/// [`Store`] backed by a sqlite pool. Timestamps are kept as unix nanoseconds
/// so range comparisons in SQL are exact.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap().await?;
        info!(database_url, "store ready");
        Ok(store)
    }

    /// Single-connection in-memory database, kept alive for the pool's lifetime.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn to_nanos(t: OffsetDateTime) -> StoreResult<i64> {
    i64::try_from(t.unix_timestamp_nanos())
        .map_err(|_| StoreError::Invalid(format!("timestamp {t} is out of range")))
}

fn from_nanos(nanos: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| StoreError::Transient(e.into()))
}

fn parse_id(id: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(id).map_err(|e| StoreError::Transient(e.into()))
}

fn room_from_row((room_id, name, created_at, updated_at): RoomRow) -> StoreResult<Room> {
    Ok(Room {
        room_id: parse_id(&room_id)?,
        name,
        created_at: from_nanos(created_at)?,
        updated_at: from_nanos(updated_at)?,
    })
}

fn client_from_row(
    (client_id, room_id, user_id, user_name, role, created_at, updated_at): ClientRow,
) -> StoreResult<ClientRecord> {
    Ok(ClientRecord {
        client_id: parse_id(&client_id)?,
        room_id: parse_id(&room_id)?,
        user_id,
        user_name,
        role: role.parse()?,
        created_at: from_nanos(created_at)?,
        updated_at: from_nanos(updated_at)?,
    })
}

fn message_from_row(
    (message_id, room_id, user_id, client_id, user_name, content, created_at, updated_at):
        MessageRow,
) -> StoreResult<Message> {
    Ok(Message {
        message_id: parse_id(&message_id)?,
        room_id: parse_id(&room_id)?,
        user_id,
        client_id: parse_id(&client_id)?,
        user_name,
        content,
        created_at: from_nanos(created_at)?,
        updated_at: from_nanos(updated_at)?,
    })
}

fn log_from_row(
    (log_id, client_id, room_id, user_id, status, created_at): LogRow,
) -> StoreResult<PresenceLogEntry> {
    Ok(PresenceLogEntry {
        log_id: parse_id(&log_id)?,
        client_id: parse_id(&client_id)?,
        room_id: parse_id(&room_id)?,
        user_id,
        status: status.parse()?,
        created_at: from_nanos(created_at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self))]
    async fn create_room(&self, name: &str) -> StoreResult<Room> {
        validate_room_name(name)?;
        let now = OffsetDateTime::now_utc();
        let room = Room {
            room_id: Uuid::now_v7(),
            name: name.trim().to_owned(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query("INSERT INTO rooms (room_id,name,created_at,updated_at) VALUES (?,?,?,?)")
            .bind(room.room_id.to_string())
            .bind(&room.name)
            .bind(to_nanos(room.created_at)?)
            .bind(to_nanos(room.updated_at)?)
            .execute(&self.pool)
            .await?;

        debug!(room_id = %room.room_id, "created room");
        Ok(room)
    }

    async fn get_room(&self, room_id: Uuid) -> StoreResult<Room> {
        let row: Option<RoomRow> =
            sqlx::query_as("SELECT room_id,name,created_at,updated_at FROM rooms WHERE room_id=?")
                .bind(room_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => room_from_row(row),
            None => Err(StoreError::not_found(format!("room {room_id}"))),
        }
    }

    #[instrument(skip(self))]
    async fn rename_room(&self, room_id: Uuid, name: &str) -> StoreResult<Room> {
        validate_room_name(name)?;
        let result = sqlx::query("UPDATE rooms SET name=?, updated_at=? WHERE room_id=?")
            .bind(name.trim())
            .bind(to_nanos(OffsetDateTime::now_utc())?)
            .bind(room_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("room {room_id}")));
        }
        self.get_room(room_id).await
    }

    #[instrument(skip(self))]
    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM rooms WHERE room_id=?")
            .bind(room_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_membership(
        &self,
        room_id: Uuid,
        user_id: &str,
        user_name: &str,
        role: Role,
    ) -> StoreResult<ClientRecord> {
        self.get_room(room_id).await?;

        let now = OffsetDateTime::now_utc();
        let record = ClientRecord {
            client_id: Uuid::now_v7(),
            room_id,
            user_id: user_id.to_owned(),
            user_name: user_name.to_owned(),
            role,
            created_at: now,
            updated_at: now,
        };

        let sql = format!("INSERT INTO clients ({CLIENT_COLUMNS}) VALUES (?,?,?,?,?,?,?)");
        let inserted = sqlx::query(&sql)
            .bind(record.client_id.to_string())
            .bind(record.room_id.to_string())
            .bind(&record.user_id)
            .bind(&record.user_name)
            .bind(record.role.as_str())
            .bind(to_nanos(record.created_at)?)
            .bind(to_nanos(record.updated_at)?)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Invalid(
                format!("{user_id} is already a member of {room_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<ClientRecord> {
        let row: Option<ClientRow> =
            sqlx::query_as(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients WHERE user_id=? AND room_id=?"
            ))
                .bind(user_id)
                .bind(room_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => client_from_row(row),
            None => Err(StoreError::not_found(format!("membership of {user_id} in {room_id}"))),
        }
    }

    async fn get_membership_by_client(
        &self,
        client_id: Uuid,
        room_id: Uuid,
    ) -> StoreResult<ClientRecord> {
        let row: Option<ClientRow> =
            sqlx::query_as(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id=? AND room_id=?"
            ))
                .bind(client_id.to_string())
                .bind(room_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => client_from_row(row),
            None => Err(StoreError::not_found(format!("client {client_id} in {room_id}"))),
        }
    }

    #[instrument(skip(self))]
    async fn delete_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM clients WHERE user_id=? AND room_id=?")
            .bind(user_id)
            .bind(room_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_memberships(&self, user_id: &str) -> StoreResult<Vec<ClientRecord>> {
        let rows: Vec<ClientRow> =
            sqlx::query_as(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients WHERE user_id=? ORDER BY created_at"
            ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(client_from_row).collect()
    }

    async fn list_room_members(&self, room_id: Uuid) -> StoreResult<Vec<ClientRecord>> {
        let rows: Vec<ClientRow> =
            sqlx::query_as(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients WHERE room_id=? ORDER BY created_at"
            ))
                .bind(room_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(client_from_row).collect()
    }

    async fn append_message(&self, mut msg: Message) -> StoreResult<Message> {
        if msg.message_id.is_nil() {
            msg.message_id = Uuid::now_v7();
        }

        let sql = format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?)");
        let inserted = sqlx::query(&sql)
            .bind(msg.message_id.to_string())
            .bind(msg.room_id.to_string())
            .bind(&msg.user_id)
            .bind(msg.client_id.to_string())
            .bind(&msg.user_name)
            .bind(&msg.content)
            .bind(to_nanos(msg.created_at)?)
            .bind(to_nanos(msg.updated_at)?)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(msg),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::not_found(format!("room {}", msg.room_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? ORDER BY created_at, message_id"
        ))
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn count_messages_since(
        &self,
        room_id: Uuid,
        since: Option<OffsetDateTime>,
    ) -> StoreResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE room_id=? AND created_at>=?")
            .bind(room_id.to_string())
            .bind(since.map(to_nanos).transpose()?.unwrap_or(i64::MIN))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn append_presence_log(&self, entry: PresenceLogEntry) -> StoreResult<PresenceLogEntry> {
        sqlx::query(
            "INSERT INTO presence_logs (log_id,client_id,room_id,user_id,status,created_at)
             VALUES (?,?,?,?,?,?)",
        )
            .bind(entry.log_id.to_string())
            .bind(entry.client_id.to_string())
            .bind(entry.room_id.to_string())
            .bind(&entry.user_id)
            .bind(entry.status.as_str())
            .bind(to_nanos(entry.created_at)?)
            .execute(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn latest_leave_log(
        &self,
        user_id: &str,
        room_id: Uuid,
    ) -> StoreResult<Option<PresenceLogEntry>> {
        let row: Option<LogRow> = sqlx::query_as(
            "SELECT log_id,client_id,room_id,user_id,status,created_at FROM presence_logs
             WHERE user_id=? AND room_id=? AND status=?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(room_id.to_string())
        .bind(PresenceStatus::Leave.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(log_from_row).transpose()
    }
}
