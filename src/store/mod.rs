//! Durable store for rooms, memberships, messages and presence logs.
//!
//! Everything above this module talks to a [`Store`] trait object so the
//! sqlite backend can be swapped for [`MemoryStore`] in tests.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{ClientRecord, Message, PresenceLogEntry, Role, Room};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("store unavailable: {0}")]
    Transient(#[source] anyhow::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_owned()),
            err => Self::Transient(err.into()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Transient(anyhow::Error::new(err).context("store call timed out"))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_room(&self, name: &str) -> StoreResult<Room>;
    async fn get_room(&self, room_id: Uuid) -> StoreResult<Room>;
    async fn rename_room(&self, room_id: Uuid, name: &str) -> StoreResult<Room>;
    /// Removes the room along with its memberships and messages.
    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()>;

    async fn create_membership(
        &self,
        room_id: Uuid,
        user_id: &str,
        user_name: &str,
        role: Role,
    ) -> StoreResult<ClientRecord>;
    async fn get_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<ClientRecord>;
    async fn get_membership_by_client(
        &self,
        client_id: Uuid,
        room_id: Uuid,
    ) -> StoreResult<ClientRecord>;
    async fn delete_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<()>;
    async fn list_memberships(&self, user_id: &str) -> StoreResult<Vec<ClientRecord>>;
    async fn list_room_members(&self, room_id: Uuid) -> StoreResult<Vec<ClientRecord>>;

    /// Persists a message, assigning an id if it has none yet.
    async fn append_message(&self, msg: Message) -> StoreResult<Message>;
    /// Messages of a room, oldest first.
    async fn list_messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>>;
    /// Messages of a room created at or after `since`; all of them when `since` is `None`.
    async fn count_messages_since(
        &self,
        room_id: Uuid,
        since: Option<OffsetDateTime>,
    ) -> StoreResult<u64>;

    async fn append_presence_log(&self, entry: PresenceLogEntry) -> StoreResult<PresenceLogEntry>;
    async fn latest_leave_log(
        &self,
        user_id: &str,
        room_id: Uuid,
    ) -> StoreResult<Option<PresenceLogEntry>>;
}
