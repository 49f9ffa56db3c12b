use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: Uuid,
    pub name: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomWithUnread {
    #[serde(flatten)]
    pub room: Room,
    pub unread_message: u64,
}

/// Membership role. The admin is whoever created the room; when they leave,
/// the room goes with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(StoreError::Invalid(format!("unknown role {other:?}"))),
        }
    }
}

/// Durable membership of a user in a room.
///
/// `client_id` doubles as the identity of the live connection opened for
/// this membership, so one membership maps to at most one registered client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: Uuid,
    pub room_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub room_id: Uuid,
    pub user_id: String,
    pub client_id: Uuid,
    pub user_name: String,
    pub content: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Message {
    pub const MAX_CONTENT_LEN: usize = 500;

    /// A message that hasn't been persisted yet. The store fills in the id.
    pub fn draft(
        room_id: Uuid,
        client_id: Uuid,
        user_id: &str,
        user_name: &str,
        content: String,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            message_id: Uuid::nil(),
            room_id,
            user_id: user_id.to_owned(),
            client_id,
            user_name: user_name.to_owned(),
            content,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let len = self.content.chars().count();
        if self.content.trim().is_empty() {
            return Err(StoreError::Invalid("message content is empty".to_owned()));
        }
        if len > Self::MAX_CONTENT_LEN {
            return Err(StoreError::Invalid(format!(
                "message content is {len} chars, must be at most {}",
                Self::MAX_CONTENT_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Leave,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Leave => "leave",
        }
    }
}

impl FromStr for PresenceStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "leave" => Ok(PresenceStatus::Leave),
            other => Err(StoreError::Invalid(format!("unknown presence status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceLogEntry {
    pub log_id: Uuid,
    pub client_id: Uuid,
    pub room_id: Uuid,
    pub user_id: String,
    pub status: PresenceStatus,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PresenceLogEntry {
    pub fn now(client_id: Uuid, room_id: Uuid, user_id: &str, status: PresenceStatus) -> Self {
        Self {
            log_id: Uuid::now_v7(),
            client_id,
            room_id,
            user_id: user_id.to_owned(),
            status,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

pub const MAX_ROOM_NAME_LEN: usize = 50;

pub fn validate_room_name(name: &str) -> Result<(), StoreError> {
    let len = name.trim().chars().count();
    if len == 0 || len > MAX_ROOM_NAME_LEN {
        return Err(StoreError::Invalid(format!(
            "room name must be 1..={MAX_ROOM_NAME_LEN} chars"
        )));
    }
    Ok(())
}
