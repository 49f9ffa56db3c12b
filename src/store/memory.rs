use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    validate_room_name, ClientRecord, Message, PresenceLogEntry, PresenceStatus, Role, Room,
};

use super::{Store, StoreError, StoreResult};

/// In-process [`Store`]; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<Uuid, Room>,
    clients: Vec<ClientRecord>,
    messages: Vec<Message>,
    logs: Vec<PresenceLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_room(&self, name: &str) -> StoreResult<Room> {
        validate_room_name(name)?;
        let now = OffsetDateTime::now_utc();
        let room = Room {
            room_id: Uuid::now_v7(),
            name: name.trim().to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().await.rooms.insert(room.room_id, room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: Uuid) -> StoreResult<Room> {
        self.inner
            .lock()
            .await
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("room {room_id}")))
    }

    async fn rename_room(&self, room_id: Uuid, name: &str) -> StoreResult<Room> {
        validate_room_name(name)?;
        let mut inner = self.inner.lock().await;
        let room = inner
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| StoreError::not_found(format!("room {room_id}")))?;
        room.name = name.trim().to_owned();
        room.updated_at = OffsetDateTime::now_utc();
        Ok(room.clone())
    }

    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.rooms.remove(&room_id);
        inner.clients.retain(|c| c.room_id != room_id);
        inner.messages.retain(|m| m.room_id != room_id);
        Ok(())
    }

    async fn create_membership(
        &self,
        room_id: Uuid,
        user_id: &str,
        user_name: &str,
        role: Role,
    ) -> StoreResult<ClientRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(&room_id) {
            return Err(StoreError::not_found(format!("room {room_id}")));
        }
        if inner.clients.iter().any(|c| c.room_id == room_id && c.user_id == user_id) {
            return Err(StoreError::Invalid(format!("{user_id} is already a member of {room_id}")));
        }

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
        inner.clients.push(record.clone());
        Ok(record)
    }

    async fn get_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<ClientRecord> {
        self.inner
            .lock()
            .await
            .clients
            .iter()
            .find(|c| c.room_id == room_id && c.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("membership of {user_id} in {room_id}")))
    }

    async fn get_membership_by_client(
        &self,
        client_id: Uuid,
        room_id: Uuid,
    ) -> StoreResult<ClientRecord> {
        self.inner
            .lock()
            .await
            .clients
            .iter()
            .find(|c| c.room_id == room_id && c.client_id == client_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("client {client_id} in {room_id}")))
    }

    async fn delete_membership(&self, user_id: &str, room_id: Uuid) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .clients
            .retain(|c| !(c.room_id == room_id && c.user_id == user_id));
        Ok(())
    }

    async fn list_memberships(&self, user_id: &str) -> StoreResult<Vec<ClientRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .clients
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_room_members(&self, room_id: Uuid) -> StoreResult<Vec<ClientRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .clients
            .iter()
            .filter(|c| c.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn append_message(&self, mut msg: Message) -> StoreResult<Message> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(&msg.room_id) {
            return Err(StoreError::not_found(format!("room {}", msg.room_id)));
        }
        if msg.message_id.is_nil() {
            msg.message_id = Uuid::now_v7();
        }
        inner.messages.push(msg.clone());
        Ok(msg)
    }

    async fn list_messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn count_messages_since(
        &self,
        room_id: Uuid,
        since: Option<OffsetDateTime>,
    ) -> StoreResult<u64> {
        let count = self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| since.is_none_or(|since| m.created_at >= since))
            .count();
        Ok(count as u64)
    }

    async fn append_presence_log(&self, entry: PresenceLogEntry) -> StoreResult<PresenceLogEntry> {
        self.inner.lock().await.logs.push(entry.clone());
        Ok(entry)
    }

    async fn latest_leave_log(
        &self,
        user_id: &str,
        room_id: Uuid,
    ) -> StoreResult<Option<PresenceLogEntry>> {
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.user_id == user_id && l.room_id == room_id)
            .filter(|l| l.status == PresenceStatus::Leave)
            .max_by_key(|l| l.created_at)
            .cloned())
    }
}
