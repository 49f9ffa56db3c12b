//! The hub: one task that owns the room registry and serializes every
//! membership change and message delivery.
//!
//! Nothing else touches the registry. Connections and HTTP handlers talk to
//! the hub through a cloneable [`HubHandle`], which only sends events.

mod client;
mod registry;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    models::{Message, PresenceLogEntry, PresenceStatus, Role},
    store::{Store, StoreResult},
};

pub use client::{Client, ClientKey, OUTBOUND_CAPACITY};
pub use registry::{RoomEntry, RoomRegistry};

/// Depth of the broadcast channel. Readers wait when it is full.
pub const BROADCAST_CAPACITY: usize = 5;

/// Ask the hub to drop live clients after their memberships went away
/// through the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evict {
    Room(Uuid),
    Member { room_id: Uuid, user_id: String },
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    register: mpsc::UnboundedSender<Client>,
    unregister: mpsc::UnboundedSender<ClientKey>,
    broadcast: mpsc::Sender<Message>,
    evict: mpsc::UnboundedSender<Evict>,
}

impl HubHandle {
    pub fn register(&self, client: Client) {
        if self.register.send(client).is_err() {
            warn!("hub is gone, registration dropped");
        }
    }

    pub fn unregister(&self, key: ClientKey) {
        if self.unregister.send(key).is_err() {
            warn!("hub is gone, unregistration dropped");
        }
    }

    pub async fn broadcast(&self, msg: Message) {
        if self.broadcast.send(msg).await.is_err() {
            warn!("hub is gone, message dropped");
        }
    }

    pub fn evict(&self, evict: Evict) {
        if self.evict.send(evict).is_err() {
            warn!("hub is gone, eviction dropped");
        }
    }
}

pub struct Hub {
    store: Arc<dyn Store>,
    registry: RoomRegistry,
    store_timeout: Duration,

    register_rx: mpsc::UnboundedReceiver<Client>,
    unregister_rx: mpsc::UnboundedReceiver<ClientKey>,
    broadcast_rx: mpsc::Receiver<Message>,
    evict_rx: mpsc::UnboundedReceiver<Evict>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, store_timeout: Duration) -> (Self, HubHandle) {
        let (register, register_rx) = mpsc::unbounded_channel();
        let (unregister, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let (evict, evict_rx) = mpsc::unbounded_channel();

        let hub = Self {
            store,
            registry: RoomRegistry::new(),
            store_timeout,
            register_rx,
            unregister_rx,
            broadcast_rx,
            evict_rx,
        };
        let handle = HubHandle {
            register,
            unregister,
            broadcast,
            evict,
        };
        (hub, handle)
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Runs until every [`HubHandle`] is dropped.
    ///
    /// Leaving is checked before joining so a reconnect that races its own
    /// disconnect finds the old client gone, and joining before broadcasting
    /// so a client's first message never overtakes its registration.
    pub async fn run(mut self) {
        info!("hub running");
        loop {
            tokio::select! {
                biased;

                Some(key) = self.unregister_rx.recv() => self.unregister(key).await,
                Some(client) = self.register_rx.recv() => self.register(client).await,
                Some(evict) = self.evict_rx.recv() => self.evict(evict).await,
                Some(msg) = self.broadcast_rx.recv() => self.broadcast(msg).await,
                else => break,
            }
        }
        info!("hub stopped");
    }

    async fn call<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.store_timeout, fut).await?
    }

    async fn register(&mut self, client: Client) {
        let room = match self.call(self.store.get_room(client.room_id)).await {
            Ok(room) => room,
            Err(err) => {
                warn!(
                    room_id = %client.room_id,
                    client_id = %client.client_id,
                    %err,
                    "dropping registration"
                );
                return;
            }
        };

        if client.is_gone() {
            debug!(client_id = %client.client_id, "connection closed before registration");
            return;
        }
        if self.registry.is_member(room.room_id, client.client_id) {
            debug!(room_id = %room.room_id, client_id = %client.client_id, "already registered");
            return;
        }

        self.record_presence(&client, PresenceStatus::Online).await;
        info!(
            room_id = %room.room_id,
            client_id = %client.client_id,
            user_id = %client.user_id,
            "client joined"
        );
        if let Err(client) = self.registry.add_member(client, &room.name) {
            debug!(client_id = %client.client_id, "already registered");
        }
    }

    async fn unregister(&mut self, key: ClientKey) {
        let Some(client) = self.registry.remove_connection(&key) else {
            debug!(
                room_id = %key.room_id,
                client_id = %key.client_id,
                conn_id = %key.conn_id,
                "connection not registered, nothing to do"
            );
            return;
        };

        self.record_presence(&client, PresenceStatus::Leave).await;
        info!(
            room_id = %key.room_id,
            client_id = %key.client_id,
            user_id = %key.user_id,
            "client left"
        );

        let is_admin = client.role == Role::Admin;
        drop(client);

        if is_admin {
            info!(room_id = %key.room_id, "admin left, closing room");
            self.evict_room(key.room_id).await;
            if let Err(err) = self.call(self.store.delete_room(key.room_id)).await {
                warn!(room_id = %key.room_id, %err, "failed to delete room");
            }
        }
    }

    async fn evict(&mut self, evict: Evict) {
        match evict {
            Evict::Room(room_id) => self.evict_room(room_id).await,
            Evict::Member { room_id, user_id } => {
                let Some(client_id) = self.registry.find_by_user(room_id, &user_id) else {
                    return;
                };
                if let Some(client) = self.registry.remove_member(room_id, client_id) {
                    self.record_presence(&client, PresenceStatus::Leave).await;
                    info!(%room_id, %client_id, %user_id, "member removed");
                }
            }
        }
    }

    /// Drops the room's registry entry, closing every member's queue.
    async fn evict_room(&mut self, room_id: Uuid) {
        let Some(entry) = self.registry.remove_room(room_id) else {
            return;
        };
        for client in entry.into_members() {
            self.record_presence(&client, PresenceStatus::Leave).await;
            info!(%room_id, client_id = %client.client_id, "evicted");
        }
    }

    async fn broadcast(&mut self, msg: Message) {
        let room_id = msg.room_id;
        if let Err(err) = msg.validate() {
            warn!(%room_id, client_id = %msg.client_id, %err, "dropping message");
            return;
        }
        if let Err(err) = self.call(self.store.get_room(room_id)).await {
            warn!(%room_id, %err, "dropping message");
            return;
        }
        if !self.registry.contains_room(room_id) {
            warn!(%room_id, "dropping message for room with no live entry");
            return;
        }

        let msg = match self.call(self.store.append_message(msg)).await {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%room_id, %err, "failed to persist message");
                return;
            }
        };

        let mut gone = Vec::new();
        if let Some(members) = self.registry.members(room_id) {
            for client in members {
                if client.deliver(msg.clone()).await.is_err() {
                    gone.push(client.client_id);
                }
            }
        }
        debug!(%room_id, message_id = %msg.message_id, "delivered");

        for client_id in gone {
            if let Some(client) = self.registry.remove_member(room_id, client_id) {
                self.record_presence(&client, PresenceStatus::Leave).await;
                info!(%room_id, %client_id, "dropped client with closed queue");
            }
        }
    }

    async fn record_presence(&self, client: &Client, status: PresenceStatus) {
        let entry =
            PresenceLogEntry::now(client.client_id, client.room_id, &client.user_id, status);
        if let Err(err) = self.call(self.store.append_presence_log(entry)).await {
            warn!(
                client_id = %client.client_id,
                status = status.as_str(),
                %err,
                "failed to record presence"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{
        models::{ClientRecord, Room},
        store::MemoryStore,
    };

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn setup() -> (Arc<MemoryStore>, Hub, HubHandle, Room) {
        let store = Arc::new(MemoryStore::new());
        let room = store.create_room("general").await.unwrap();
        let (hub, handle) = Hub::new(store.clone(), TIMEOUT);
        (store, hub, handle, room)
    }

    async fn member(store: &MemoryStore, room: &Room, user: &str, role: Role) -> ClientRecord {
        store
            .create_membership(room.room_id, user, &user.to_uppercase(), role)
            .await
            .unwrap()
    }

    fn text(record: &ClientRecord, content: &str) -> Message {
        Message::draft(
            record.room_id,
            record.client_id,
            &record.user_id,
            &record.user_name,
            content.to_owned(),
        )
    }

    #[tokio::test]
    async fn test_register_and_unregister_track_membership() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let b = member(&store, &room, "b", Role::User).await;

        let (client_a, _rx_a) = Client::new(&a);
        let (client_a_again, mut rx_a_again) = Client::new(&a);
        let (client_b, mut rx_b) = Client::new(&b);
        let key_b = client_b.key();

        hub.register(client_a).await;
        hub.register(client_a_again).await;
        hub.register(client_b).await;
        let mut expected = vec![a.client_id, b.client_id];
        expected.sort();
        assert_eq!(hub.registry().member_ids(room.room_id), expected);

        // the duplicate registration was dropped, so its queue is closed
        assert!(rx_a_again.recv().await.is_none());

        hub.unregister(key_b.clone()).await;
        assert_eq!(hub.registry().member_ids(room.room_id), vec![a.client_id]);
        assert!(rx_b.recv().await.is_none());
        assert!(store.latest_leave_log("b", room.room_id).await.unwrap().is_some());

        // unregistering twice is a no-op
        hub.unregister(key_b).await;
        assert_eq!(hub.registry().member_ids(room.room_id), vec![a.client_id]);
    }

    #[tokio::test]
    async fn test_second_connection_leaving_keeps_the_first() {
        let (store, mut hub, _handle, room) = setup().await;
        let admin = member(&store, &room, "admin", Role::Admin).await;

        let (first, mut rx_first) = Client::new(&admin);
        let (second, mut rx_second) = Client::new(&admin);
        let (first_key, second_key) = (first.key(), second.key());
        hub.register(first).await;
        hub.register(second).await;
        assert!(rx_second.recv().await.is_none());

        hub.unregister(second_key).await;
        assert_eq!(hub.registry().member_ids(room.room_id), vec![admin.client_id]);
        assert!(store.get_room(room.room_id).await.is_ok());
        assert!(store.latest_leave_log("admin", room.room_id).await.unwrap().is_none());

        hub.broadcast(text(&admin, "still here")).await;
        assert_eq!(rx_first.try_recv().unwrap().content, "still here");

        hub.unregister(first_key).await;
        assert!(store.get_room(room.room_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_register_for_unknown_room_is_dropped() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        store.delete_room(room.room_id).await.unwrap();

        let (client, mut rx) = Client::new(&a);
        hub.register(client).await;

        assert!(!hub.registry().contains_room(room.room_id));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_delivers_once_to_every_member() {
        let (store, mut hub, _handle, room) = setup().await;
        let mut receivers = Vec::new();
        let mut records = Vec::new();
        for user in ["a", "b", "c"] {
            let record = member(&store, &room, user, Role::User).await;
            let (client, rx) = Client::new(&record);
            hub.register(client).await;
            receivers.push(rx);
            records.push(record);
        }

        hub.broadcast(text(&records[0], "hello")).await;

        let persisted = store.list_messages(room.room_id).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(!persisted[0].message_id.is_nil());
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), persisted[0]);
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_is_a_noop() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let (client, mut rx) = Client::new(&a);
        hub.register(client).await;

        let mut stray = text(&a, "anyone?");
        stray.room_id = Uuid::now_v7();
        hub.broadcast(stray.clone()).await;

        assert!(store.list_messages(stray.room_id).await.unwrap().is_empty());
        assert!(store.list_messages(room.room_id).await.unwrap().is_empty());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_broadcast_to_room_without_live_entry_is_dropped() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;

        hub.broadcast(text(&a, "hello")).await;
        assert!(store.list_messages(room.room_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_message_is_dropped() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let (client, mut rx) = Client::new(&a);
        hub.register(client).await;

        hub.broadcast(text(&a, "  ")).await;
        assert!(store.list_messages(room.room_id).await.unwrap().is_empty());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_admin_leaving_deletes_room_and_evicts_members() {
        let (store, mut hub, _handle, room) = setup().await;
        let admin = member(&store, &room, "admin", Role::Admin).await;
        let b = member(&store, &room, "b", Role::User).await;

        let (client_admin, _rx_admin) = Client::new(&admin);
        let key_admin = client_admin.key();
        let (client_b, mut rx_b) = Client::new(&b);
        hub.register(client_admin).await;
        hub.register(client_b).await;

        hub.unregister(key_admin).await;

        assert!(!hub.registry().contains_room(room.room_id));
        assert!(rx_b.recv().await.is_none());
        assert!(store.get_room(room.room_id).await.unwrap_err().is_not_found());
        assert!(store.get_membership("b", room.room_id).await.unwrap_err().is_not_found());
        assert!(store.latest_leave_log("b", room.room_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_member_and_room() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let b = member(&store, &room, "b", Role::User).await;
        let (client_a, mut rx_a) = Client::new(&a);
        let (client_b, mut rx_b) = Client::new(&b);
        hub.register(client_a).await;
        hub.register(client_b).await;

        hub.evict(Evict::Member { room_id: room.room_id, user_id: "a".into() }).await;
        assert!(rx_a.recv().await.is_none());
        assert_eq!(hub.registry().member_ids(room.room_id), vec![b.client_id]);

        hub.evict(Evict::Room(room.room_id)).await;
        assert!(rx_b.recv().await.is_none());
        assert!(!hub.registry().contains_room(room.room_id));
        // eviction leaves the durable room alone
        assert!(store.get_room(room.room_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_member_with_closed_queue_is_dropped_on_broadcast() {
        let (store, mut hub, _handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let b = member(&store, &room, "b", Role::User).await;
        let (client_a, mut rx_a) = Client::new(&a);
        let (client_b, rx_b) = Client::new(&b);
        hub.register(client_a).await;
        hub.register(client_b).await;
        drop(rx_b);

        hub.broadcast(text(&a, "hello")).await;

        assert_eq!(rx_a.try_recv().unwrap().content, "hello");
        assert_eq!(hub.registry().member_ids(room.room_id), vec![a.client_id]);
        assert!(store.latest_leave_log("b", room.room_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_loop_serves_handles_and_stops_when_they_drop() {
        let (store, hub, handle, room) = setup().await;
        let a = member(&store, &room, "a", Role::User).await;
        let task = tokio::spawn(hub.run());

        let (client, mut rx) = Client::new(&a);
        handle.register(client);
        handle.broadcast(text(&a, "ping")).await;

        let got = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.content, "ping");

        drop(handle);
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }
}
