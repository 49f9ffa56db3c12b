use std::collections::HashMap;

use uuid::Uuid;

use super::client::{Client, ClientKey};

#[derive(Debug)]
pub struct RoomEntry {
    pub room_id: Uuid,
    pub name: String,
    members: HashMap<Uuid, Client>,
}

impl RoomEntry {
    pub fn members(&self) -> impl Iterator<Item = &Client> {
        self.members.values()
    }

    pub fn into_members(self) -> impl Iterator<Item = Client> {
        self.members.into_values()
    }
}

/// Rooms that currently have a live entry, and who is connected to them.
///
/// Owned by the hub task and never shared.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<Uuid, RoomEntry>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&mut self, room_id: Uuid, name: &str) -> &mut RoomEntry {
        self.rooms.entry(room_id).or_insert_with(|| RoomEntry {
            room_id,
            name: name.to_owned(),
            members: HashMap::new(),
        })
    }

    pub fn contains_room(&self, room_id: Uuid) -> bool {
        self.rooms.contains_key(&room_id)
    }

    pub fn is_member(&self, room_id: Uuid, client_id: Uuid) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|room| room.members.contains_key(&client_id))
    }

    pub fn members(&self, room_id: Uuid) -> Option<impl Iterator<Item = &Client>> {
        self.rooms.get(&room_id).map(|room| room.members())
    }

    pub fn member_ids(&self, room_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .members(room_id)
            .map(|members| members.map(|c| c.client_id).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Adds the client to its room's entry, creating the entry if needed.
    /// Returns the client back if it is already a member.
    pub fn add_member(&mut self, client: Client, room_name: &str) -> Result<(), Client> {
        let room = self.ensure(client.room_id, room_name);
        if room.members.contains_key(&client.client_id) {
            return Err(client);
        }
        room.members.insert(client.client_id, client);
        Ok(())
    }

    pub fn remove_member(&mut self, room_id: Uuid, client_id: Uuid) -> Option<Client> {
        self.rooms.get_mut(&room_id)?.members.remove(&client_id)
    }

    /// Removes the member only if it is still the connection `key` names.
    /// A stale key from a socket that never made it in, or one that was
    /// already replaced, leaves the registered client alone.
    pub fn remove_connection(&mut self, key: &ClientKey) -> Option<Client> {
        let members = &mut self.rooms.get_mut(&key.room_id)?.members;
        if members.get(&key.client_id)?.conn_id != key.conn_id {
            return None;
        }
        members.remove(&key.client_id)
    }

    pub fn find_by_user(&self, room_id: Uuid, user_id: &str) -> Option<Uuid> {
        self.members(room_id)?
            .find(|c| c.user_id == user_id)
            .map(|c| c.client_id)
    }

    pub fn remove_room(&mut self, room_id: Uuid) -> Option<RoomEntry> {
        self.rooms.remove(&room_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use time::OffsetDateTime;

    use super::*;
    use crate::models::{ClientRecord, Role};

    fn client(room_id: Uuid, user: &str) -> Client {
        let now = OffsetDateTime::now_utc();
        let record = ClientRecord {
            client_id: Uuid::now_v7(),
            room_id,
            user_id: user.to_owned(),
            user_name: user.to_uppercase(),
            role: Role::User,
            created_at: now,
            updated_at: now,
        };
        Client::new(&record).0
    }

    fn same(client: &Client) -> Client {
        let now = OffsetDateTime::now_utc();
        Client::new(&ClientRecord {
            client_id: client.client_id,
            room_id: client.room_id,
            user_id: client.user_id.clone(),
            user_name: client.user_name.clone(),
            role: client.role,
            created_at: now,
            updated_at: now,
        })
        .0
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let room = Uuid::now_v7();
        let mut registry = RoomRegistry::new();
        let a = client(room, "a");
        let b = client(room, "b");
        let c = client(room, "c");
        let (ida, idb, idc) = (a.client_id, b.client_id, c.client_id);

        let again = same(&a);
        registry.add_member(a, "r").unwrap();
        assert!(registry.add_member(again, "r").is_err());
        registry.add_member(b, "r").unwrap();
        registry.add_member(c, "r").unwrap();
        assert!(registry.remove_member(room, idb).is_some());
        assert!(registry.remove_member(room, idb).is_none());

        let expected: BTreeSet<_> = [ida, idc].into_iter().collect();
        let actual: BTreeSet<_> = registry.member_ids(room).into_iter().collect();
        assert_eq!(actual, expected);
        assert!(registry.is_member(room, idc));
        assert!(!registry.is_member(room, idb));
    }

    #[test]
    fn stale_connection_keys_do_not_remove_the_live_client() {
        let room = Uuid::now_v7();
        let mut registry = RoomRegistry::new();
        let live = client(room, "a");
        let second_tab = same(&live);
        let (live_key, stale_key) = (live.key(), second_tab.key());
        assert_ne!(live_key.conn_id, stale_key.conn_id);

        registry.add_member(live, "r").unwrap();
        assert!(registry.add_member(second_tab, "r").is_err());

        assert!(registry.remove_connection(&stale_key).is_none());
        assert!(registry.is_member(room, live_key.client_id));

        assert!(registry.remove_connection(&live_key).is_some());
        assert!(!registry.is_member(room, live_key.client_id));
    }

    #[test]
    fn entries_are_created_lazily_and_removed_explicitly() {
        let room = Uuid::now_v7();
        let mut registry = RoomRegistry::new();
        assert!(!registry.contains_room(room));
        assert!(registry.members(room).is_none());

        registry.ensure(room, "general");
        assert!(registry.contains_room(room));
        assert!(registry.member_ids(room).is_empty());

        let a = client(room, "a");
        registry.add_member(a, "ignored").unwrap();
        assert!(registry.find_by_user(room, "a").is_some());

        let entry = registry.remove_room(room).unwrap();
        assert_eq!(entry.name, "general");
        assert_eq!(entry.into_members().count(), 1);
        assert!(!registry.contains_room(room));
    }
}
