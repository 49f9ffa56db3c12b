//! Unread counts, computed from the presence log.
//!
//! A user's unread messages in a room are the ones created at or after their
//! most recent "leave". A user who never left sees every message as unread.

use uuid::Uuid;

use crate::{
    models::RoomWithUnread,
    store::{Store, StoreResult},
};

pub async fn count_unread(store: &dyn Store, user_id: &str, room_id: Uuid) -> StoreResult<u64> {
    let since = store
        .latest_leave_log(user_id, room_id)
        .await?
        .map(|entry| entry.created_at);
    store.count_messages_since(room_id, since).await
}

/// Sum of [`count_unread`] over every room the user is a member of.
pub async fn count_all_unread(store: &dyn Store, user_id: &str) -> StoreResult<u64> {
    let mut total = 0;
    for membership in store.list_memberships(user_id).await? {
        total += count_unread(store, user_id, membership.room_id).await?;
    }
    Ok(total)
}

pub async fn rooms_with_unread(
    store: &dyn Store,
    user_id: &str,
) -> StoreResult<Vec<RoomWithUnread>> {
    let mut rooms = Vec::new();
    for membership in store.list_memberships(user_id).await? {
        let room = store.get_room(membership.room_id).await?;
        let unread_message = count_unread(store, user_id, room.room_id).await?;
        rooms.push(RoomWithUnread { room, unread_message });
    }
    Ok(rooms)
}
