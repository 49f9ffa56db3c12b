use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::{
    hub::{Evict, HubHandle},
    models::{ClientRecord, Role},
    store::{Store, StoreError},
    AppResult,
};

#[derive(Debug, Deserialize)]
pub(crate) struct AddMemberRequest {
    user_id: String,
    user_name: String,
}

pub(crate) fn require_user_id(user_id: &str) -> Result<(), StoreError> {
    if user_id.trim().is_empty() {
        return Err(StoreError::Invalid("user_id is empty".to_owned()));
    }
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn add_member(
    Path(room_id): Path<Uuid>,
    State(store): State<Arc<dyn Store>>,
    Json(AddMemberRequest { user_id, user_name }): Json<AddMemberRequest>,
) -> AppResult<Json<ClientRecord>> {
    require_user_id(&user_id)?;
    let record = store.create_membership(room_id, &user_id, &user_name, Role::User).await?;
    info!(%room_id, %user_id, "member added");
    Ok(Json(record))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_members(
    Path(room_id): Path<Uuid>,
    State(store): State<Arc<dyn Store>>,
) -> AppResult<Json<Vec<ClientRecord>>> {
    store.get_room(room_id).await?;
    Ok(Json(store.list_room_members(room_id).await?))
}

/// Drops a membership. Removing the admin removes the room.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn remove_member(
    Path((room_id, user_id)): Path<(Uuid, String)>,
    State(store): State<Arc<dyn Store>>,
    State(hub): State<HubHandle>,
) -> AppResult<Json<Value>> {
    let record = store.get_membership(&user_id, room_id).await?;
    store.delete_membership(&user_id, room_id).await?;

    if record.role == Role::Admin {
        store.delete_room(room_id).await?;
        hub.evict(Evict::Room(room_id));
        info!(%room_id, %user_id, "admin removed, room deleted");
    } else {
        hub.evict(Evict::Member { room_id, user_id: user_id.clone() });
        info!(%room_id, %user_id, "member removed");
    }

    Ok(Json(json!({ "status": "success" })))
}
