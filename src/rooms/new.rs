use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{models::{ClientRecord, Role, Room}, store::Store, AppResult};

use super::members::require_user_id;

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomRequest {
    name: String,
    user_id: String,
    user_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RenameRoomRequest {
    name: String,
}

/// Creates the room and makes the creator its admin.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(store): State<Arc<dyn Store>>,
    Json(NewRoomRequest { name, user_id, user_name }): Json<NewRoomRequest>,
) -> AppResult<Json<ClientRecord>> {
    require_user_id(&user_id)?;
    let room = store.create_room(&name).await?;

    let created = store
        .create_membership(room.room_id, &user_id, &user_name, Role::Admin)
        .await;
    let admin = match created {
        Ok(admin) => admin,
        Err(err) => {
            store.delete_room(room.room_id).await?;
            return Err(err.into());
        }
    };

    info!(room_id = %room.room_id, %user_id, "room created");
    Ok(Json(admin))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn rename_room(
    Path(room_id): Path<Uuid>,
    State(store): State<Arc<dyn Store>>,
    Json(RenameRoomRequest { name }): Json<RenameRoomRequest>,
) -> AppResult<Json<Room>> {
    Ok(Json(store.rename_room(room_id, &name).await?))
}
