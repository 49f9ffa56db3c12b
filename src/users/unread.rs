use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};
use serde_json::{json, Value};

use crate::{models::RoomWithUnread, store::Store, unread, AppResult};

/// Rooms the user belongs to, each with its unread count.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn rooms(
    Path(user_id): Path<String>,
    State(store): State<Arc<dyn Store>>,
) -> AppResult<Json<Vec<RoomWithUnread>>> {
    Ok(Json(unread::rooms_with_unread(store.as_ref(), &user_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn all_unread(
    Path(user_id): Path<String>,
    State(store): State<Arc<dyn Store>>,
) -> AppResult<Json<Value>> {
    let total = unread::count_all_unread(store.as_ref(), &user_id).await?;
    Ok(Json(json!({ "unread_message": total })))
}
