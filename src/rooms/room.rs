use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};
use uuid::Uuid;

use crate::{models::Message, store::Store, AppResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    Path(room_id): Path<Uuid>,
    State(store): State<Arc<dyn Store>>,
) -> AppResult<Json<Vec<Message>>> {
    store.get_room(room_id).await?;
    Ok(Json(store.list_messages(room_id).await?))
}
