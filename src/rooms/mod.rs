mod members;
mod new;
mod room;
mod ws;

use axum::{routing::{delete, get, post, put}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/{room_id}/name", put(new::rename_room))
        .route("/{room_id}/messages", get(room::messages))
        .route("/{room_id}/members", get(members::list_members).post(members::add_member))
        .route("/{room_id}/members/{user_id}", delete(members::remove_member))
        .route("/{room_id}/ws/{user_id}", get(ws::room_ws))
}
