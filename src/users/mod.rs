mod unread;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{user_id}/rooms", get(unread::rooms))
        .route("/{user_id}/unread", get(unread::all_unread))
}
