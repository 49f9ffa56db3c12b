pub mod appresult;
pub mod config;
pub mod connection;
pub mod hub;
pub mod models;
pub mod rooms;
pub mod store;
pub mod unread;
pub mod users;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub use appresult::{AppError, AppResult};
use crate::{config::Config, hub::HubHandle, store::Store};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: HubHandle,
}

pub fn app(state: AppState, config: &Config) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(config.cors_origins.clone()))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/health", get(health))
        .nest("/r", rooms::router())
        .nest("/u", users::router())
        .with_state(state)
        .layer(TimeoutLayer::new(config.store_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
