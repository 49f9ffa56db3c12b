use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use roomhub::{
    config::Config,
    hub::Hub,
    store::{MemoryStore, Store},
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;

/// The full router over an in-memory store, with a running hub.
pub fn test_app() -> (Router, Arc<dyn Store>) {
    let config = Config::from_lookup(|_| None).unwrap();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let (hub, handle) = Hub::new(store.clone(), config.store_timeout);
    tokio::spawn(hub.run());

    let app = roomhub::app(AppState { store: store.clone(), hub: handle }, &config);
    (app, store)
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}
