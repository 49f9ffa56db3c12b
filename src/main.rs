use std::{sync::Arc, time::Duration};

use anyhow::Context;
use roomhub::{config::Config, hub::Hub, store::{SqliteStore, Store}, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomhub=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let store: Arc<dyn Store> = Arc::new(store);

    let (hub, handle) = Hub::new(store.clone(), config.store_timeout);
    let hub_task = tokio::spawn(hub.run());

    let app = roomhub::app(AppState { store, hub: handle }, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Open sockets may still hold hub handles, so don't wait on the hub forever.
    if tokio::time::timeout(Duration::from_secs(5), hub_task).await.is_err() {
        tracing::warn!("hub still busy at shutdown");
    }
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for ctrl-c");
    }
}
