//! # parley-server
//!
//! Realtime messaging service for client/lawyer conversations.
//!
//! This binary provides:
//! - **REST API** (axum) for durable sends, conversation history, the
//!   conversation list with unread counts, and mark-as-read
//! - **WebSocket gateway** feeding a single-task **event router** that fans
//!   chat and typing events out to every joined device of the receiver
//! - **SQLite message store** with an in-memory conversation index
//! - **Per-IP and per-connection rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod gateway;
mod persistence;
mod presence;
mod rate_limit;
mod router;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::{Database, MessageStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::persistence::SharedStore;
use crate::rate_limit::RateLimiter;
use crate::router::EventRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    let database = Database::open_at(&db_path)?;
    info!(path = %db_path.display(), "Message store opened");

    let store = SharedStore::new(
        MessageStore::new(database).with_max_chars(config.max_message_chars),
    );

    let router = EventRouter::spawn(config.router_config());

    let rate_limiter = RateLimiter::new(config.http_rate_per_sec, config.http_burst);

    let app_state = AppState {
        store,
        router,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, evict buckets idle for more than 10 minutes.
    rate_limiter.spawn_janitor(Duration::from_secs(300), Duration::from_secs(600));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until Ctrl+C
    // -----------------------------------------------------------------------
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    if let Err(e) = api::serve(app_state, config.http_addr, shutdown).await {
        tracing::error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    info!("Server stopped");
    Ok(())
}
