//! # chirp-server
//!
//! Messaging fan-out and delivery server.
//!
//! This binary provides:
//! - **Conversation and message stores** backed by SQLite (direct pairs,
//!   groups, message requests, reactions, receipts, soft deletes, edits)
//! - **Permission evaluation** against each recipient's messaging privacy
//!   settings and the social graph
//! - **Fan-out dispatch**: one send becomes a persisted message, a
//!   conversation pointer update, best-effort notification records, and
//!   live events to every connected participant
//! - **Presence registry + websocket live channel** for push delivery,
//!   with a pull-based catch-up read as the correctness fallback
//! - **Ghost-message expiry** via lazy read filters plus a background
//!   sweep

mod api;
mod auth;
mod config;
mod dispatch;
mod error;
mod graph;
mod media;
mod permissions;
mod posts;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chirp_live::PresenceRegistry;
use chirp_store::Database;

use crate::api::AppState;
use crate::auth::BearerResolver;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::graph::InMemorySocialGraph;
use crate::media::DiskMediaStore;
use crate::posts::InMemoryPostReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chirp_server=debug")),
        )
        .init();

    info!("Starting Chirp messaging server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let database = match config.db_path {
        Some(ref path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(database));

    // Media store (creates directory if missing)
    let media = Arc::new(
        DiskMediaStore::new(config.media_storage_path.clone(), config.max_media_size).await?,
    );

    // Presence registry: constructed here, cleared when the process exits.
    let registry = PresenceRegistry::new();

    // Standalone-mode collaborators. A deployment wiring in the real
    // profile and feed subsystems swaps these for remote-backed
    // implementations of the same traits.
    let graph = Arc::new(InMemorySocialGraph::new());
    let posts = Arc::new(InMemoryPostReader::new());

    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        registry,
        graph,
        posts,
        media,
    ));

    let app_state = AppState {
        dispatcher,
        resolver: Arc::new(BearerResolver),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Ghost-message sweep. Failures are logged and retried on the next
    // cycle; reads filter expired ghosts regardless.
    let sweep_db = db.clone();
    let sweep_interval = config.ghost_sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            let db = sweep_db.lock().await;
            match db.expire_ghosts(chrono::Utc::now()) {
                Ok(0) => {}
                Ok(reclaimed) => info!(reclaimed, "expired ghost messages"),
                Err(e) => tracing::warn!(error = %e, "ghost sweep failed; will retry"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WS server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
