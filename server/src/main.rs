mod api;
mod config;
mod db;
mod events;
mod websocket;

use std::sync::Arc;

use axum::Router;
use healthpatch_bridge::{ReadingHistory, Session, SimulatedTransport};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, RwLock};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub session: Arc<Session<SimulatedTransport>>,
    /// Recent readings for statistics
    pub history: RwLock<ReadingHistory>,
    /// Broadcast channel for UI updates
    pub ui_broadcast: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> Arc<Self> {
        let (ui_broadcast, _) = broadcast::channel(100);
        let session = Session::new(Arc::new(SimulatedTransport::new()));
        Arc::new(Self {
            db,
            history: RwLock::new(ReadingHistory::with_capacity(config.history_capacity)),
            config,
            session,
            ui_broadcast,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::router())
        .nest("/ws", websocket::router())
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "healthpatch_server=debug,healthpatch_bridge=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    // Connect to database
    let db = db::connect(&config.database_url).await?;

    // Run migrations
    db::migrate(&db).await?;

    // Create shared state
    let state = AppState::new(db, config.clone());

    // Persist readings and fan session events out to UI clients
    events::spawn_recorder(state.clone());

    if config.auto_connect {
        if let Err(e) = state.session.connect(config.session.clone()).await {
            tracing::warn!("Reader auto-connect failed: {}", e);
        }
    }

    let app = build_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Health patch server listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session.disconnect().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
