mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod db;
mod error;
mod services;
mod state;
mod ws;

use config::Config;
use db::dbnotes::PgStore;
use routes::create_app;
use services::auth_service::JwtIdentityResolver;
use state::AppState;
use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ws::dispatcher::SessionDispatcher;
use ws::registry::RoomRegistry;

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "notes_collab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    if config.jwt_secret.is_none() {
        warn!("No JWT secret configured - all socket connections will be refused");
    }

    // Connect to the database
    let Some(db_url) = config.db_url.as_deref() else {
        error!("No database URL configured (DB_URL)");
        std::process::exit(1);
    };
    let store = match PgStore::connect(db_url, config.db_max_connections).await {
        Ok(store) => {
            info!("Database initialized successfully");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    // Wire up the session engine
    let registry = Arc::new(RoomRegistry::new(store.clone()));
    let identities = Arc::new(JwtIdentityResolver::new(
        config.jwt_secret.clone(),
        store.clone(),
        Duration::from_secs(config.identity_cache_ttl_secs),
    ));
    let dispatcher = Arc::new(SessionDispatcher::new(
        registry,
        identities,
        store.clone(),
        store,
    ));

    let address = config.server_address();
    let state = AppState {
        config: Arc::new(config),
        dispatcher,
    };
    let app = create_app(state);

    // Start the HTTP/WebSocket server
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
    }
}
