pub mod api;
pub mod auth_middleware;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::state::AppState;
use crate::ws::handler::websocket_handler;

/// Build the full application router
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let ws_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state.clone());

    Router::new()
        // Mount API routes
        .nest("/api", api::create_api_routes(state))
        .merge(ws_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.frontend_url {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([Method::GET])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
            Err(e) => {
                warn!("Ignoring invalid FRONTEND_URL '{}': {}", origin, e);
                CorsLayer::new()
            }
        },
        None if config.is_development() => CorsLayer::permissive(),
        None => CorsLayer::new(),
    }
}
