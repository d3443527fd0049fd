use crate::{handlers::{diagnostics, health_check, ready_check}, routes::auth_middleware::auth_middleware, state::AppState};
use axum::{routing::get, Router, middleware};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
        .with_state(state)
}
