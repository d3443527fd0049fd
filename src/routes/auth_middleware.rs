use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use crate::services::auth_service::get_auth_token;
use crate::state::AppState;

/// Resolve the bearer token of an API request and attach the identity to
/// the request extensions for downstream handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the auth token from the request
    let token = match get_auth_token(req.headers(), None) {
        Ok(token) => token,
        Err(e) => {
            warn!("Rejected API request: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 2. Resolve it to an identity
    let identity = match state.dispatcher.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected API request: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    info!("API request authenticated for {}", identity.email);

    // 3. Pass it on
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
