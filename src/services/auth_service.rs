use axum::http::{header, HeaderMap};
use futures_util::future::BoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::db::UserDirectory;
use crate::error::AuthError;
use crate::models::Identity;

pub const AUTH_COOKIE: &str = "auth_token";

/// Maps a connection credential to an identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>>;

    /// Number of identities currently cached, for diagnostics.
    fn cached(&self) -> u64 {
        0
    }
}

// Get the auth token from the upgrade request
pub fn get_auth_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidToken("invalid Authorization header".to_string()))?;
        let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    // 2. Try the query string, browsers cannot set headers on websockets
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    // 3. Try to get token from cookies
    if let Some(cookie_header) = headers.get(header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| AuthError::InvalidToken("invalid Cookie header".to_string()))?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == AUTH_COOKIE {
                return Ok(c.value().to_string());
            }
        }
    }

    Err(AuthError::MissingCredential)
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Resolves HS256 bearer tokens to users, caching the user lookup.
pub struct JwtIdentityResolver {
    secret: Option<String>,
    users: Arc<dyn UserDirectory>,
    cache: Cache<String, Identity>,
}

impl JwtIdentityResolver {
    pub fn new(secret: Option<String>, users: Arc<dyn UserDirectory>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(cache_ttl)
            .build();
        info!("Identity cache initialized");
        Self {
            secret,
            users,
            cache,
        }
    }

    async fn resolve_token(&self, token: &str) -> Result<Identity, AuthError> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            error!("JWT secret not configured");
            AuthError::NotConfigured
        })?;

        let token_data = validate_jwt(token, secret).map_err(|e| {
            info!("JWT validation failed: {}", e);
            AuthError::InvalidToken(e.to_string())
        })?;

        let user_id = token_data
            .claims
            .get("id")
            .or_else(|| token_data.claims.get("sub"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::InvalidToken("token has no subject".to_string()))?
            .to_string();

        if let Some(identity) = self.cache.get(&user_id).await {
            return Ok(identity);
        }

        info!("Identity cache miss for user {}. Loading from directory.", user_id);
        let identity = self
            .users
            .find_user(&user_id)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        self.cache.insert(user_id, identity.clone()).await;
        Ok(identity)
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>> {
        Box::pin(self.resolve_token(credential))
    }

    fn cached(&self) -> u64 {
        self.cache.entry_count()
    }
}
