//! Token issuance and validation endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    ConsumeOutcome, consume_auth_code, insert_access_token, lookup_access_token,
    revoke_access_token,
};
use super::types::{AuthorizationResponse, TokenRequest, TokenResponse};
use super::utils::{extract_bearer_token, extract_client_ip, hash_code};

/// Exchange a single-use authorization code for a bearer access token.
///
/// The consume step is a conditional update, so two racing exchanges of the
/// same code mint exactly one token; the loser gets a definitive failure
/// and the code is never re-minted.
#[utoipa::path(
    post,
    path = "/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Access token minted", body = TokenResponse),
        (status = 400, description = "Invalid, expired, or already used code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TokenRequest>>,
) -> impl IntoResponse {
    let request: TokenRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let code = request.authorization_code.trim();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TokenExchange)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let code_hash = hash_code(code);
    let user_email = match consume_auth_code(&pool, &code_hash).await {
        Ok(ConsumeOutcome::Consumed { user_email }) => user_email,
        Ok(ConsumeOutcome::InvalidCode) => {
            return (StatusCode::BAD_REQUEST, "Invalid code".to_string()).into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            return (StatusCode::BAD_REQUEST, "Code expired".to_string()).into_response();
        }
        Ok(ConsumeOutcome::AlreadyConsumed) => {
            return (StatusCode::BAD_REQUEST, "Code already used".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume authorization code: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token exchange failed".to_string(),
            )
                .into_response();
        }
    };

    // The code is consumed at this point; a minting failure requires a
    // fresh login rather than replaying the same code.
    match insert_access_token(&pool, &user_email, auth_state.config()).await {
        Ok(access_token) => {
            let response = TokenResponse {
                access_token,
                token_type: "Bearer".to_string(),
                expires_in: auth_state.config().access_token_ttl_seconds(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!("Failed to mint access token: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token exchange failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Validate a bearer access token and return its bound identity.
#[utoipa::path(
    get,
    path = "/v1/auth/authorization",
    responses(
        (status = 200, description = "Token is valid", body = AuthorizationResponse),
        (status = 401, description = "Missing, expired, or revoked token", body = String)
    ),
    tag = "auth"
)]
pub async fn authorization(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing token".to_string()).into_response();
    };

    let token_hash = hash_code(&token);
    match lookup_access_token(&pool, &token_hash).await {
        Ok(Some(email)) => (StatusCode::OK, Json(AuthorizationResponse { email })).into_response(),
        Ok(None) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()).into_response(),
        Err(err) => {
            error!("Failed to lookup access token: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Validation failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Revoke the presented access token. Idempotent; always 204.
#[utoipa::path(
    post,
    path = "/v1/auth/revoke",
    responses(
        (status = 204, description = "Token revoked (or was already invalid)")
    ),
    tag = "auth"
)]
pub async fn revoke(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    if let Some(token) = extract_bearer_token(&headers) {
        let token_hash = hash_code(&token);
        if let Err(err) = revoke_access_token(&pool, &token_hash).await {
            error!("Failed to revoke access token: {err}");
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::super::{NoopRateLimiter, rate_limit::RateLimiter};
    use super::{TokenRequest, authorization, token};
    use anyhow::Result;
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://portero.dev".to_string());
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        Arc::new(AuthState::new(config, limiter))
    }

    #[tokio::test]
    async fn token_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = token(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn token_empty_code() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = token(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(TokenRequest {
                authorization_code: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn authorization_missing_bearer() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = authorization(HeaderMap::new(), Extension(pool))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
