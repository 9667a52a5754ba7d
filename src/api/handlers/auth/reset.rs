//! Credential reset endpoints.
//!
//! Reset is composition, not a new primitive: the request side reissues a
//! RESET-purpose verification code through the ledger, and the confirm side
//! consumes it then replaces the secret hash. If the replace step fails
//! after a successful consume, the code stays consumed and the caller must
//! request a fresh one — replaying the old code is never a recovery path.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::password::hash_secret;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    ConsumeOutcome, Purpose, ReissueOutcome, consume_verification_code,
    reissue_verification_code, replace_secret,
};
use super::types::{ResetConfirmRequest, ResetRequest};
use super::utils::{extract_client_ip, hash_code, normalize_email, valid_email, valid_password};

/// Request a credential reset code (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/reset",
    request_body = ResetRequest,
    responses(
        (status = 204, description = "Reset request accepted")
    ),
    tag = "auth"
)]
pub async fn reset_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetRequest>>,
) -> impl IntoResponse {
    let request: ResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Always return 204 for invalid emails to avoid account probing.
        return StatusCode::NO_CONTENT.into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Reset)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Reset)
            == RateLimitDecision::Limited
    {
        // Reset is intentionally opaque; rate limits still return 204.
        return StatusCode::NO_CONTENT.into_response();
    }

    // Only active accounts get reset codes; the response stays 204 either way.
    match reissue_verification_code(&pool, &email, Purpose::Reset, true, auth_state.config()).await
    {
        Ok(ReissueOutcome::Issued | ReissueOutcome::Cooldown | ReissueOutcome::Noop) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to issue reset code: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Consume a reset code and replace the stored secret.
#[utoipa::path(
    post,
    path = "/v1/auth/reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 204, description = "Secret replaced"),
        (status = 400, description = "Invalid, expired, or already used code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_confirm(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetConfirmRequest>>,
) -> impl IntoResponse {
    let request: ResetConfirmRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()),
    };

    let code = request.code.trim();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string());
    }

    if !valid_password(&request.password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string());
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Reset)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string());
    }

    // Hash the replacement first: once the code is consumed there is no
    // replay, so everything that can fail cheaply must fail before consume.
    let secret_hash = match hash_secret(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash secret: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset failed".to_string(),
            );
        }
    };

    let code_hash = hash_code(code);
    let user_email = match consume_verification_code(&pool, &code_hash, Purpose::Reset).await {
        Ok(ConsumeOutcome::Consumed { user_email }) => user_email,
        Ok(ConsumeOutcome::InvalidCode) => {
            return (StatusCode::BAD_REQUEST, "Invalid code".to_string());
        }
        Ok(ConsumeOutcome::Expired) => {
            return (StatusCode::BAD_REQUEST, "Code expired".to_string());
        }
        Ok(ConsumeOutcome::AlreadyConsumed) => {
            return (StatusCode::BAD_REQUEST, "Code already used".to_string());
        }
        Err(err) => {
            error!("Failed to consume reset code: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset failed".to_string(),
            );
        }
    };

    match replace_secret(&pool, &user_email, &secret_hash).await {
        Ok(true) => (StatusCode::NO_CONTENT, String::new()),
        Ok(false) => {
            // Code was bound to a user that no longer exists; the code is
            // spent and a fresh reset request is required.
            error!("Reset code consumed for missing user");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset failed; request a new code".to_string(),
            )
        }
        Err(err) => {
            error!("Failed to replace secret: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset failed; request a new code".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::super::{NoopRateLimiter, rate_limit::RateLimiter};
    use super::{ResetConfirmRequest, ResetRequest, reset_confirm, reset_request};
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
    async fn reset_request_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_request(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_request_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_request(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResetRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn reset_confirm_empty_code() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_confirm(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResetConfirmRequest {
                code: "  ".to_string(),
                password: "new-password".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_confirm_weak_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_confirm(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResetConfirmRequest {
                code: "some-code".to_string(),
                password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
