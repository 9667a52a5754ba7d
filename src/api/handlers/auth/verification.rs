//! Activation code endpoints.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    ConsumeOutcome, Purpose, ReissueOutcome, activate_user, consume_verification_code,
    reissue_verification_code,
};
use super::types::{ResendVerificationRequest, VerifyRequest};
use super::utils::{extract_client_ip, hash_code, normalize_email, valid_email};

/// Consume an activation code and flip the user active.
///
/// Consumption and activation are separate atomic statements: a code whose
/// activation step fails stays consumed, and the user must request a fresh
/// one via resend.
async fn consume_and_activate(
    pool: &PgPool,
    auth_state: &AuthState,
    headers: &HeaderMap,
    code: &str,
) -> (StatusCode, String) {
    let code = code.trim();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string());
    }

    let client_ip = extract_client_ip(headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyCode)
        == RateLimitDecision::Limited
    {
        // Rate limits are enforced before any code work to avoid amplification.
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string());
    }

    // Hash the code before lookup; raw codes are never stored server-side.
    let code_hash = hash_code(code);
    match consume_verification_code(pool, &code_hash, Purpose::Activation).await {
        Ok(ConsumeOutcome::Consumed { user_email }) => {
            if let Err(err) = activate_user(pool, &user_email).await {
                error!("Failed to activate user: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Verification failed".to_string(),
                );
            }
            (StatusCode::NO_CONTENT, String::new())
        }
        Ok(ConsumeOutcome::InvalidCode) => {
            (StatusCode::BAD_REQUEST, "Invalid code".to_string())
        }
        Ok(ConsumeOutcome::Expired) => (StatusCode::BAD_REQUEST, "Code expired".to_string()),
        Ok(ConsumeOutcome::AlreadyConsumed) => {
            (StatusCode::BAD_REQUEST, "Code already used".to_string())
        }
        Err(err) => {
            error!("Failed to verify code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
        }
    }
}

/// Verify an activation code from a JSON body.
#[utoipa::path(
    post,
    path = "/v1/auth/verify",
    request_body = VerifyRequest,
    responses(
        (status = 204, description = "User activated"),
        (status = 400, description = "Invalid, expired, or already used code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyRequest>>,
) -> impl IntoResponse {
    let request: VerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()),
    };

    consume_and_activate(&pool, &auth_state, &headers, &request.code).await
}

/// Verify an activation code from an emailed link.
#[utoipa::path(
    get,
    path = "/v1/auth/verify/{code}",
    params(
        ("code" = String, Path, description = "Activation code from the email link")
    ),
    responses(
        (status = 204, description = "User activated"),
        (status = 400, description = "Invalid, expired, or already used code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_link(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    consume_and_activate(&pool, &auth_state, &headers, &code).await
}

/// Resend an activation code (always returns 204 to avoid user enumeration).
///
/// A resent code invalidates the previous one; only the latest code in the
/// inbox is consumable.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
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
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ResendVerification)
            == RateLimitDecision::Limited
    {
        // Resend is intentionally opaque; rate limits still return 204.
        return StatusCode::NO_CONTENT.into_response();
    }

    match reissue_verification_code(&pool, &email, Purpose::Activation, false, auth_state.config())
        .await
    {
        Ok(ReissueOutcome::Issued | ReissueOutcome::Cooldown | ReissueOutcome::Noop) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to reissue activation code: {err}");
            // Avoid leaking failures; always return 204 to callers.
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::super::{NoopRateLimiter, rate_limit::RateLimiter};
    use super::{VerifyRequest, resend_verification, verify};
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
    async fn verify_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_empty_code() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(VerifyRequest {
                code: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
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
    async fn resend_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::ResendVerificationRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }
}
