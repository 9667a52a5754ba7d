//! Login endpoint: credentials in, authorization code out.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::password::verify_secret;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{insert_auth_code, lookup_credentials};
use super::types::{LoginRequest, LoginResponse};
use super::utils::{extract_client_ip, normalize_email, valid_email};

/// Authenticate and issue a short-lived, single-use authorization code.
///
/// Unknown users, wrong secrets, and inactive accounts all collapse into
/// the same 401 so the response cannot be used to probe account state.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authorization code issued", body = LoginResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let record = match lookup_credentials(&pool, &email).await {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to lookup credentials: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed".to_string(),
            )
                .into_response();
        }
    };

    // Inactive accounts must not authenticate; this gate is mandatory.
    let authenticated = match record {
        Some(record) if record.active => {
            match verify_secret(&request.password, &record.secret_hash) {
                Ok(matched) => matched,
                Err(err) => {
                    error!("Failed to verify secret: {err}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Login failed".to_string(),
                    )
                        .into_response();
                }
            }
        }
        _ => false,
    };

    if !authenticated {
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid credentials".to_string(),
        )
            .into_response();
    }

    match insert_auth_code(&pool, &email, auth_state.config()).await {
        Ok(code) => {
            let response = LoginResponse {
                authorization_code: code,
                expires_in: auth_state.config().auth_code_ttl_seconds(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!("Failed to issue authorization code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::super::{NoopRateLimiter, rate_limit::RateLimiter};
    use super::{LoginRequest, login};
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
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "not-an-email".to_string(),
                password: "hunter22".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
