//! Gated signup endpoint.

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
use super::storage::{SignupOutcome, create_user_with_activation};
use super::types::SignupRequest;
use super::utils::{extract_client_ip, normalize_email, valid_email, valid_password};

/// Create an inactive user for a whitelisted email and send the activation code.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created, activation code sent"),
        (status = 400, description = "Validation error", body = String),
        (status = 403, description = "Email is not whitelisted", body = String),
        (status = 409, description = "User already exists", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string());
    }

    if !valid_password(&request.password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string());
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Signup)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string());
    }

    // Hash before touching the store so a failed insert never holds a raw secret.
    let secret_hash = match hash_secret(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash secret: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signup failed".to_string(),
            );
        }
    };

    match create_user_with_activation(&pool, &email, &secret_hash, auth_state.config()).await {
        Ok(SignupOutcome::Created) => (StatusCode::CREATED, "User created".to_string()),
        Ok(SignupOutcome::NotEligible) => {
            (StatusCode::FORBIDDEN, "Email is not whitelisted".to_string())
        }
        Ok(SignupOutcome::Conflict) => {
            (StatusCode::CONFLICT, "User already exists".to_string())
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signup failed".to_string(),
            )
        }
    }
}
