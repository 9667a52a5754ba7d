//! Auth state and TTL configuration.

use std::sync::Arc;

use super::rate_limit::RateLimiter;

const DEFAULT_ACTIVATION_CODE_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_CODE_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_AUTH_CODE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    activation_code_ttl_seconds: i64,
    reset_code_ttl_seconds: i64,
    auth_code_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            activation_code_ttl_seconds: DEFAULT_ACTIVATION_CODE_TTL_SECONDS,
            reset_code_ttl_seconds: DEFAULT_RESET_CODE_TTL_SECONDS,
            auth_code_ttl_seconds: DEFAULT_AUTH_CODE_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
        }
    }

    #[must_use]
    pub fn with_activation_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.activation_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_auth_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.auth_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn activation_code_ttl_seconds(&self) -> i64 {
        self.activation_code_ttl_seconds
    }

    pub(super) fn reset_code_ttl_seconds(&self) -> i64 {
        self.reset_code_ttl_seconds
    }

    pub(super) fn auth_code_ttl_seconds(&self) -> i64 {
        self.auth_code_ttl_seconds
    }

    pub(super) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
