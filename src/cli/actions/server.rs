use crate::api;
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub activation_code_ttl_seconds: i64,
    pub reset_code_ttl_seconds: i64,
    pub auth_code_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub notify_outbox_poll_seconds: u64,
    pub notify_outbox_batch_size: usize,
    pub notify_outbox_max_attempts: u32,
    pub notify_outbox_backoff_base_seconds: u64,
    pub notify_outbox_backoff_max_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = api::handlers::auth::AuthConfig::new(args.frontend_base_url)
        .with_activation_code_ttl_seconds(args.activation_code_ttl_seconds)
        .with_reset_code_ttl_seconds(args.reset_code_ttl_seconds)
        .with_auth_code_ttl_seconds(args.auth_code_ttl_seconds)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_resend_cooldown_seconds(args.resend_cooldown_seconds);

    let notify_config = api::notify::NotifyWorkerConfig::new()
        .with_poll_interval_seconds(args.notify_outbox_poll_seconds)
        .with_batch_size(args.notify_outbox_batch_size)
        .with_max_attempts(args.notify_outbox_max_attempts)
        .with_backoff_base_seconds(args.notify_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.notify_outbox_backoff_max_seconds);

    api::new(args.port, args.dsn, auth_config, notify_config).await
}
