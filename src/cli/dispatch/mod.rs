//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        activation_code_ttl_seconds: auth_opts.activation_code_ttl_seconds,
        reset_code_ttl_seconds: auth_opts.reset_code_ttl_seconds,
        auth_code_ttl_seconds: auth_opts.auth_code_ttl_seconds,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        resend_cooldown_seconds: auth_opts.resend_cooldown_seconds,
        notify_outbox_poll_seconds: auth_opts.outbox.poll_seconds,
        notify_outbox_batch_size: auth_opts.outbox.batch_size,
        notify_outbox_max_attempts: auth_opts.outbox.max_attempts,
        notify_outbox_backoff_base_seconds: auth_opts.outbox.backoff_base_seconds,
        notify_outbox_backoff_max_seconds: auth_opts.outbox.backoff_max_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn handler_builds_server_action() {
        temp_env::with_vars(
            [
                ("PORTERO_DSN", Some("postgres://localhost:5432/portero")),
                ("PORTERO_PORT", None),
                ("PORTERO_FRONTEND_BASE_URL", None),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["portero"]);
                let action = handler(&matches).expect("handler should build the action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://localhost:5432/portero");
                assert_eq!(args.frontend_base_url, "https://portero.dev");
                assert_eq!(args.auth_code_ttl_seconds, 300);
            },
        );
    }
}
