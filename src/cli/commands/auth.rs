use anyhow::{Context, Result};
use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_code_args(command);
    with_outbox_args(command)
}

fn with_code_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for verification and reset links")
                .env("PORTERO_FRONTEND_BASE_URL")
                .default_value("https://portero.dev"),
        )
        .arg(
            Arg::new("activation-code-ttl-seconds")
                .long("activation-code-ttl-seconds")
                .help("Activation verification code TTL in seconds")
                .env("PORTERO_ACTIVATION_CODE_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("reset-code-ttl-seconds")
                .long("reset-code-ttl-seconds")
                .help("Credential reset code TTL in seconds")
                .env("PORTERO_RESET_CODE_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("auth-code-ttl-seconds")
                .long("auth-code-ttl-seconds")
                .help("Authorization code TTL in seconds")
                .env("PORTERO_AUTH_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token TTL in seconds")
                .env("PORTERO_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("resend-cooldown-seconds")
                .long("resend-cooldown-seconds")
                .help("Cooldown before reissuing a verification or reset code")
                .env("PORTERO_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("notify-outbox-poll-seconds")
                .long("notify-outbox-poll-seconds")
                .help("Notification outbox poll interval in seconds")
                .env("PORTERO_NOTIFY_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("notify-outbox-batch-size")
                .long("notify-outbox-batch-size")
                .help("Notification outbox batch size per poll")
                .env("PORTERO_NOTIFY_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("notify-outbox-max-attempts")
                .long("notify-outbox-max-attempts")
                .help("Max attempts before marking a notification as failed")
                .env("PORTERO_NOTIFY_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("notify-outbox-backoff-base-seconds")
                .long("notify-outbox-backoff-base-seconds")
                .help("Base delay for notification retry backoff")
                .env("PORTERO_NOTIFY_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("notify-outbox-backoff-max-seconds")
                .long("notify-outbox-backoff-max-seconds")
                .help("Max delay for notification retry backoff")
                .env("PORTERO_NOTIFY_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub activation_code_ttl_seconds: i64,
    pub reset_code_ttl_seconds: i64,
    pub auth_code_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub outbox: OutboxOptions,
}

impl Options {
    /// Collect auth/outbox options from parsed CLI matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is unexpectedly absent.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let frontend_base_url = matches
            .get_one::<String>("frontend-base-url")
            .cloned()
            .context("missing required argument: --frontend-base-url")?;

        Ok(Self {
            frontend_base_url,
            activation_code_ttl_seconds: get_i64(matches, "activation-code-ttl-seconds")?,
            reset_code_ttl_seconds: get_i64(matches, "reset-code-ttl-seconds")?,
            auth_code_ttl_seconds: get_i64(matches, "auth-code-ttl-seconds")?,
            access_token_ttl_seconds: get_i64(matches, "access-token-ttl-seconds")?,
            resend_cooldown_seconds: get_i64(matches, "resend-cooldown-seconds")?,
            outbox: OutboxOptions {
                poll_seconds: get_u64(matches, "notify-outbox-poll-seconds")?,
                batch_size: matches
                    .get_one::<usize>("notify-outbox-batch-size")
                    .copied()
                    .context("missing required argument: --notify-outbox-batch-size")?,
                max_attempts: matches
                    .get_one::<u32>("notify-outbox-max-attempts")
                    .copied()
                    .context("missing required argument: --notify-outbox-max-attempts")?,
                backoff_base_seconds: get_u64(matches, "notify-outbox-backoff-base-seconds")?,
                backoff_max_seconds: get_u64(matches, "notify-outbox-backoff-max-seconds")?,
            },
        })
    }
}

fn get_i64(matches: &clap::ArgMatches, name: &str) -> Result<i64> {
    matches
        .get_one::<i64>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

fn get_u64(matches: &clap::ArgMatches, name: &str) -> Result<u64> {
    matches
        .get_one::<u64>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    fn matches_for(args: Vec<&str>) -> clap::ArgMatches {
        with_args(Command::new("test")).get_matches_from(args)
    }

    #[test]
    fn options_pick_up_defaults() {
        let vars: Vec<(&str, Option<&str>)> = vec![
            ("PORTERO_FRONTEND_BASE_URL", None),
            ("PORTERO_ACTIVATION_CODE_TTL_SECONDS", None),
            ("PORTERO_RESET_CODE_TTL_SECONDS", None),
            ("PORTERO_AUTH_CODE_TTL_SECONDS", None),
            ("PORTERO_ACCESS_TOKEN_TTL_SECONDS", None),
            ("PORTERO_RESEND_COOLDOWN_SECONDS", None),
        ];
        temp_env::with_vars(vars, || {
            let matches = matches_for(vec!["test"]);
            let options = Options::parse(&matches).expect("options should parse");
            assert_eq!(options.frontend_base_url, "https://portero.dev");
            assert_eq!(options.activation_code_ttl_seconds, 1800);
            assert_eq!(options.reset_code_ttl_seconds, 1800);
            assert_eq!(options.auth_code_ttl_seconds, 300);
            assert_eq!(options.access_token_ttl_seconds, 43200);
            assert_eq!(options.resend_cooldown_seconds, 60);
            assert_eq!(options.outbox.poll_seconds, 5);
            assert_eq!(options.outbox.batch_size, 10);
            assert_eq!(options.outbox.max_attempts, 5);
        });
    }

    #[test]
    fn options_pick_up_overrides() {
        let matches = matches_for(vec![
            "test",
            "--frontend-base-url",
            "https://accounts.example.com",
            "--auth-code-ttl-seconds",
            "120",
            "--notify-outbox-batch-size",
            "25",
        ]);
        let options = Options::parse(&matches).expect("options should parse");
        assert_eq!(options.frontend_base_url, "https://accounts.example.com");
        assert_eq!(options.auth_code_ttl_seconds, 120);
        assert_eq!(options.outbox.batch_size, 25);
    }
}
