use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("PORTERO_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    #[test]
    fn log_level_names_parse() {
        let command = with_args(Command::new("test"));
        for (name, expected) in [
            ("error", 0u8),
            ("warn", 1),
            ("info", 2),
            ("debug", 3),
            ("trace", 4),
        ] {
            let matches = temp_env::with_var("PORTERO_LOG_LEVEL", Some(name), || {
                command.clone().get_matches_from(vec!["test"])
            });
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(expected));
        }
    }

    #[test]
    fn invalid_log_level_rejected() {
        let command = with_args(Command::new("test"));
        let result = temp_env::with_var("PORTERO_LOG_LEVEL", Some("noisy"), || {
            command.clone().try_get_matches_from(vec!["test"])
        });
        assert!(result.is_err());
    }
}
