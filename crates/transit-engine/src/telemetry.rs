//! Structured logging setup.

use tracing_subscriber::EnvFilter;
use transit_core::config::LoggingConfig;

/// Build the log filter: `RUST_LOG` wins, then the configured level,
/// then `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_unset| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_invalid| EnvFilter::new("info"))
}

/// Install the global subscriber. Plain text by default, JSON lines when
/// `logging.json` is set.
pub fn init(config: &LoggingConfig) {
    let filter = env_filter(config);
    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_level_falls_back_to_info() {
        let config = LoggingConfig {
            level: String::from("transit=loud"),
            json: false,
        };
        // RUST_LOG may be set in CI; only assert when it is not.
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "info");
        }
    }

    #[test]
    fn configured_level_is_used() {
        let config = LoggingConfig {
            level: String::from("transit_core=debug"),
            json: true,
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "transit_core=debug");
        }
    }
}
