//! Structured logging configuration.

use code_runner_core::config::LoggingConfig;
use code_runner_core::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to the configured directive.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| config.filter.clone());
    EnvFilter::try_new(&directive)
        .map_err(|e| Error::internal(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Install the global subscriber: plain text for terminals, JSON lines
/// when `logging.json` is set. Logs go to stderr so stdout stays free for
/// command output.
pub fn configure_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_filter() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            filter: "code_runner=loud".into(),
            json: false,
        };
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter(&LoggingConfig::default()).is_ok());
    }
}
