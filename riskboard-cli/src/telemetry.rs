//! Log subscriber for the CLI; results go to stdout, logs to stderr

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid --log-level '{value}': {source}")]
    Filter {
        value: String,
        #[source]
        source: ParseError,
    },

    #[error("log subscriber already installed: {0}")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Build the filter; `RUST_LOG` wins over `log_level`
fn build_filter(log_level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(log_level).map_err(|source| TelemetryError::Filter {
        value: log_level.to_string(),
        source,
    })
}

/// Install the stderr subscriber
pub fn init(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Install)
}
