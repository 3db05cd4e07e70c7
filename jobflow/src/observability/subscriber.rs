use crate::config::LogConfig;
use crate::errors::JobflowError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` if set, otherwise the configured level.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, JobflowError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| JobflowError::Config(format!("invalid log level {:?}: {e}", config.level)))
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the level directive does not parse or a global
/// subscriber has already been set.
pub fn init_tracing(config: &LogConfig) -> Result<(), JobflowError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| JobflowError::Config(format!("tracing already initialized: {e}")))
}
