use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter directive for the harness crate. `debug` overrides the configured
/// level.
pub fn filter_directive(config: &LoggingConfig, debug: bool) -> String {
    let level = if debug { "debug" } else { config.level.as_str() };
    format!("review_harness={}", level)
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config, debug)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install JSON logger: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
    }
}
