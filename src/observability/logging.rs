//! Structured logging setup.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber with the given level and
/// format. `RUST_LOG` takes precedence over the level flag when set.
pub fn init_tracing(level: &str, format: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level specified")?;

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?,
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?,
        other => anyhow::bail!("invalid log format specified: {other}"),
    }

    Ok(())
}
