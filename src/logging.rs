//! Tracing subscriber setup shared by the binaries

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` directives apply on top of the configured level for `target`.
pub fn init(config: &LoggingConfig, target: &str) -> Result<()> {
    let filter =
        EnvFilter::from_default_env().add_directive(format!("{target}={}", config.level).parse()?);

    match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        "pretty" => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}
