// Copyright (c) 2025 Cascoin Trust Developers

//! Tracing setup for the trust engine binary.
//!
//! The level comes from the `[logging]` config section and can be raised to
//! DEBUG with `--verbose`. A `RUST_LOG` environment variable overrides both:
//!
//! ```toml
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Resolve the configured level, with `verbose` forcing DEBUG.
pub fn resolve_level(config: &LoggingConfig, verbose: bool) -> Result<Level> {
    if verbose {
        return Ok(Level::DEBUG);
    }
    config
        .level
        .parse::<Level>()
        .map_err(|_| anyhow!("Unknown log level '{}'", config.level))
}

/// Initialize the tracing subscriber.
///
/// # Arguments
///
/// * `config` - Logging configuration
/// * `verbose` - Whether to enable debug-level logging
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = resolve_level(config, verbose)?;

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!(level = %level, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_level_from_config() {
        let config = LoggingConfig {
            level: "warn".to_string(),
        };
        assert_eq!(resolve_level(&config, false).unwrap(), Level::WARN);
        assert_eq!(resolve_level(&config, true).unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_resolve_level_rejects_unknown() {
        let config = LoggingConfig {
            level: "loud".to_string(),
        };
        assert!(resolve_level(&config, false).is_err());
        // Verbose wins even over a bad config value
        assert!(resolve_level(&config, true).is_ok());
    }

    #[test]
    fn test_default_level_is_info() {
        let level = resolve_level(&LoggingConfig::default(), false).unwrap();
        assert_eq!(level, Level::INFO);
    }
}
