//! Logging setup built on `tracing-subscriber`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{RendererError, Result};

/// Initializes a minimal stderr logger filtered by `RUST_LOG` (default "info").
///
/// Used before the configuration is loaded and from tests. Errors from an
/// already-installed global subscriber are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn level_from_config(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid => Err(RendererError::Logging(format!("Invalid log level in config: {}", invalid))),
    }
}

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = level_from_config(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let installed = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| RendererError::Logging(e.to_string()))?;
    tracing::debug!("Logging initialized: level={}, format={}", config.level, config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_case_insensitive() {
        assert_eq!(level_from_config("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(level_from_config("warn").unwrap(), Level::WARN);
        assert!(matches!(level_from_config("verbose"), Err(RendererError::Logging(_))));
    }

    #[test]
    fn invalid_level_is_rejected_before_installing() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            format: "text".to_string(),
        };
        assert!(init_logging(&config).is_err());
    }
}
