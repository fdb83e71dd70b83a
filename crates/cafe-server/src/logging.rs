//! Logging initialization
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr, human-readable or as JSON lines.
//!
//! ```rust,no_run
//! use cafe_server::LoggingConfig;
//!
//! LoggingConfig::new("info").json(true).init()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::ServerConfig;

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl LoggingConfig {
    /// Human-readable output at `level`
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            structured: false,
        }
    }

    /// Toggle JSON output
    #[must_use]
    pub fn json(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    /// Logging settings from the server configuration
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self::new(&config.log_level).json(config.log_json)
    }

    /// Install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already set.
    pub fn init(&self) -> io::Result<()> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let subscriber = tracing_subscriber::registry().with(filter);

        if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        } else {
            subscriber
                .with(fmt::layer().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_server_config() {
        let config = ServerConfig {
            log_level: "debug".into(),
            log_json: true,
            ..ServerConfig::default()
        };
        assert_eq!(
            LoggingConfig::from_server_config(&config),
            LoggingConfig {
                level: "debug".into(),
                structured: true,
            }
        );
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever test installs first wins; the second attempt must error
        let _ = LoggingConfig::default().init();
        assert!(LoggingConfig::default().init().is_err());
    }
}
