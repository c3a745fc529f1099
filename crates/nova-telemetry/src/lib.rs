//! Nova Telemetry - logging for gateway and worker processes.
//!
//! Every log line produced while a task or session is in scope carries
//! `job_id`/`session_id` fields, attached at call sites. User-message
//! content (PII) is only ever logged at DEBUG.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{setup_logging, LogConfig, LogFormat};

mod error {
    use thiserror::Error;

    /// Telemetry errors.
    #[derive(Debug, Error)]
    pub enum TelemetryError {
        /// The log filter directive did not parse.
        #[error("invalid log filter: {0}")]
        InvalidFilter(String),

        /// A global subscriber is already installed.
        #[error("logging initialization failed: {0}")]
        Init(String),
    }

    /// Result alias for telemetry operations.
    pub type TelemetryResult<T> = Result<T, TelemetryError>;
}

mod logging {
    use tracing_subscriber::EnvFilter;

    use crate::error::{TelemetryError, TelemetryResult};

    /// Output format for log lines.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum LogFormat {
        /// Human-readable, for interactive use.
        #[default]
        Pretty,
        /// One JSON object per line, for shipping.
        Json,
    }

    /// Logging configuration.
    #[derive(Debug, Clone)]
    pub struct LogConfig {
        /// Base level filter, e.g. `info` or `nova_worker=debug`.
        pub level: String,
        /// Output format.
        pub format: LogFormat,
    }

    impl LogConfig {
        /// Create a config with the given base level.
        #[must_use]
        pub fn new(level: impl Into<String>) -> Self {
            Self {
                level: level.into(),
                format: LogFormat::default(),
            }
        }

        /// Select the output format.
        #[must_use]
        pub fn with_format(mut self, format: LogFormat) -> Self {
            self.format = format;
            self
        }

        fn filter(&self) -> TelemetryResult<EnvFilter> {
            // RUST_LOG wins over the configured level when set.
            if std::env::var("RUST_LOG").is_ok() {
                return EnvFilter::try_from_default_env()
                    .map_err(|e| TelemetryError::InvalidFilter(e.to_string()));
            }
            EnvFilter::try_new(&self.level)
                .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] for a malformed directive
    /// and [`TelemetryError::Init`] when a subscriber is already installed.
    pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
        let filter = config.filter()?;
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match config.format {
            LogFormat::Pretty => builder
                .try_init()
                .map_err(|e| TelemetryError::Init(e.to_string())),
            LogFormat::Json => builder
                .json()
                .try_init()
                .map_err(|e| TelemetryError::Init(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_pretty() {
        let config = LogConfig::new("info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn format_is_selectable() {
        let config = LogConfig::new("debug").with_format(LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
    }
}
