//! # Logging Bootstrap
//!
//! Configures `tracing-subscriber` for the core: an `EnvFilter` (explicit
//! filter string, else `RUST_LOG`, else `info`) and a selectable output
//! format.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(LoggingConfig::default().with_format(LogFormat::Json))?;
//! tracing::info!("core started");
//! ```

use crate::error::{Result, RuntimeError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    Pretty,
    /// Single-line, suited to terminals.
    Compact,
    /// Structured JSON for machine ingestion.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Compact;
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directives, e.g. `"core_sync=debug,sqlx=warn"`. Falls back
    /// to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Install the global tracing subscriber. Errors if one is already set or
/// the filter string does not parse.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = match &config.filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| RuntimeError::Logging(format!("bad filter '{directives}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_string_is_rejected() {
        let result = init_logging(LoggingConfig::default().with_filter("=== nonsense ==="));
        assert!(matches!(result, Err(RuntimeError::Logging(_))));
    }
}
