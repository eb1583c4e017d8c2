//! Logging setup shared by every command.
//!
//! - `RUST_LOG`: standard tracing filter (e.g. `info`, `elt_core=debug`)
//! - `ELT_LOG_LEVEL`: fallback level when `RUST_LOG` is unset (default `info`)
//! - `ELT_LOG_FORMAT`: `pretty` (default), `compact`, or `json`
//!
//! CI runners get `compact`; `json` is for shipping logs somewhere that parses them.

use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub default_level: String,
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_level: "info".to_string(),
            include_target: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            format: env::var("ELT_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            default_level: env::var("ELT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            include_target: false,
        }
    }

    /// `-v` bumps the fallback level; `RUST_LOG` still wins.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        match verbose {
            0 => {}
            1 => self.default_level = "debug".into(),
            _ => {
                self.default_level = "trace".into();
                self.include_target = true;
            }
        }
        self
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(config: LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays pipeable.
    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(config.include_target),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(config.include_target),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats_leniently() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" compact "), LogFormat::Compact);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn verbosity_raises_fallback_level() {
        assert_eq!(LogConfig::default().with_verbosity(0).default_level, "info");
        assert_eq!(LogConfig::default().with_verbosity(1).default_level, "debug");
        let trace = LogConfig::default().with_verbosity(3);
        assert_eq!(trace.default_level, "trace");
        assert!(trace.include_target);
    }
}
