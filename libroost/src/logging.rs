//! Centralized logging configuration for the roost binaries
//!
//! Supports text and JSON output to stderr, configured through
//! `ROOST_LOG_FORMAT` and `ROOST_LOG_LEVEL` (or `RUST_LOG`).

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json",
                s
            )),
        }
    }
}

/// Initialize logging for a binary.
///
/// # Panics
///
/// Panics if a subscriber was already installed.
pub fn init(format: LogFormat, level: &str, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_target(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}

/// Initialize logging with defaults from the environment.
///
/// Respects `ROOST_LOG_FORMAT` and `ROOST_LOG_LEVEL`; falls back to text
/// output at info level.
pub fn init_default(verbose: bool) {
    let format = std::env::var("ROOST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);

    let level = std::env::var("ROOST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    init(format, &level, verbose);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("pretty-rainbow".parse::<LogFormat>().is_err());
    }
}
