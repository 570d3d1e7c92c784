//! Logging service

use crate::models::LogLevel;
use tracing_subscriber::EnvFilter;

/// Build the env filter for a log level.
///
/// `RUST_LOG`, when set, takes precedence.
pub fn log_filter(level: LogLevel) -> EnvFilter {
    let level = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gdprq_core={level},gdprq={level}")))
}

/// Initialize logging with the specified level
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_writer(std::io::stderr)
        .try_init()
}

/// Log a queue lifecycle event
pub fn log_queue_event(event_type: &str, queue: &str, details: Option<&str>) {
    tracing::info!(
        event_type = event_type,
        queue = queue,
        details = details.unwrap_or(""),
        "Queue event"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let _ = init_logging(LogLevel::Debug);
        });
    }

    #[test]
    fn test_logging_initialization_is_repeatable() {
        init_test_logging();
        // A second global subscriber is refused, not a panic
        assert!(init_logging(LogLevel::Info).is_err());
    }

    #[test]
    fn test_log_queue_event() {
        init_test_logging();
        log_queue_event("redirect", "downloadProfile", Some("https://example.com"));
    }
}
