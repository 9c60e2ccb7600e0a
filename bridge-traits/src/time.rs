//! Time and Logging Abstractions
//!
//! Injectable time source (due dates and run timestamps depend on "now") and a
//! sink for mirroring structured logs into a host logger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Time source trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn due_in_days(clock: &dyn Clock, days: i64) -> chrono::DateTime<chrono::Utc> {
///     clock.now() + chrono::Duration::days(days)
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp in seconds
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant, for deterministic tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Freeze the clock at a Unix timestamp (seconds). Out-of-range values
    /// fall back to the epoch.
    pub fn at_unix(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Structured log entry handed to a [`LoggerSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Emitting module (`tracing` target)
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Name of the innermost active span, if any
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Logger sink trait
///
/// Receives every `tracing` event that passes the subscriber filter, e.g. to
/// surface sync progress inside the host application's own log window.
/// Implementations must not log the Notion integration token.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Minimum level this sink wants to receive
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        assert!(clock.unix_timestamp() > 0);
    }

    #[test]
    fn test_fixed_clock_is_frozen() {
        let clock = FixedClock::at_unix(1_700_000_000);
        assert_eq!(clock.unix_timestamp(), 1_700_000_000);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Warn, "core_sync", "Numeric coercion failed")
            .with_field("property", "Interval")
            .with_span("execute_run");

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.target, "core_sync");
        assert_eq!(entry.fields.get("property"), Some(&"Interval".to_string()));
        assert_eq!(entry.span, Some("execute_run".to_string()));
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Info);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }
}
