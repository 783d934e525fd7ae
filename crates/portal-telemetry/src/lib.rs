//! # portal-telemetry
//!
//! Structured logging for the chat engine: JSON lines on stderr filtered by
//! `RUST_LOG`, plus an optional SQLite sink that keeps warn+ events for
//! later inspection.

#![deny(unsafe_code)]

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. `RUST_LOG` wins when set.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `portal_gateway` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: home_fallback().join(".portal/database/logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Build from the textual level used in settings files. Unknown levels
    /// fall back to INFO.
    pub fn from_parts(level: &str, log_to_sqlite: bool, log_db_path: impl Into<PathBuf>) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            log_to_sqlite,
            log_db_path: log_db_path.into(),
        }
    }

    fn filter_directive(&self) -> String {
        let mut directive = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        directive
    }
}

/// Keeps the SQLite sink alive for queries after init.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let sink = if config.log_to_sqlite {
        match SqliteLogSink::open(&config.log_db_path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("portal-telemetry: cannot open log db {:?}: {e}", config.log_db_path);
                None
            }
        }
    } else {
        None
    };
    let sqlite_layer = sink.clone().map(SqliteLogLayer::new);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    TelemetryGuard { log_sink: sink }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_module_levels() {
        let mut config = TelemetryConfig::from_parts("warn", false, "/tmp/unused.db");
        config
            .module_levels
            .push(("portal_gateway".into(), Level::DEBUG));
        assert_eq!(config.filter_directive(), "warn,portal_gateway=debug");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let config = TelemetryConfig::from_parts("chatty", true, "/tmp/unused.db");
        assert_eq!(config.log_level, Level::INFO);
    }
}
