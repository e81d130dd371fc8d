//! Logging infrastructure for mlsdk
//!
//! The library never installs a subscriber or changes global log levels.
//! Components receive a [`LogHandle`] at construction instead; binaries call
//! [`init`] once to write logs to `~/.local/state/mlsdk/mlsdk.log`.

use std::path::PathBuf;

use tracing::Span;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// File name of the rotated log, inside [`Config::state_dir`]
pub const LOG_FILE_NAME: &str = "mlsdk.log";

/// Install the file subscriber for a binary
///
/// Lines go to a daily-rotated [`LOG_FILE_NAME`] in the state directory.
/// `RUST_LOG` takes precedence over the configured level. Hold the returned
/// guard until exit; buffered lines are lost when it drops early.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let dir = Config::state_dir();
    std::fs::create_dir_all(&dir)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(path = %dir.join(LOG_FILE_NAME).display(), level = %config.level, "Logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", level, e)))
}

/// Stdout subscriber for tests; safe to call repeatedly
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mlsdk_core=debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Flushes the non-blocking writer on drop
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Path of the current log file
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

/// Logging handle injected into each component
///
/// Carries the component's span and whether verbose per-message events are
/// wanted. Children inherit the debug flag and nest their span under the
/// parent's.
#[derive(Debug, Clone)]
pub struct LogHandle {
    span: Span,
    debug: bool,
}

impl LogHandle {
    /// Root handle for a client
    pub fn new(debug: bool) -> Self {
        Self {
            span: tracing::info_span!("mlsdk"),
            debug,
        }
    }

    /// Handle that emits nothing beyond warnings
    pub fn quiet() -> Self {
        Self::new(false)
    }

    /// Child handle for a session
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "session", session_id = %session_id),
            debug: self.debug,
        }
    }

    /// Child handle for a named component (transport, worker)
    pub fn for_component(&self, component: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", name = component),
            debug: self.debug,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Whether verbose per-message events should be emitted
    pub fn is_debug(&self) -> bool {
        self.debug
    }
}
