//! Structured logging support using the `tracing` crate.
//!
//! The library itself logs through the `log` facade. Installing a
//! [`TracingLogger`] routes those records (via `tracing-subscriber`'s log
//! bridge) and any `tracing` events into one formatted, filterable stream.
//!
//! Only available with the `structured-logging` feature:
//!
//! ```toml
//! [dependencies]
//! tensorlogic-factorgraph = { version = "0.1", features = ["structured-logging"] }
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use tensorlogic_factorgraph::structured_logging::{LogFormat, LogLevel, TracingLogger};
//!
//! let _logger = TracingLogger::builder()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .build()
//!     .expect("Failed to initialize logger");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{FactorGraphError, Result};
use crate::parameter_estimation::TrainingReport;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format with colors.
    Pretty,
    /// Single-line format without colors.
    Compact,
    /// JSON, one object per event.
    Json,
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Everything, including per-chain Gibbs summaries.
    Trace,
    /// Per-iteration optimizer progress and higher.
    Debug,
    /// Training start and finish and higher.
    Info,
    /// Non-convergence and line search stalls.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for structured logging.
#[derive(Debug, Clone)]
pub struct TracingLoggerBuilder {
    format: LogFormat,
    level: LogLevel,
    env_filter: Option<String>,
    with_targets: bool,
    with_file_location: bool,
    with_thread_ids: bool,
}

impl Default for TracingLoggerBuilder {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: LogLevel::Info,
            env_filter: None,
            with_targets: true,
            with_file_location: false,
            with_thread_ids: false,
        }
    }
}

impl TracingLoggerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log level filter.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set a custom environment filter (overrides the level setting).
    ///
    /// ```
    /// # use tensorlogic_factorgraph::structured_logging::TracingLoggerBuilder;
    /// let builder = TracingLoggerBuilder::new()
    ///     .with_env_filter("tensorlogic_factorgraph=debug");
    /// ```
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Include target names (module paths).
    pub fn with_targets(mut self, enabled: bool) -> Self {
        self.with_targets = enabled;
        self
    }

    /// Include file:line locations.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.with_file_location = enabled;
        self
    }

    /// Include thread ids, useful when instances are evaluated in parallel.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Build and install the global subscriber.
    ///
    /// Only one subscriber can be installed per process; later calls fail.
    pub fn build(self) -> Result<TracingLogger> {
        let env_filter = match &self.env_filter {
            Some(custom) => EnvFilter::try_new(custom).map_err(|e| {
                FactorGraphError::InvalidParameter(format!("invalid env filter: {}", e))
            })?,
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
        };

        let layer = fmt::layer()
            .with_target(self.with_targets)
            .with_file(self.with_file_location)
            .with_line_number(self.with_file_location)
            .with_thread_ids(self.with_thread_ids);
        let registry = tracing_subscriber::registry().with(env_filter);

        let installed = match self.format {
            LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
            LogFormat::Compact => registry.with(layer.with_ansi(false).compact()).try_init(),
            LogFormat::Json => registry.with(layer.json()).try_init(),
        };
        installed.map_err(|e| {
            FactorGraphError::InvalidParameter(format!("failed to initialize tracing: {}", e))
        })?;

        Ok(TracingLogger {
            format: self.format,
        })
    }
}

/// Handle for an installed `tracing` subscriber.
#[derive(Debug)]
pub struct TracingLogger {
    format: LogFormat,
}

impl TracingLogger {
    /// Create a new logger builder.
    pub fn builder() -> TracingLoggerBuilder {
        TracingLoggerBuilder::new()
    }

    /// Install with default settings (pretty format, info level).
    pub fn init() -> Result<Self> {
        Self::builder().build()
    }

    /// Install for development (pretty format, debug level, file locations).
    pub fn init_development() -> Result<Self> {
        Self::builder()
            .with_format(LogFormat::Pretty)
            .with_level(LogLevel::Debug)
            .with_file_location(true)
            .build()
    }

    /// Output format of the installed subscriber.
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Emit a training report as one structured event.
pub fn record_report(report: &TrainingReport) {
    if report.converged {
        tracing::info!(
            iterations = report.iterations,
            objective = report.objective,
            gradient_norm = report.gradient_norm,
            "training converged"
        );
    } else {
        tracing::warn!(
            iterations = report.iterations,
            objective = report.objective,
            gradient_norm = report.gradient_norm,
            "training stopped before convergence"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_configuration() {
        let builder = TracingLoggerBuilder::new()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Debug)
            .with_targets(false)
            .with_file_location(true)
            .with_thread_ids(true);

        assert_eq!(builder.format, LogFormat::Json);
        assert_eq!(builder.level, LogLevel::Debug);
        assert!(!builder.with_targets);
        assert!(builder.with_file_location);
        assert!(builder.with_thread_ids);
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }

    #[test]
    fn test_invalid_env_filter_rejected() {
        let result = TracingLoggerBuilder::new()
            .with_env_filter("tensorlogic_factorgraph=verbose")
            .build();
        assert!(result.is_err());
    }
}
