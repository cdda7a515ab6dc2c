//! # Structured Logging Module
//!
//! Structured logging for reconmap built on the `tracing` ecosystem, with
//! configurable levels, console or JSON output and rotated log files.
//!
//! The library only emits `tracing` events; the binary installs the
//! subscriber through [`init_logging`].
//!
//! ## Features
//!
//! - Configurable log levels (trace, debug, info, warn, error)
//! - Console output on stderr, plain or JSON
//! - Daily rotated log files through `tracing_appender`
//! - Environment-based configuration (`RECONMAP_LOG_*`)
//! - Scan and module spans shared by the orchestrator
//!
//! ## Example
//!
//! ```rust,no_run
//! use reconmap::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env()?;
//! let _guards = init_logging(&config)?;
//!
//! tracing::info!("reconmap started");
//! # Ok::<(), reconmap::error::ReconError>(())
//! ```

use crate::aggregator::ScanResult;
use crate::error::{ReconError, Result};
use crate::module::{ModuleOutcome, ModuleStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for structured logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output to the console (stderr)
    pub console: bool,
    /// Whether to output in JSON format
    pub json: bool,
    /// Log file path (optional); its directory receives the rotated files
    pub file_path: Option<PathBuf>,
    /// Number of rotated log files to keep
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            console: true,
            json: false,
            file_path: None,
            max_files: 5,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("RECONMAP_LOG_LEVEL") {
            config.level = level.to_lowercase();
        }

        if let Ok(console) = std::env::var("RECONMAP_LOG_CONSOLE") {
            config.console = console
                .parse::<bool>()
                .map_err(|_| ReconError::config("Invalid RECONMAP_LOG_CONSOLE value"))?;
        }

        if let Ok(json) = std::env::var("RECONMAP_LOG_JSON") {
            config.json = json
                .parse::<bool>()
                .map_err(|_| ReconError::config("Invalid RECONMAP_LOG_JSON value"))?;
        }

        if let Ok(file_path) = std::env::var("RECONMAP_LOG_FILE") {
            config.file_path = Some(PathBuf::from(file_path));
        }

        if let Ok(max_files) = std::env::var("RECONMAP_LOG_MAX_FILES") {
            config.max_files = max_files
                .parse::<usize>()
                .map_err(|_| ReconError::config("Invalid RECONMAP_LOG_MAX_FILES value"))?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ReconError::config(format!(
                "Invalid log level '{}'. Valid levels: {}",
                self.level,
                valid_levels.join(", ")
            )));
        }

        if self.max_files == 0 {
            return Err(ReconError::config("Max files must be greater than 0"));
        }

        Ok(())
    }
}

/// Initialize structured logging with the given configuration
///
/// `RUST_LOG` overrides the configured level when set. Returns the file
/// writer guards, which must stay alive for the duration of the program.
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>> {
    config.validate()?;

    let mut guards = Vec::new();
    let mut layers = Vec::new();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.console {
        let console_layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed()
        };
        layers.push(console_layer.with_filter(env_filter.clone()));
    }

    if let Some(file_path) = &config.file_path {
        let directory = file_path.parent().unwrap_or_else(|| Path::new("."));
        let prefix = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("reconmap");
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(directory)
            .map_err(|e| ReconError::config(format!("Failed to create log appender: {}", e)))?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);

        let file_layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed()
        };
        layers.push(file_layer.with_filter(env_filter));
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ReconError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(
        level = %config.level,
        console = config.console,
        json = config.json,
        file_path = ?config.file_path,
        "Logging initialized"
    );

    Ok(guards)
}

/// Create a span covering one scan
pub fn scan_span(target: &str, module_count: usize) -> tracing::Span {
    tracing::info_span!(
        "scan",
        target = %target,
        module_count = module_count,
        start_time = %chrono::Utc::now().to_rfc3339()
    )
}

/// Create a span covering one module invocation
pub fn module_span(module_id: &str) -> tracing::Span {
    tracing::info_span!("module", module = %module_id)
}

/// Log the terminal state of one module
pub fn log_module_outcome(outcome: &ModuleOutcome) {
    let module = outcome.module_id();
    let duration_ms = outcome.duration_ms();
    match outcome.status() {
        ModuleStatus::Success => tracing::info!(
            module = %module,
            duration_ms = duration_ms,
            cached = outcome.is_cached(),
            "Module succeeded"
        ),
        ModuleStatus::Partial => tracing::warn!(
            module = %module,
            duration_ms = duration_ms,
            detail = outcome.error_detail().unwrap_or_default(),
            "Module returned partial results"
        ),
        ModuleStatus::Error => tracing::warn!(
            module = %module,
            duration_ms = duration_ms,
            detail = outcome.error_detail().unwrap_or_default(),
            "Module failed"
        ),
        ModuleStatus::Timeout => tracing::warn!(
            module = %module,
            duration_ms = duration_ms,
            detail = outcome.error_detail().unwrap_or_default(),
            "Module timed out"
        ),
        ModuleStatus::Skipped => tracing::debug!(module = %module, "Module skipped"),
    }
}

/// Log scan completion
pub fn log_scan_completion(result: &ScanResult) {
    let summary = result.summary();
    tracing::info!(
        target = %result.target(),
        status = %result.status(),
        duration_ms = result.duration().as_millis() as u64,
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        skipped = summary.skipped,
        cached = summary.cached,
        "Scan completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "warn");
        assert!(config.console);
        assert!(!config.json);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_log_config_validation() {
        let mut config = LogConfig::default();
        assert!(config.validate().is_ok());

        config.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.level = "info".to_string();
        config.max_files = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_config_from_env() {
        env::set_var("RECONMAP_LOG_LEVEL", "DEBUG");
        env::set_var("RECONMAP_LOG_CONSOLE", "false");
        env::set_var("RECONMAP_LOG_JSON", "true");

        let config = LogConfig::from_env().unwrap();
        assert_eq!(config.level, "debug");
        assert!(!config.console);
        assert!(config.json);

        env::set_var("RECONMAP_LOG_JSON", "yes");
        assert!(LogConfig::from_env().is_err());

        env::remove_var("RECONMAP_LOG_LEVEL");
        env::remove_var("RECONMAP_LOG_CONSOLE");
        env::remove_var("RECONMAP_LOG_JSON");
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = module_span("dns_resolve");
        let _entered = span.enter();
        let scan = scan_span("example.com", 2);
        drop(scan);
    }
}
