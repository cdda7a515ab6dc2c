//! # Error Handling
//!
//! Scan-level error taxonomy for reconmap. These errors are returned
//! synchronously, before any module runs, when a scan cannot start, plus the
//! ambient configuration and I/O failures of the surrounding tooling.
//!
//! Module-level failures never appear here: they are recorded as data inside
//! a [`ScanResult`](crate::aggregator::ScanResult) (see
//! [`ModuleError`](crate::module::ModuleError)).
//!
//! ## Example
//!
//! ```rust
//! use reconmap::error::{ReconError, Result};
//!
//! fn require_modules(ids: &[&str]) -> Result<()> {
//!     if ids.is_empty() {
//!         return Err(ReconError::NoModulesSelected);
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_modules(&[]).is_err());
//! ```

use std::io;

/// Errors raised by the engine and its ambient tooling
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("No modules selected for scan")]
    NoModulesSelected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl ReconError {
    /// Create a new invalid target error
    pub fn invalid_target(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unknown module error
    pub fn unknown_module(id: impl Into<String>) -> Self {
        Self::UnknownModule(id.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new parsing error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Whether this error stopped a scan before any module ran
    pub fn is_scan_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. } | Self::UnknownModule(_) | Self::NoModulesSelected
        )
    }
}

/// Result type alias for reconmap operations
pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReconError::invalid_target("ftp://x", "scheme 'ftp' is not allowed");
        assert_eq!(
            err.to_string(),
            "Invalid target 'ftp://x': scheme 'ftp' is not allowed"
        );
        assert_eq!(
            ReconError::unknown_module("ghost").to_string(),
            "Unknown module: ghost"
        );
    }

    #[test]
    fn test_scan_rejection_classification() {
        assert!(ReconError::NoModulesSelected.is_scan_rejection());
        assert!(ReconError::unknown_module("x").is_scan_rejection());
        assert!(!ReconError::config("bad").is_scan_rejection());
        assert!(!ReconError::timeout(10).is_scan_rejection());
    }
}
