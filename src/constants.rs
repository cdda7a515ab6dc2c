//! # Configuration Constants
//!
//! Default budgets, rate parameters and validation limits used throughout
//! reconmap.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::constants::*;
//! use std::time::Duration;
//!
//! let scan_budget = Duration::from_millis(DEFAULT_SCAN_TIMEOUT_MS);
//! assert!(scan_budget > Duration::from_millis(DEFAULT_GRACE_PERIOD_MS));
//! ```

/// Default scan-wide deadline in milliseconds
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 30_000;

/// Default per-module timeout in milliseconds
pub const DEFAULT_MODULE_TIMEOUT_MS: u64 = 15_000;

/// Time a cancelled module gets to finalize before it is abandoned
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 250;

/// Extra slack the orchestrator allows past deadline + grace before aborting a task
pub const BACKSTOP_SLACK_MS: u64 = 50;

/// Default TTL for cacheable module results in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default graceful shutdown timeout in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Shared rate limiter defaults
pub mod rate {
    /// Refill rate in tokens per second
    pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 50.0;
    /// Bucket capacity
    pub const DEFAULT_BURST_LIMIT: u32 = 50;
}

/// Input validation
pub mod validation {
    /// Maximum length of a domain name
    pub const MAX_TARGET_LENGTH: usize = 253;
    /// Maximum length of one domain label
    pub const MAX_LABEL_LENGTH: usize = 63;
    /// Minimum accepted timeout in milliseconds
    pub const MIN_TIMEOUT_MS: u64 = 1;
    /// Maximum accepted timeout in milliseconds (1 hour)
    pub const MAX_TIMEOUT_MS: u64 = 3_600_000;
    /// Maximum accepted grace period in milliseconds
    pub const MAX_GRACE_PERIOD_MS: u64 = 60_000;
    /// Maximum length of a module identifier
    pub const MAX_MODULE_ID_LENGTH: usize = 64;
}

/// Reference module defaults
pub mod modules {
    /// Ports probed by `tcp_probe` when no `ports` option is given
    pub const DEFAULT_PROBE_PORTS: &[u16] = &[21, 22, 25, 53, 80, 110, 143, 443, 445, 3306, 3389, 8080];
    /// Per-connect timeout for `tcp_probe` in milliseconds
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
}
