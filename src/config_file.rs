//! # Configuration Files
//!
//! TOML representation of [`Config`](crate::config::Config). Every field is
//! optional; values present in the file override the built-in defaults and
//! are in turn overridden by environment variables and command-line flags.
//!
//! ```toml
//! selection = "dns_resolve,tcp_probe"
//! scan_timeout_ms = 20000
//!
//! [rate_limit]
//! requests_per_second = 10.0
//! burst_limit = 10
//!
//! [modules]
//! tcp_probe = false
//!
//! [options.tcp_probe]
//! ports = [22, 80, 443]
//! ```

use crate::constants;
use crate::error::{ReconError, Result};
use crate::module::Options;
use crate::rate_limit::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Configuration structure for serialization/deserialization in config files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    // Basic settings
    pub target: Option<String>,
    /// `"all"` or a comma separated list of module ids
    pub selection: Option<String>,
    pub json_mode: Option<bool>,
    pub passive_only: Option<bool>,

    // Timeouts
    pub scan_timeout_ms: Option<u64>,
    pub grace_period_ms: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,

    // Threading
    pub threads: Option<usize>,

    // Caching
    pub cache_ttl_secs: Option<u64>,

    // Rate limiting
    pub rate_limit: Option<RateLimitPolicyFile>,

    /// Per-module enable toggles
    pub modules: Option<BTreeMap<String, bool>>,

    /// Per-module option tables
    pub options: Option<BTreeMap<String, toml::Table>>,
}

/// Rate limit policy for config file serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicyFile {
    pub requests_per_second: f64,
    pub burst_limit: u32,
}

impl From<RateLimitPolicyFile> for RateLimitPolicy {
    fn from(policy_file: RateLimitPolicyFile) -> Self {
        RateLimitPolicy::new(policy_file.requests_per_second, policy_file.burst_limit)
    }
}

impl From<RateLimitPolicy> for RateLimitPolicyFile {
    fn from(policy: RateLimitPolicy) -> Self {
        RateLimitPolicyFile {
            requests_per_second: policy.requests_per_second,
            burst_limit: policy.burst_limit,
        }
    }
}

impl ConfigFile {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ReconError::parse(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ReconError::parse(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Per-module options converted to the engine's JSON representation
    pub fn module_options(&self) -> Result<BTreeMap<String, Options>> {
        let mut converted = BTreeMap::new();
        for (module, table) in self.options.iter().flatten() {
            let value = serde_json::to_value(table).map_err(|e| {
                ReconError::parse(format!("Invalid options for module '{}': {}", module, e))
            })?;
            if let serde_json::Value::Object(map) = value {
                converted.insert(module.clone(), map);
            }
        }
        Ok(converted)
    }

    /// Create a default configuration file structure
    pub fn default_config() -> Self {
        Self {
            target: None,
            selection: Some("all".to_string()),
            json_mode: Some(false),
            passive_only: Some(false),
            scan_timeout_ms: Some(constants::DEFAULT_SCAN_TIMEOUT_MS),
            grace_period_ms: Some(constants::DEFAULT_GRACE_PERIOD_MS),
            shutdown_timeout_secs: Some(constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            threads: Some(0),
            cache_ttl_secs: Some(constants::DEFAULT_CACHE_TTL_SECS),
            rate_limit: Some(RateLimitPolicy::default().into()),
            modules: None,
            options: None,
        }
    }
}
