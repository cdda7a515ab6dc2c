//! # Configuration Management
//!
//! Command-line parsing and configuration layering for the reconmap binary.
//! Sources are applied lowest precedence first: built-in defaults, a TOML
//! file (`--config PATH` or `RECONMAP_CONFIG`), `RECONMAP_*` environment
//! variables, then command-line flags.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::config::Config;
//!
//! let config = Config::from_args(&[
//!     "reconmap".to_string(),
//!     "example.com".to_string(),
//!     "--modules".to_string(),
//!     "dns_resolve".to_string(),
//!     "--json".to_string(),
//! ])?;
//!
//! assert_eq!(config.target, "example.com");
//! assert!(config.json_mode);
//! # Ok::<(), reconmap::error::ReconError>(())
//! ```

use crate::config_file::ConfigFile;
use crate::constants;
use crate::error::{ReconError, Result};
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::module::Options;
use crate::orchestrator::ScanOptions;
use crate::rate_limit::RateLimitPolicy;
use crate::registry::Selection;
use crate::target;
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Usage text printed by `--help`
pub const USAGE: &str = "\
Usage: reconmap <target> [options]

Options:
  --modules LIST        'all' or comma separated module ids (default: all)
  --json                print the scan result as JSON
  --timeout MS          scan-wide deadline in milliseconds
  --grace MS            grace period for cancelled modules in milliseconds
  --passive-only        skip modules that touch the target directly
  --rps N               rate limit refill in requests per second
  --burst N             rate limit bucket size
  --threads N           worker threads (0 = one per CPU)
  --cache-ttl SECS      cache lifetime for cacheable modules (0 disables)
  --shutdown-timeout S  seconds to wait for modules after a signal
  --option M.KEY=VALUE  set an option for module M (VALUE parsed as JSON)
  --config PATH         load a TOML configuration file
  -h, --help            show this help
";

/// Resolved configuration for one invocation of the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Raw target identifier
    pub target: String,
    /// Modules to run
    pub selection: Selection,
    /// Output in JSON format
    pub json_mode: bool,
    /// Scan-wide deadline
    pub scan_timeout: Duration,
    /// Grace period for cancelled modules
    pub grace_period: Duration,
    /// Skip modules tagged active
    pub passive_only: bool,
    /// Number of worker threads
    pub threads: usize,
    /// How long to wait for running modules after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Shared rate limiter parameters
    pub rate_limit: RateLimitPolicy,
    /// Overrides the TTL of cacheable modules; zero disables caching
    pub cache_ttl: Option<Duration>,
    /// Per-module options
    pub module_options: BTreeMap<String, Options>,
    /// Per-module enable toggles
    pub module_toggles: BTreeMap<String, bool>,
    /// Logging configuration
    pub logging: LogConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: String::new(),
            selection: Selection::All,
            json_mode: false,
            scan_timeout: Duration::from_millis(constants::DEFAULT_SCAN_TIMEOUT_MS),
            grace_period: Duration::from_millis(constants::DEFAULT_GRACE_PERIOD_MS),
            passive_only: false,
            threads: num_cpus::get(),
            shutdown_timeout: Duration::from_secs(constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            rate_limit: RateLimitPolicy::default(),
            cache_ttl: None,
            module_options: BTreeMap::new(),
            module_toggles: BTreeMap::new(),
            logging: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Create configuration from command line arguments and the process
    /// environment
    pub fn from_args(args: &[String]) -> Result<Self> {
        Self::from_sources(args, |key| std::env::var(key).ok())
    }

    /// Like [`Config::from_args`] with an explicit environment lookup
    pub fn from_sources<F>(args: &[String], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = Self::config_path(args, &env)? {
            config.apply_file(ConfigFile::load_from_file(&path)?)?;
        }
        config.apply_env(&env)?;
        config.apply_args(args)?;

        if config.target.is_empty() {
            return Err(ReconError::config("Target argument required"));
        }
        // Reject malformed targets before any runtime is built
        target::resolve(&config.target)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the arguments ask for the usage text
    pub fn wants_help(args: &[String]) -> bool {
        args.iter().skip(1).any(|a| a == "-h" || a == "--help")
    }

    /// Scan options for the orchestrator
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            timeout: self.scan_timeout,
            grace_period: self.grace_period,
            passive_only: self.passive_only,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_timeout(self.scan_timeout)?;
        validation::validate_grace_period(self.grace_period)?;
        validation::validate_rate(
            self.rate_limit.requests_per_second,
            self.rate_limit.burst_limit,
        )?;
        for id in self.module_options.keys().chain(self.module_toggles.keys()) {
            validation::validate_module_id(id)?;
        }
        if self.threads == 0 {
            return Err(ReconError::config("Thread count must be at least 1"));
        }
        self.logging.validate()
    }

    fn config_path<F>(args: &[String], env: &F) -> Result<Option<PathBuf>>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                let path = Self::flag_value(args, i, arg)?;
                return Ok(Some(PathBuf::from(path)));
            }
        }
        Ok(env("RECONMAP_CONFIG").map(PathBuf::from))
    }

    fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        self.module_options.extend(file.module_options()?);

        if let Some(target) = file.target {
            self.target = target;
        }
        if let Some(selection) = file.selection {
            self.selection = Selection::parse(&selection)?;
        }
        if let Some(json_mode) = file.json_mode {
            self.json_mode = json_mode;
        }
        if let Some(passive_only) = file.passive_only {
            self.passive_only = passive_only;
        }
        if let Some(ms) = file.scan_timeout_ms {
            self.scan_timeout = Duration::from_millis(validation::validate_timeout_ms(ms)?);
        }
        if let Some(ms) = file.grace_period_ms {
            self.grace_period = Duration::from_millis(ms);
        }
        if let Some(secs) = file.shutdown_timeout_secs {
            self.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(threads) = file.threads {
            self.threads = Self::thread_count(threads);
        }
        if let Some(secs) = file.cache_ttl_secs {
            self.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(policy) = file.rate_limit {
            self.rate_limit = policy.into();
        }
        if let Some(toggles) = file.modules {
            self.module_toggles.extend(toggles);
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(modules) = env("RECONMAP_MODULES") {
            self.selection = Selection::parse(&modules)?;
        }
        if let Some(json) = env("RECONMAP_JSON") {
            self.json_mode = Self::parse_env(&json, "RECONMAP_JSON")?;
        }
        if let Some(passive) = env("RECONMAP_PASSIVE_ONLY") {
            self.passive_only = Self::parse_env(&passive, "RECONMAP_PASSIVE_ONLY")?;
        }
        if let Some(ms) = env("RECONMAP_TIMEOUT_MS") {
            let ms = Self::parse_env(&ms, "RECONMAP_TIMEOUT_MS")?;
            self.scan_timeout = Duration::from_millis(validation::validate_timeout_ms(ms)?);
        }
        if let Some(ms) = env("RECONMAP_GRACE_MS") {
            self.grace_period = Duration::from_millis(Self::parse_env(&ms, "RECONMAP_GRACE_MS")?);
        }
        if let Some(secs) = env("RECONMAP_SHUTDOWN_TIMEOUT") {
            self.shutdown_timeout =
                Duration::from_secs(Self::parse_env(&secs, "RECONMAP_SHUTDOWN_TIMEOUT")?);
        }
        if let Some(threads) = env("RECONMAP_THREADS") {
            self.threads = Self::thread_count(Self::parse_env(&threads, "RECONMAP_THREADS")?);
        }
        if let Some(rps) = env("RECONMAP_RPS") {
            self.rate_limit.requests_per_second = Self::parse_env(&rps, "RECONMAP_RPS")?;
        }
        if let Some(burst) = env("RECONMAP_BURST") {
            self.rate_limit.burst_limit = Self::parse_env(&burst, "RECONMAP_BURST")?;
        }
        if let Some(secs) = env("RECONMAP_CACHE_TTL_SECS") {
            self.cache_ttl = Some(Duration::from_secs(Self::parse_env(
                &secs,
                "RECONMAP_CACHE_TTL_SECS",
            )?));
        }

        self.logging = LogConfig::from_env()?;
        self.metrics = MetricsConfig::from_env()?;
        Ok(())
    }

    fn apply_args(&mut self, args: &[String]) -> Result<()> {
        let mut positional = Vec::new();
        let mut i = 1;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "--json" => self.json_mode = true,
                "--passive-only" => self.passive_only = true,
                "-h" | "--help" => {}
                "--config" => i += 1,
                "--modules" => {
                    self.selection = Selection::parse(Self::flag_value(args, i, arg)?)?;
                    i += 1;
                }
                "--timeout" => {
                    let ms = Self::parse_flag(args, i, arg)?;
                    self.scan_timeout = Duration::from_millis(validation::validate_timeout_ms(ms)?);
                    i += 1;
                }
                "--grace" => {
                    self.grace_period = Duration::from_millis(Self::parse_flag(args, i, arg)?);
                    i += 1;
                }
                "--rps" => {
                    self.rate_limit.requests_per_second = Self::parse_flag(args, i, arg)?;
                    i += 1;
                }
                "--burst" => {
                    self.rate_limit.burst_limit = Self::parse_flag(args, i, arg)?;
                    i += 1;
                }
                "--threads" => {
                    self.threads = Self::thread_count(Self::parse_flag(args, i, arg)?);
                    i += 1;
                }
                "--cache-ttl" => {
                    self.cache_ttl = Some(Duration::from_secs(Self::parse_flag(args, i, arg)?));
                    i += 1;
                }
                "--shutdown-timeout" => {
                    self.shutdown_timeout = Duration::from_secs(Self::parse_flag(args, i, arg)?);
                    i += 1;
                }
                "--option" => {
                    self.apply_option(Self::flag_value(args, i, arg)?)?;
                    i += 1;
                }
                flag if flag.starts_with('-') => {
                    return Err(ReconError::config(format!("Unknown option: {}", flag)));
                }
                _ => positional.push(arg),
            }
            i += 1;
        }

        match positional.as_slice() {
            [] => {}
            [target] => self.target = target.to_string(),
            _ => {
                return Err(ReconError::config(format!(
                    "Expected one target, got {}",
                    positional.len()
                )))
            }
        }
        Ok(())
    }

    /// Apply `module.key=value`; values that are not valid JSON are taken as
    /// plain strings.
    fn apply_option(&mut self, assignment: &str) -> Result<()> {
        let (path, raw) = assignment
            .split_once('=')
            .ok_or_else(|| ReconError::config(format!("Invalid option '{}', expected M.KEY=VALUE", assignment)))?;
        let (module, key) = path
            .split_once('.')
            .filter(|(m, k)| !m.is_empty() && !k.is_empty())
            .ok_or_else(|| ReconError::config(format!("Invalid option '{}', expected M.KEY=VALUE", assignment)))?;

        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.module_options
            .entry(module.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
        args.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| ReconError::config(format!("Missing value for {}", flag)))
    }

    fn parse_flag<T: FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
        let raw = Self::flag_value(args, i, flag)?;
        raw.parse::<T>()
            .map_err(|_| ReconError::config(format!("Invalid value for {}: {}", flag, raw)))
    }

    fn parse_env<T: FromStr>(raw: &str, name: &str) -> Result<T> {
        raw.trim()
            .parse::<T>()
            .map_err(|_| ReconError::config(format!("Invalid {} value", name)))
    }

    /// 0 means one worker per CPU
    fn thread_count(requested: usize) -> usize {
        if requested == 0 {
            num_cpus::get()
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("reconmap")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_from_args_basic() {
        let config = Config::from_sources(&args(&["127.0.0.1", "--json"]), no_env).unwrap();
        assert_eq!(config.target, "127.0.0.1");
        assert!(config.json_mode);
        assert_eq!(config.selection, Selection::All);
        assert_eq!(config.rate_limit, RateLimitPolicy::default());
    }

    #[test]
    fn test_config_from_args_with_flags() {
        let config = Config::from_sources(
            &args(&[
                "example.com",
                "--modules",
                "dns_resolve,tcp_probe",
                "--timeout",
                "5000",
                "--grace",
                "100",
                "--rps",
                "2.5",
                "--burst",
                "3",
                "--threads",
                "2",
                "--passive-only",
                "--cache-ttl",
                "0",
            ]),
            no_env,
        )
        .unwrap();

        assert_eq!(config.selection, Selection::only(["dns_resolve", "tcp_probe"]));
        assert_eq!(config.scan_timeout, Duration::from_millis(5000));
        assert_eq!(config.grace_period, Duration::from_millis(100));
        assert_eq!(config.rate_limit, RateLimitPolicy::new(2.5, 3));
        assert_eq!(config.threads, 2);
        assert!(config.passive_only);
        assert_eq!(config.cache_ttl, Some(Duration::ZERO));
        assert!(config.scan_options().passive_only);
    }

    #[test]
    fn test_config_module_options() {
        let config = Config::from_sources(
            &args(&[
                "example.com",
                "--option",
                "tcp_probe.ports=[22,80]",
                "--option",
                "dns_resolve.label=primary",
            ]),
            no_env,
        )
        .unwrap();
        assert_eq!(config.module_options["tcp_probe"]["ports"], json!([22, 80]));
        assert_eq!(config.module_options["dns_resolve"]["label"], json!("primary"));

        assert!(Config::from_sources(&args(&["example.com", "--option", "nokey"]), no_env).is_err());
    }

    #[test]
    fn test_config_invalid_input() {
        assert!(Config::from_sources(&args(&["invalid..hostname"]), no_env).is_err());
        assert!(Config::from_sources(&args(&[]), no_env).is_err());
        assert!(Config::from_sources(&args(&["a.com", "b.com"]), no_env).is_err());
        assert!(Config::from_sources(&args(&["a.com", "--timeout"]), no_env).is_err());
        assert!(Config::from_sources(&args(&["a.com", "--timeout", "0"]), no_env).is_err());
        assert!(Config::from_sources(&args(&["a.com", "--rps", "0"]), no_env).is_err());
        assert!(Config::from_sources(&args(&["a.com", "--bogus"]), no_env).is_err());
    }

    #[test]
    fn test_grace_period_is_bounded() {
        let config = Config::from_sources(&args(&["a.com", "--grace", "60000"]), no_env).unwrap();
        assert_eq!(config.grace_period, Duration::from_secs(60));

        let err = Config::from_sources(&args(&["a.com", "--grace", "18446744073709551615"]), no_env)
            .unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));

        let mut config = Config::default();
        config.target = "a.com".to_string();
        config.scan_timeout = Duration::from_secs(18_446_744_073_709_552);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconmap.toml");
        std::fs::write(
            &path,
            "target = \"file.example.com\"\nscan_timeout_ms = 1000\ngrace_period_ms = 10\n\
             [rate_limit]\nrequests_per_second = 1.0\nburst_limit = 1\n\
             [modules]\ntcp_probe = false\n",
        )
        .unwrap();

        let env: HashMap<&str, String> = [
            ("RECONMAP_CONFIG", path.display().to_string()),
            ("RECONMAP_TIMEOUT_MS", "2000".to_string()),
            ("RECONMAP_BURST", "7".to_string()),
        ]
        .into_iter()
        .collect();
        let lookup = |key: &str| env.get(key).cloned();

        let config = Config::from_sources(&args(&["--burst", "9"]), lookup).unwrap();
        // file
        assert_eq!(config.target, "file.example.com");
        assert_eq!(config.grace_period, Duration::from_millis(10));
        assert_eq!(config.rate_limit.requests_per_second, 1.0);
        assert_eq!(config.module_toggles["tcp_probe"], false);
        // env over file
        assert_eq!(config.scan_timeout, Duration::from_millis(2000));
        // flags over env
        assert_eq!(config.rate_limit.burst_limit, 9);
    }

    #[test]
    fn test_wants_help() {
        assert!(Config::wants_help(&args(&["--help"])));
        assert!(Config::wants_help(&args(&["example.com", "-h"])));
        assert!(!Config::wants_help(&args(&["example.com"])));
    }
}
