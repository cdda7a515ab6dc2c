//! # Metrics Module
//!
//! Engine counters, gauges and duration histograms with Prometheus text
//! export. The orchestrator records scan and module lifecycle events here; a
//! disabled collector turns every call into a no-op.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::metrics::{MetricsCollector, MetricsConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> reconmap::error::Result<()> {
//! let metrics = MetricsCollector::new(MetricsConfig { enabled: true });
//! metrics.initialize().await?;
//!
//! metrics.increment_counter("scans_started").await?;
//! metrics.set_gauge("active_scans", 1.0).await?;
//! metrics.record_histogram("scan_duration_seconds", Duration::from_secs(3)).await?;
//!
//! let text = metrics.export_prometheus().await?;
//! assert!(text.contains("reconmap_scans_started 1"));
//! # Ok(())
//! # }
//! ```

use crate::error::{ReconError, Result};
use crate::module::ModuleStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const NAMESPACE: &str = "reconmap";

/// Upper bounds of the duration histogram buckets, in seconds
const BUCKET_BOUNDS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Metrics configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl MetricsConfig {
    /// Create metrics configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let enabled = match std::env::var("RECONMAP_METRICS_ENABLED") {
            Ok(enabled) => enabled
                .parse::<bool>()
                .map_err(|_| ReconError::config("Invalid RECONMAP_METRICS_ENABLED value"))?,
            Err(_) => false,
        };
        Ok(Self { enabled })
    }
}

/// Metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonically increasing
    Counter,
    /// Can go up and down
    Gauge,
    /// Distribution of durations
    Histogram,
}

/// Metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram {
        count: u64,
        sum: f64,
        /// Cumulative counts, one per entry of the bucket bounds
        buckets: Vec<u64>,
    },
}

impl MetricValue {
    fn empty(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Counter => Self::Counter(0),
            MetricType::Gauge => Self::Gauge(0.0),
            MetricType::Histogram => Self::Histogram {
                count: 0,
                sum: 0.0,
                buckets: vec![0; BUCKET_BOUNDS.len()],
            },
        }
    }
}

/// Metrics collector implementation
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    metrics: RwLock<BTreeMap<String, MetricValue>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::disabled()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            metrics: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// A collector that records nothing
    pub fn disabled() -> Self {
        Self::new(MetricsConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register the engine's standard metrics
    pub async fn initialize(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        info!("Initializing metrics collection");

        let standard = [
            ("scans_started", MetricType::Counter),
            ("scans_completed", MetricType::Counter),
            ("scans_rejected", MetricType::Counter),
            ("active_scans", MetricType::Gauge),
            ("cache_hits", MetricType::Counter),
            ("cache_misses", MetricType::Counter),
            ("scan_duration_seconds", MetricType::Histogram),
            ("module_duration_seconds", MetricType::Histogram),
        ];
        for (name, metric_type) in standard {
            self.register_metric(name, metric_type).await?;
        }
        Ok(())
    }

    /// Register a new metric
    pub async fn register_metric(&self, name: &str, metric_type: MetricType) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut metrics = self.metrics.write().await;
        if metrics.contains_key(name) {
            return Err(ReconError::config(format!(
                "Metric '{}' already registered",
                name
            )));
        }
        metrics.insert(name.to_string(), MetricValue::empty(metric_type));
        debug!("Registered metric: {} ({:?})", name, metric_type);
        Ok(())
    }

    /// Increment a counter metric
    pub async fn increment_counter(&self, name: &str) -> Result<()> {
        self.increment_counter_by(name, 1).await
    }

    /// Increment a counter by a specific amount, creating it on first use
    pub async fn increment_counter_by(&self, name: &str, value: u64) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut metrics = self.metrics.write().await;
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::empty(MetricType::Counter))
        {
            MetricValue::Counter(current) => {
                *current += value;
                Ok(())
            }
            _ => Err(ReconError::config(format!("Metric '{}' is not a counter", name))),
        }
    }

    /// Set a gauge metric, creating it on first use
    pub async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut metrics = self.metrics.write().await;
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::empty(MetricType::Gauge))
        {
            MetricValue::Gauge(current) => {
                *current = value;
                Ok(())
            }
            _ => Err(ReconError::config(format!("Metric '{}' is not a gauge", name))),
        }
    }

    /// Add to a gauge metric; `delta` may be negative
    pub async fn add_gauge(&self, name: &str, delta: f64) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut metrics = self.metrics.write().await;
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::empty(MetricType::Gauge))
        {
            MetricValue::Gauge(current) => {
                *current += delta;
                Ok(())
            }
            _ => Err(ReconError::config(format!("Metric '{}' is not a gauge", name))),
        }
    }

    /// Record a histogram observation, creating the histogram on first use
    pub async fn record_histogram(&self, name: &str, value: Duration) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let seconds = value.as_secs_f64();
        let mut metrics = self.metrics.write().await;
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::empty(MetricType::Histogram))
        {
            MetricValue::Histogram {
                count,
                sum,
                buckets,
            } => {
                *count += 1;
                *sum += seconds;
                for (bound, bucket) in BUCKET_BOUNDS.iter().zip(buckets.iter_mut()) {
                    if seconds <= *bound {
                        *bucket += 1;
                    }
                }
                Ok(())
            }
            _ => Err(ReconError::config(format!(
                "Metric '{}' is not a histogram",
                name
            ))),
        }
    }

    /// Current value of one metric
    pub async fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.read().await.get(name).cloned()
    }

    /// Snapshot of every metric
    pub async fn snapshot(&self) -> BTreeMap<String, MetricValue> {
        self.metrics.read().await.clone()
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> Result<String> {
        let metrics = self.metrics.read().await;
        let mut output = String::new();
        let fmt_err = |_| ReconError::parse("Failed to format metrics");

        writeln!(output, "# Generated by reconmap").map_err(fmt_err)?;
        for (name, value) in metrics.iter() {
            let name = format!("{}_{}", NAMESPACE, name);
            match value {
                MetricValue::Counter(count) => {
                    writeln!(output, "# TYPE {} counter", name).map_err(fmt_err)?;
                    writeln!(output, "{} {}", name, count).map_err(fmt_err)?;
                }
                MetricValue::Gauge(value) => {
                    writeln!(output, "# TYPE {} gauge", name).map_err(fmt_err)?;
                    writeln!(output, "{} {}", name, value).map_err(fmt_err)?;
                }
                MetricValue::Histogram {
                    count,
                    sum,
                    buckets,
                } => {
                    writeln!(output, "# TYPE {} histogram", name).map_err(fmt_err)?;
                    for (bound, bucket) in BUCKET_BOUNDS.iter().zip(buckets) {
                        writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, bucket)
                            .map_err(fmt_err)?;
                    }
                    writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, count)
                        .map_err(fmt_err)?;
                    writeln!(output, "{}_sum {}", name, sum).map_err(fmt_err)?;
                    writeln!(output, "{}_count {}", name, count).map_err(fmt_err)?;
                }
            }
        }
        writeln!(output, "# TYPE {}_uptime_seconds gauge", NAMESPACE).map_err(fmt_err)?;
        writeln!(
            output,
            "{}_uptime_seconds {}",
            NAMESPACE,
            self.uptime().as_secs_f64()
        )
        .map_err(fmt_err)?;

        Ok(output)
    }

    /// Get uptime since metrics collector started
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    // Engine hooks. Failures here are logged and never affect a scan.

    pub(crate) async fn scan_started(&self) {
        self.ignore(self.increment_counter("scans_started").await);
        self.ignore(self.add_gauge("active_scans", 1.0).await);
    }

    pub(crate) async fn scan_rejected(&self) {
        self.ignore(self.increment_counter("scans_rejected").await);
    }

    pub(crate) async fn scan_finished(&self, duration: Duration) {
        self.ignore(self.increment_counter("scans_completed").await);
        self.ignore(self.add_gauge("active_scans", -1.0).await);
        self.ignore(self.record_histogram("scan_duration_seconds", duration).await);
    }

    pub(crate) async fn module_finished(&self, status: ModuleStatus, duration: Duration) {
        let name = format!("module_outcomes_{}", status);
        self.ignore(self.increment_counter(&name).await);
        if status != ModuleStatus::Skipped {
            self.ignore(self.record_histogram("module_duration_seconds", duration).await);
        }
    }

    pub(crate) async fn cache_lookup(&self, hit: bool) {
        let name = if hit { "cache_hits" } else { "cache_misses" };
        self.ignore(self.increment_counter(name).await);
    }

    fn ignore(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!("Failed to record metric: {}", e);
        }
    }
}
