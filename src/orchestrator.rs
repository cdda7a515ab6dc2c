//! # Scan Orchestrator
//!
//! Runs a selection of modules against one target. The orchestrator resolves
//! the target, pulls the selected modules from the registry in registration
//! order, answers cacheable modules from the cache and dispatches the rest
//! concurrently, one tokio task each. Every module runs under the smaller of
//! its own timeout and the scan-wide deadline; once its deadline passes the
//! module's cancellation token fires and it gets a short grace period to
//! return before it is abandoned and recorded as timed out.
//!
//! A module failing, timing out or panicking never affects its siblings; only
//! an invalid target, an unknown module or an empty selection fail the scan
//! itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reconmap::cache::ResultCache;
//! use reconmap::modules;
//! use reconmap::orchestrator::{Orchestrator, ScanRequest};
//! use reconmap::rate_limit::RateLimiter;
//! use reconmap::registry::{ModuleRegistry, Selection};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> reconmap::error::Result<()> {
//! let mut registry = ModuleRegistry::new();
//! modules::register_builtin(&mut registry)?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(registry),
//!     Arc::new(RateLimiter::standard()?),
//!     Arc::new(ResultCache::new()),
//! )?;
//!
//! let result = orchestrator
//!     .scan(ScanRequest::new("example.com", Selection::All))
//!     .await?;
//! println!("{}: {}", result.target(), result.status());
//! # Ok(())
//! # }
//! ```

use crate::aggregator::{self, ScanResult};
use crate::cache::{CacheKey, CachedReport, ResultCache};
use crate::constants;
use crate::error::{ReconError, Result};
use crate::logging;
use crate::metrics::MetricsCollector;
use crate::module::{
    ModuleContext, ModuleError, ModuleOutcome, ModuleReport, ModuleStatus, Options, ReconModule,
    TimeBudget,
};
use crate::rate_limit::RateLimiter;
use crate::registry::{ModuleRegistry, RegisteredModule, Selection};
use crate::target::{self, Target};
use crate::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Scan-wide knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Scan-wide deadline
    pub timeout: Duration,
    /// Time a cancelled module gets to return before it is abandoned
    pub grace_period: Duration,
    /// Record modules tagged `active` as skipped instead of running them
    pub passive_only: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(constants::DEFAULT_SCAN_TIMEOUT_MS),
            grace_period: Duration::from_millis(constants::DEFAULT_GRACE_PERIOD_MS),
            passive_only: false,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<()> {
        validation::validate_timeout(self.timeout)?;
        validation::validate_grace_period(self.grace_period)?;
        Ok(())
    }
}

/// Everything a caller supplies for one scan
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Raw target identifier, resolved by the orchestrator
    pub target: String,
    pub selection: Selection,
    /// Per-module options, overlaid key by key on the descriptor defaults
    pub module_options: HashMap<String, Options>,
    /// `None` uses the orchestrator's defaults
    pub options: Option<ScanOptions>,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>, selection: Selection) -> Self {
        Self {
            target: target.into(),
            selection,
            module_options: HashMap::new(),
            options: None,
        }
    }

    pub fn with_module_options(mut self, module_id: impl Into<String>, options: Options) -> Self {
        self.module_options.insert(module_id.into(), options);
        self
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Lifecycle of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Initializing,
    ResolvingTarget,
    RunningModules,
    Aggregating,
    Completed,
    Failed,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::ResolvingTarget => "resolving_target",
            Self::RunningModules => "running_modules",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a module was asked to stop
#[derive(Debug, Clone, Copy)]
enum StopCause {
    Deadline(Duration),
    Cancelled,
}

impl StopCause {
    fn detail(self) -> String {
        match self {
            Self::Deadline(budget) => {
                format!("exceeded time budget of {}ms", budget.as_millis())
            }
            Self::Cancelled => "scan cancelled".to_string(),
        }
    }
}

/// A module that has been dispatched and not yet collected
struct Dispatched {
    module_id: String,
    started_at: DateTime<Utc>,
    supervisor: JoinHandle<ModuleOutcome>,
    execution: AbortHandle,
    /// Past this instant the supervisor itself is abandoned
    backstop: Instant,
    cache_key: Option<CacheKey>,
    cache_ttl: Option<Duration>,
}

enum Slot {
    Done(ModuleOutcome),
    Running(Dispatched),
}

/// Coordinates scans over a shared registry, rate limiter and cache
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    metrics: Arc<MetricsCollector>,
    defaults: ScanOptions,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator over shared components
    ///
    /// Fails when a registered module declares a rate cost the limiter can
    /// never grant.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache>,
    ) -> Result<Self> {
        if let Some(descriptor) = registry
            .descriptors()
            .find(|d| !limiter.can_satisfy(d.rate_cost))
        {
            return Err(ReconError::config(format!(
                "Module '{}' has rate cost {} above the burst limit of {}",
                descriptor.id,
                descriptor.rate_cost,
                limiter.policy().burst_limit
            )));
        }

        Ok(Self {
            registry,
            limiter,
            cache,
            metrics: Arc::new(MetricsCollector::disabled()),
            defaults: ScanOptions::default(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Scan options used when a request carries none
    pub fn with_defaults(mut self, defaults: ScanOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Cancelling `token` cancels every running scan
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn defaults(&self) -> &ScanOptions {
        &self.defaults
    }

    /// Run one scan to completion
    ///
    /// Returns `Err` only for scan-level failures detected before any module
    /// runs. Module failures are recorded inside the returned result.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        debug!(phase = %ScanPhase::Initializing, target = %request.target, "Scan phase");

        let (target, selected, options) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(phase = %ScanPhase::Failed, error = %e, "Scan rejected");
                self.metrics.scan_rejected().await;
                return Err(e);
            }
        };

        self.metrics.scan_started().await;
        let span = logging::scan_span(target.canonical(), selected.len());
        let result = self
            .run(target, selected, &request, &options, started_at, clock)
            .instrument(span)
            .await;
        self.metrics.scan_finished(clock.elapsed()).await;
        Ok(result)
    }

    fn prepare(
        &self,
        request: &ScanRequest,
    ) -> Result<(Arc<Target>, Vec<RegisteredModule>, ScanOptions)> {
        let options = request.options.clone().unwrap_or_else(|| self.defaults.clone());
        options.validate()?;

        debug!(phase = %ScanPhase::ResolvingTarget, "Scan phase");
        let target = target::resolve(&request.target)?;

        let selected = self.registry.get_enabled(&request.selection)?;
        if selected.is_empty() {
            return Err(ReconError::NoModulesSelected);
        }
        Ok((Arc::new(target), selected, options))
    }

    async fn run(
        &self,
        target: Arc<Target>,
        selected: Vec<RegisteredModule>,
        request: &ScanRequest,
        options: &ScanOptions,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> ScanResult {
        debug!(phase = %ScanPhase::RunningModules, modules = selected.len(), "Scan phase");

        let scan_deadline = clock + options.timeout;
        let scan_token = self.shutdown.child_token();

        let mut slots = Vec::with_capacity(selected.len());
        for registered in selected {
            let slot = self
                .dispatch(registered, &target, request, options, scan_deadline, &scan_token)
                .await;
            slots.push(slot);
        }

        // Collected in start order; completion order does not matter
        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Running(dispatched) => self.collect(dispatched).await,
            };
            logging::log_module_outcome(&outcome);
            self.metrics
                .module_finished(outcome.status(), Duration::from_millis(outcome.duration_ms()))
                .await;
            outcomes.push(outcome);
        }
        // Nothing is left running once every slot is collected
        scan_token.cancel();

        debug!(phase = %ScanPhase::Aggregating, "Scan phase");
        let result = aggregator::aggregate(&target, outcomes, started_at, Utc::now());

        debug!(phase = %ScanPhase::Completed, status = %result.status(), "Scan phase");
        logging::log_scan_completion(&result);
        result
    }

    /// Decide what happens to one selected module: skip it, answer it from
    /// the cache, or start it.
    async fn dispatch(
        &self,
        registered: RegisteredModule,
        target: &Arc<Target>,
        request: &ScanRequest,
        options: &ScanOptions,
        scan_deadline: Instant,
        scan_token: &CancellationToken,
    ) -> Slot {
        let RegisteredModule { descriptor, module } = registered;

        if options.passive_only && descriptor.is_active() {
            debug!(module = %descriptor.id, "Skipping active module in passive-only scan");
            return Slot::Done(ModuleOutcome::skipped(descriptor.id, Utc::now()));
        }

        let mut merged = descriptor.options.clone();
        if let Some(overrides) = request.module_options.get(&descriptor.id) {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }

        let cache_key = if descriptor.is_cacheable() {
            let key = CacheKey::for_module(target.canonical(), &descriptor, &merged);
            let hit = self.cache.get(&key);
            self.metrics.cache_lookup(hit.is_some()).await;
            if let Some(hit) = hit {
                debug!(module = %descriptor.id, "Answered from cache");
                return Slot::Done(ModuleOutcome::from_cache(
                    descriptor.id,
                    hit.payload,
                    hit.discoveries,
                    Utc::now(),
                ));
            }
            Some(key)
        } else {
            None
        };

        let now = Instant::now();
        let deadline = now
            .checked_add(descriptor.timeout)
            .map_or(scan_deadline, |d| d.min(scan_deadline));
        let budget = TimeBudget::new(now, deadline);
        let token = scan_token.child_token();
        let ctx = ModuleContext::new(
            &descriptor,
            merged,
            budget,
            Arc::clone(&self.limiter),
            token.clone(),
        );

        let span = logging::module_span(&descriptor.id);
        let started_at = Utc::now();
        debug!(module = %descriptor.id, budget_ms = budget.total().as_millis() as u64, "Module running");

        let execution = spawn_execution(module, Arc::clone(target), ctx, span.clone());
        let abort = execution.abort_handle();
        let supervisor = tokio::spawn(
            supervise(
                descriptor.id.clone(),
                execution,
                token,
                budget,
                options.grace_period,
                started_at,
            )
            .instrument(span),
        );

        Slot::Running(Dispatched {
            module_id: descriptor.id,
            started_at,
            supervisor,
            execution: abort,
            backstop: backstop(deadline, options.grace_period),
            cache_key,
            cache_ttl: descriptor.cache_ttl,
        })
    }

    /// Wait for a dispatched module and populate the cache on success
    async fn collect(&self, dispatched: Dispatched) -> ModuleOutcome {
        let Dispatched {
            module_id,
            started_at,
            supervisor,
            execution,
            backstop,
            cache_key,
            cache_ttl,
        } = dispatched;

        let supervisor_abort = supervisor.abort_handle();
        let outcome = match time::timeout_at(backstop, supervisor).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ModuleOutcome::error(
                module_id.as_str(),
                format!("module supervisor failed: {}", e),
                started_at,
                Utc::now(),
            ),
            Err(_) => {
                warn!(module = %module_id, "Module ignored cancellation, aborting task");
                supervisor_abort.abort();
                execution.abort();
                ModuleOutcome::timeout(
                    module_id.as_str(),
                    "module did not respond to cancellation",
                    started_at,
                    Utc::now(),
                )
            }
        };

        if let (Some(key), Some(ttl)) = (cache_key, cache_ttl) {
            if outcome.status() == ModuleStatus::Success {
                self.cache.put(
                    key,
                    CachedReport::new(outcome.payload().clone())
                        .with_discoveries(outcome.discoveries().clone()),
                    ttl,
                );
            }
        }
        outcome
    }
}

/// Past deadline + grace + slack the orchestrator stops waiting on a module
fn backstop(deadline: Instant, grace_period: Duration) -> Instant {
    let slack = grace_period.saturating_add(Duration::from_millis(constants::BACKSTOP_SLACK_MS));
    deadline
        .checked_add(slack)
        .unwrap_or_else(|| far_future(deadline))
}

/// Latest instant reachable from `from`, about thirty years ahead
fn far_future(from: Instant) -> Instant {
    from.checked_add(Duration::from_secs(86_400 * 365 * 30))
        .unwrap_or(from)
}

fn spawn_execution(
    module: Arc<dyn ReconModule>,
    target: Arc<Target>,
    ctx: ModuleContext,
    span: tracing::Span,
) -> JoinHandle<std::result::Result<ModuleReport, ModuleError>> {
    tokio::spawn(async move { module.execute(&target, &ctx).await }.instrument(span))
}

/// Owns one module's execution task and turns whatever it yields into an
/// outcome. Never panics itself.
async fn supervise(
    module_id: String,
    mut execution: JoinHandle<std::result::Result<ModuleReport, ModuleError>>,
    token: CancellationToken,
    budget: TimeBudget,
    grace_period: Duration,
    started_at: DateTime<Utc>,
) -> ModuleOutcome {
    let cause = tokio::select! {
        joined = &mut execution => {
            let outcome = finish(module_id, joined, started_at);
            if token.is_cancelled() {
                return relabel_stopped(outcome, StopCause::Cancelled, started_at);
            }
            if budget.is_exhausted() {
                return relabel_stopped(outcome, StopCause::Deadline(budget.total()), started_at);
            }
            return outcome;
        }
        _ = time::sleep_until(budget.deadline()) => StopCause::Deadline(budget.total()),
        _ = token.cancelled() => StopCause::Cancelled,
    };

    debug!(grace_ms = grace_period.as_millis() as u64, ?cause, "Cancelling module");
    token.cancel();

    match time::timeout(grace_period, &mut execution).await {
        Ok(joined) => relabel_stopped(finish(module_id, joined, started_at), cause, started_at),
        Err(_) => {
            execution.abort();
            info!(module = %module_id, "Module abandoned after grace period");
            ModuleOutcome::timeout(module_id, cause.detail(), started_at, Utc::now())
        }
    }
}

/// A module that gave up because it was told to stop timed out; anything
/// else it reported is kept as is.
fn relabel_stopped(
    outcome: ModuleOutcome,
    cause: StopCause,
    started_at: DateTime<Utc>,
) -> ModuleOutcome {
    match outcome.status() {
        ModuleStatus::Timeout => ModuleOutcome::timeout(
            outcome.module_id(),
            cause.detail(),
            started_at,
            outcome.ended_at(),
        ),
        _ => outcome,
    }
}

fn finish(
    module_id: String,
    joined: std::result::Result<std::result::Result<ModuleReport, ModuleError>, JoinError>,
    started_at: DateTime<Utc>,
) -> ModuleOutcome {
    let ended_at = Utc::now();
    match joined {
        Ok(Ok(ModuleReport::Complete {
            payload,
            discoveries,
        })) => ModuleOutcome::success(module_id, payload, started_at, ended_at)
            .with_discoveries(discoveries),
        Ok(Ok(ModuleReport::Partial {
            payload,
            detail,
            discoveries,
        })) => ModuleOutcome::partial(module_id, payload, detail, started_at, ended_at)
            .with_discoveries(discoveries),
        Ok(Err(e)) if e.is_timeout() => {
            ModuleOutcome::timeout(module_id, e.to_string(), started_at, ended_at)
        }
        Ok(Err(e)) => ModuleOutcome::error(module_id, e.to_string(), started_at, ended_at),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            ModuleOutcome::error(
                module_id,
                format!("module panicked: {}", message),
                started_at,
                ended_at,
            )
        }
        Err(_) => ModuleOutcome::timeout(module_id, "module task was aborted", started_at, ended_at),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
