//! # Module Contract
//!
//! Every reconnaissance capability plugs into the engine through the single
//! [`ReconModule`] trait. A module receives the frozen [`Target`] and a
//! [`ModuleContext`] carrying its configuration slice, its time budget, a
//! cancellation signal and the shared rate limiter handle, and answers with a
//! [`ModuleReport`] or a [`ModuleError`]. The orchestrator turns that answer
//! into an immutable [`ModuleOutcome`].
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use reconmap::module::{
//!     Capability, ModuleContext, ModuleDescriptor, ModuleError, ModuleReport, ReconModule,
//! };
//! use reconmap::target::Target;
//! use serde_json::json;
//!
//! struct Whois;
//!
//! #[async_trait]
//! impl ReconModule for Whois {
//!     fn descriptor(&self) -> ModuleDescriptor {
//!         ModuleDescriptor::new("whois").with_capability(Capability::Passive)
//!     }
//!
//!     async fn execute(
//!         &self,
//!         target: &Target,
//!         ctx: &ModuleContext,
//!     ) -> Result<ModuleReport, ModuleError> {
//!         let record = ctx
//!             .outbound(async { Ok(json!({ "domain": target.canonical() })) })
//!             .await?;
//!         Ok(ModuleReport::complete(json!({ "whois": record })))
//!     }
//! }
//! ```

use crate::constants;
use crate::rate_limit::RateLimiter;
use crate::target::{Discoveries, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Opaque per-module configuration passed through unmodified
pub type Options = serde_json::Map<String, Value>;

/// Capability tag declared by a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Gathers information without touching the target's own hosts
    Passive,
    /// Interacts with the target directly
    Active,
}

/// Static declaration of a module, registered once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module identifier
    pub id: String,
    pub capabilities: BTreeSet<Capability>,
    /// Default options, overlaid by per-scan options
    pub options: Options,
    /// Per-invocation time budget
    pub timeout: Duration,
    /// Rate tokens consumed per outbound operation
    pub rate_cost: u32,
    /// Default operation key used to build cache keys
    pub operation_key: String,
    /// `None` means results are never cached
    pub cache_ttl: Option<Duration>,
}

impl ModuleDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            options: Options::new(),
            timeout: Duration::from_millis(constants::DEFAULT_MODULE_TIMEOUT_MS),
            rate_cost: 1,
            operation_key: "default".to_string(),
            cache_ttl: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_cost(mut self, rate_cost: u32) -> Self {
        self.rate_cost = rate_cost;
        self
    }

    pub fn with_operation_key(mut self, key: impl Into<String>) -> Self {
        self.operation_key = key.into();
        self
    }

    /// Mark results of this module as cacheable for `ttl`
    pub fn cacheable(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn is_active(&self) -> bool {
        self.capabilities.contains(&Capability::Active)
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_ttl.is_some_and(|ttl| !ttl.is_zero())
    }
}

/// Terminal status of one module invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Success,
    Partial,
    Error,
    Skipped,
    Timeout,
}

impl ModuleStatus {
    /// Produced usable output
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    /// Produced nothing usable
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Terminal record of one module's execution within a scan
///
/// `error` is present exactly when the status is `error`, `timeout` or
/// `partial`; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutcome {
    module_id: String,
    status: ModuleStatus,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_ms: u64,
    #[serde(default)]
    cached: bool,
    #[serde(default, skip_serializing_if = "Discoveries::is_empty")]
    discoveries: Discoveries,
}

impl ModuleOutcome {
    fn build(
        module_id: impl Into<String>,
        status: ModuleStatus,
        payload: Value,
        error: Option<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            module_id: module_id.into(),
            status,
            payload,
            error,
            started_at,
            ended_at,
            duration_ms,
            cached: false,
            discoveries: Discoveries::default(),
        }
    }

    pub fn success(
        module_id: impl Into<String>,
        payload: Value,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self::build(module_id, ModuleStatus::Success, payload, None, started_at, ended_at)
    }

    pub fn partial(
        module_id: impl Into<String>,
        payload: Value,
        detail: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            module_id,
            ModuleStatus::Partial,
            payload,
            Some(detail.into()),
            started_at,
            ended_at,
        )
    }

    pub fn error(
        module_id: impl Into<String>,
        detail: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            module_id,
            ModuleStatus::Error,
            Value::Null,
            Some(detail.into()),
            started_at,
            ended_at,
        )
    }

    pub fn timeout(
        module_id: impl Into<String>,
        detail: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            module_id,
            ModuleStatus::Timeout,
            Value::Null,
            Some(detail.into()),
            started_at,
            ended_at,
        )
    }

    pub fn skipped(module_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::build(module_id, ModuleStatus::Skipped, Value::Null, None, at, at)
    }

    /// A success synthesized from a cache hit, without invoking the module
    pub fn from_cache(
        module_id: impl Into<String>,
        payload: Value,
        discoveries: Discoveries,
        at: DateTime<Utc>,
    ) -> Self {
        let mut outcome = Self::success(module_id, payload, at, at);
        outcome.cached = true;
        outcome.discoveries = discoveries;
        outcome
    }

    pub fn with_discoveries(mut self, discoveries: Discoveries) -> Self {
        self.discoveries = discoveries;
        self
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn discoveries(&self) -> &Discoveries {
        &self.discoveries
    }
}

/// What a module hands back when it returns normally
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleReport {
    Complete {
        payload: Value,
        discoveries: Discoveries,
    },
    /// Some work failed but the payload holds what was gathered
    Partial {
        payload: Value,
        detail: String,
        discoveries: Discoveries,
    },
}

impl ModuleReport {
    pub fn complete(payload: Value) -> Self {
        Self::Complete {
            payload,
            discoveries: Discoveries::default(),
        }
    }

    pub fn partial(payload: Value, detail: impl Into<String>) -> Self {
        Self::Partial {
            payload,
            detail: detail.into(),
            discoveries: Discoveries::default(),
        }
    }

    pub fn with_discoveries(self, found: Discoveries) -> Self {
        match self {
            Self::Complete { payload, .. } => Self::Complete {
                payload,
                discoveries: found,
            },
            Self::Partial { payload, detail, .. } => Self::Partial {
                payload,
                detail,
                discoveries: found,
            },
        }
    }
}

/// Module-level failure; recorded as outcome data, never raised past a scan
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModuleError {
    #[error("{0}")]
    Failed(String),

    #[error("time budget exhausted")]
    TimedOut,

    #[error("cancelled")]
    Cancelled,

    #[error("rate limiter rejected request: {0}")]
    RateLimit(String),

    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
}

impl ModuleError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Timeouts and cancellations end up as `timeout` outcomes
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Cancelled)
    }
}

/// Wall-clock allowance for one module invocation
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    deadline: Instant,
}

impl TimeBudget {
    pub fn new(started: Instant, deadline: Instant) -> Self {
        Self { started, deadline }
    }

    /// Budget starting now and lasting `total`, clamped to the latest
    /// representable instant
    pub fn from_now(total: Duration) -> Self {
        let started = Instant::now();
        let deadline = started
            .checked_add(total)
            .unwrap_or_else(|| started + Duration::from_secs(86_400 * 365 * 30));
        Self::new(started, deadline)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn total(&self) -> Duration {
        self.deadline.saturating_duration_since(self.started)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Everything a module gets from the engine for one invocation
#[derive(Debug, Clone)]
pub struct ModuleContext {
    module_id: String,
    options: Options,
    budget: TimeBudget,
    limiter: Arc<RateLimiter>,
    rate_cost: u32,
    cancel: CancellationToken,
}

impl ModuleContext {
    pub fn new(
        descriptor: &ModuleDescriptor,
        options: Options,
        budget: TimeBudget,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            module_id: descriptor.id.clone(),
            options,
            budget,
            limiter,
            rate_cost: descriptor.rate_cost,
            cancel,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Typed lookup of one option; `Ok(None)` when the key is absent
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ModuleError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ModuleError::InvalidOption {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    pub fn option_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ModuleError> {
        Ok(self.option(key)?.unwrap_or(default))
    }

    pub fn budget(&self) -> TimeBudget {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.remaining()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the orchestrator asks this module to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Fails fast when cancelled or out of budget; call at cooperative points
    pub fn checkpoint(&self) -> Result<(), ModuleError> {
        if self.cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        if self.budget.is_exhausted() {
            return Err(ModuleError::TimedOut);
        }
        Ok(())
    }

    /// Wait for this module's rate cost worth of tokens
    pub async fn acquire_token(&self) -> Result<(), ModuleError> {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ModuleError::Cancelled),
            _ = tokio::time::sleep_until(self.budget.deadline()) => Err(ModuleError::TimedOut),
            acquired = self.limiter.acquire_n(self.rate_cost) => {
                acquired.map_err(|e| ModuleError::RateLimit(e.to_string()))
            }
        }
    }

    /// Run one outbound call: take tokens, then race the call against
    /// cancellation and the remaining budget.
    pub async fn outbound<F, T>(&self, call: F) -> Result<T, ModuleError>
    where
        F: Future<Output = Result<T, ModuleError>>,
    {
        self.acquire_token().await?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ModuleError::Cancelled),
            _ = tokio::time::sleep_until(self.budget.deadline()) => Err(ModuleError::TimedOut),
            result = call => result,
        }
    }
}

/// A pluggable reconnaissance capability
///
/// Implementations must stay within `ctx.budget()`, take rate tokens for every
/// outbound call (see [`ModuleContext::outbound`]) and report internal
/// failures as [`ModuleError`] rather than panicking. Panics are still caught
/// by the orchestrator and recorded as `error` outcomes.
#[async_trait]
pub trait ReconModule: Send + Sync {
    /// Declared identity and defaults of this module
    fn descriptor(&self) -> ModuleDescriptor;

    async fn execute(
        &self,
        target: &Target,
        ctx: &ModuleContext,
    ) -> Result<ModuleReport, ModuleError>;
}
