//! # Rate Limiting Module
//!
//! The process-wide token bucket every module invocation draws from. It is
//! the single point of backpressure for all concurrently running modules and
//! all concurrently running scans, so there is exactly one limiter per
//! process, handed around as an `Arc<RateLimiter>`.
//!
//! Built on the governor crate's GCRA limiter: tokens accrue continuously at
//! `requests_per_second` up to `burst_limit`, and acquisition latency is
//! proportional to the missing tokens divided by the refill rate.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::rate_limit::{RateLimiter, RateLimitPolicy};
//!
//! # async fn demo() -> reconmap::error::Result<()> {
//! let limiter = RateLimiter::new(RateLimitPolicy::new(20.0, 5))?;
//!
//! // Suspends until a token is free
//! limiter.acquire().await;
//!
//! // Never waits
//! if limiter.try_acquire() {
//!     // perform one outbound call
//! }
//! # Ok(())
//! # }
//! ```

use crate::constants;
use crate::error::{ReconError, Result};
use crate::validation;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Token bucket parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Continuous refill rate; may be fractional
    pub requests_per_second: f64,
    /// Bucket capacity, the maximum number of tokens issued at once
    pub burst_limit: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        policies::standard()
    }
}

impl RateLimitPolicy {
    pub fn new(requests_per_second: f64, burst_limit: u32) -> Self {
        Self {
            requests_per_second,
            burst_limit,
        }
    }

    /// Time for one token to accrue
    pub fn refill_interval(&self) -> Result<Duration> {
        validation::validate_rate(self.requests_per_second, self.burst_limit)?;
        Duration::try_from_secs_f64(1.0 / self.requests_per_second).map_err(|_| {
            ReconError::config(format!(
                "requests_per_second {} is out of range",
                self.requests_per_second
            ))
        })
    }

    /// Convert to governor Quota
    fn to_quota(&self) -> Result<Quota> {
        let period = self.refill_interval()?;
        let burst = NonZeroU32::new(self.burst_limit)
            .ok_or_else(|| ReconError::config("burst_limit must be greater than 0"))?;
        let quota = Quota::with_period(period).ok_or_else(|| {
            ReconError::config(format!(
                "requests_per_second {} is too high",
                self.requests_per_second
            ))
        })?;
        Ok(quota.allow_burst(burst))
    }
}

/// Default rate limiting policies
pub mod policies {
    use super::*;

    /// Conservative policy for sensitive targets
    pub fn conservative() -> RateLimitPolicy {
        RateLimitPolicy::new(5.0, 5)
    }

    /// Standard policy for general scanning
    pub fn standard() -> RateLimitPolicy {
        RateLimitPolicy::new(
            constants::rate::DEFAULT_REQUESTS_PER_SECOND,
            constants::rate::DEFAULT_BURST_LIMIT,
        )
    }

    /// Aggressive policy for high-throughput scanning
    pub fn aggressive() -> RateLimitPolicy {
        RateLimitPolicy::new(200.0, 100)
    }
}

/// Shared token bucket
#[derive(Debug)]
pub struct RateLimiter {
    limiter: DirectLimiter,
    policy: RateLimitPolicy,
    granted: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter with the given policy
    pub fn new(policy: RateLimitPolicy) -> Result<Self> {
        let quota = policy.to_quota()?;
        debug!(
            requests_per_second = policy.requests_per_second,
            burst_limit = policy.burst_limit,
            "Rate limiter created"
        );
        Ok(Self {
            limiter: GovernorRateLimiter::direct(quota),
            policy,
            granted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        })
    }

    /// Create a rate limiter with the standard policy
    pub fn standard() -> Result<Self> {
        Self::new(policies::standard())
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Suspend until one token is available, then take it
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            trace!("Rate limit reached, waiting for a token");
            self.limiter.until_ready().await;
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Suspend until `n` tokens are available, then take them all at once.
    ///
    /// Fails when `n` exceeds the bucket capacity, since such a request could
    /// never be satisfied.
    pub async fn acquire_n(&self, n: u32) -> Result<()> {
        let Some(cells) = NonZeroU32::new(n) else {
            return Ok(());
        };
        match self.limiter.check_n(cells) {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                trace!(tokens = n, "Rate limit reached, waiting for tokens");
                self.limiter
                    .until_n_ready(cells)
                    .await
                    .map_err(|_| self.capacity_error(n))?;
            }
            Err(_) => return Err(self.capacity_error(n)),
        }
        self.granted.fetch_add(u64::from(n), Ordering::Relaxed);
        Ok(())
    }

    /// Take one token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let ok = self.limiter.check().is_ok();
        if ok {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Take `n` tokens if all of them are available right now
    pub fn try_acquire_n(&self, n: u32) -> bool {
        let Some(cells) = NonZeroU32::new(n) else {
            return true;
        };
        let ok = matches!(self.limiter.check_n(cells), Ok(Ok(())));
        if ok {
            self.granted.fetch_add(u64::from(n), Ordering::Relaxed);
        }
        ok
    }

    /// Whether a request for `n` tokens can ever be satisfied
    pub fn can_satisfy(&self, n: u32) -> bool {
        n <= self.policy.burst_limit
    }

    /// Get the current rate limit status
    pub fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            policy: self.policy.clone(),
            tokens_granted: self.granted.load(Ordering::Relaxed),
            throttled_requests: self.throttled.load(Ordering::Relaxed),
        }
    }

    fn capacity_error(&self, n: u32) -> ReconError {
        ReconError::config(format!(
            "Requested {} tokens but burst_limit is {}",
            n, self.policy.burst_limit
        ))
    }
}

/// Rate limit status information
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    /// Current rate limit policy
    pub policy: RateLimitPolicy,
    /// Tokens handed out since creation
    pub tokens_granted: u64,
    /// Acquisitions that had to wait for a refill
    pub throttled_requests: u64,
}
