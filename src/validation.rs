//! # Input Validation Module
//!
//! Syntactic checks shared by the target resolver, the module registry and
//! the configuration layer. Nothing here touches the network.

use crate::constants::validation::{
    MAX_GRACE_PERIOD_MS, MAX_LABEL_LENGTH, MAX_MODULE_ID_LENGTH, MAX_TARGET_LENGTH,
    MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
use crate::error::{ReconError, Result};
use std::time::Duration;

/// Checks a lower-cased host name against the accepted domain form.
///
/// A domain needs at least two labels, each 1-63 characters of `[a-z0-9-]`
/// without a leading or trailing hyphen, and an alphabetic TLD of at least two
/// characters (`xn--` IDN TLDs are accepted too).
pub fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    if domain.is_empty() {
        return Err("domain is empty".to_string());
    }
    if domain.len() > MAX_TARGET_LENGTH {
        return Err(format!("domain exceeds {} characters", MAX_TARGET_LENGTH));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain needs at least two labels".to_string());
    }

    for label in &labels {
        if label.is_empty() {
            return Err("domain contains an empty label".to_string());
        }
        if label.len() > MAX_LABEL_LENGTH {
            return Err(format!("label '{}' exceeds {} characters", label, MAX_LABEL_LENGTH));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!("label '{}' contains invalid characters", label));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with a hyphen", label));
        }
    }

    // labels is non-empty, checked above
    let tld = labels[labels.len() - 1];
    let idn = tld.starts_with("xn--") && tld.len() > 4;
    if !idn && (tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_lowercase())) {
        return Err(format!("'{}' is not a valid top-level domain", tld));
    }

    Ok(())
}

/// Validates a timeout value in milliseconds
pub fn validate_timeout_ms(timeout_ms: u64) -> Result<u64> {
    if timeout_ms < MIN_TIMEOUT_MS {
        return Err(ReconError::validation("Timeout must be at least 1ms"));
    }
    if timeout_ms > MAX_TIMEOUT_MS {
        return Err(ReconError::validation(format!(
            "Timeout cannot exceed {}ms",
            MAX_TIMEOUT_MS
        )));
    }
    Ok(timeout_ms)
}

/// Validates a timeout given as a `Duration`
pub fn validate_timeout(timeout: Duration) -> Result<u64> {
    let ms = u64::try_from(timeout.as_millis()).map_err(|_| {
        ReconError::validation(format!("Timeout cannot exceed {}ms", MAX_TIMEOUT_MS))
    })?;
    validate_timeout_ms(ms)
}

/// Validates the grace period given to cancelled modules (zero is allowed)
pub fn validate_grace_period(grace: Duration) -> Result<u64> {
    match u64::try_from(grace.as_millis()) {
        Ok(ms) if ms <= MAX_GRACE_PERIOD_MS => Ok(ms),
        _ => Err(ReconError::validation(format!(
            "Grace period cannot exceed {}ms",
            MAX_GRACE_PERIOD_MS
        ))),
    }
}

/// Validates a module identifier (`[a-z0-9_-]`, 1-64 characters)
pub fn validate_module_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ReconError::validation("Module id cannot be empty"));
    }
    if id.len() > MAX_MODULE_ID_LENGTH {
        return Err(ReconError::validation(format!(
            "Module id '{}' exceeds {} characters",
            id, MAX_MODULE_ID_LENGTH
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ReconError::validation(format!(
            "Module id '{}' may only contain lowercase letters, digits, '_' and '-'",
            id
        )));
    }
    Ok(())
}

/// Validates rate limiter parameters
pub fn validate_rate(requests_per_second: f64, burst_limit: u32) -> Result<()> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return Err(ReconError::validation(
            "requests_per_second must be a positive number",
        ));
    }
    if burst_limit == 0 {
        return Err(ReconError::validation("burst_limit must be at least 1"));
    }
    Ok(())
}
