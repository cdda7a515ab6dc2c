//! # Result Aggregation
//!
//! Folds the per-module outcomes of one scan into a single [`ScanResult`].
//! Aggregation is a pure function: outcome order is preserved exactly as
//! given (module start order), the overall status is derived from the
//! outcome statuses, and module discoveries are merged into the result's own
//! copy of the target.

use crate::module::{ModuleOutcome, ModuleStatus};
use crate::target::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Overall status of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Success,
    Partial,
    Error,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub error: usize,
    pub timeout: usize,
    pub skipped: usize,
    /// Outcomes served from the cache
    pub cached: usize,
}

impl ScanSummary {
    fn from_outcomes(outcomes: &[ModuleOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status() {
                ModuleStatus::Success => summary.success += 1,
                ModuleStatus::Partial => summary.partial += 1,
                ModuleStatus::Error => summary.error += 1,
                ModuleStatus::Timeout => summary.timeout += 1,
                ModuleStatus::Skipped => summary.skipped += 1,
            }
            if outcome.is_cached() {
                summary.cached += 1;
            }
        }
        summary
    }

    /// Modules that produced usable output
    pub fn succeeded(&self) -> usize {
        self.success + self.partial
    }

    /// Modules that produced nothing usable
    pub fn failed(&self) -> usize {
        self.error + self.timeout
    }
}

/// The complete record of one scan, owned by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    target: Target,
    status: ScanStatus,
    outcomes: Vec<ModuleOutcome>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    /// Outcomes in module start order
    pub fn outcomes(&self) -> &[ModuleOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, module_id: &str) -> Option<&ModuleOutcome> {
        self.outcomes.iter().find(|o| o.module_id() == module_id)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary::from_outcomes(&self.outcomes)
    }

    pub fn into_outcomes(self) -> Vec<ModuleOutcome> {
        self.outcomes
    }
}

/// Derive the overall scan status from module outcomes
///
/// `error` when something failed and nothing succeeded, `partial` when
/// something succeeded alongside a failure or a partial outcome, otherwise
/// `success`. Skipped outcomes are neutral, so an all-skipped scan succeeds
/// and a skipped module does not prevent an `error` status when every module
/// that ran failed.
pub fn derive_status(outcomes: &[ModuleOutcome]) -> ScanStatus {
    let summary = ScanSummary::from_outcomes(outcomes);
    match (summary.succeeded(), summary.failed()) {
        (0, failed) if failed > 0 => ScanStatus::Error,
        (succeeded, failed) if succeeded > 0 && (failed > 0 || summary.partial > 0) => {
            ScanStatus::Partial
        }
        _ => ScanStatus::Success,
    }
}

/// Build the scan result from outcomes given in module start order
pub fn aggregate(
    target: &Target,
    outcomes: Vec<ModuleOutcome>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> ScanResult {
    let mut merged = target.clone();
    for outcome in &outcomes {
        merged.merge_discoveries(outcome.discoveries());
    }

    ScanResult {
        target: merged,
        status: derive_status(&outcomes),
        outcomes,
        started_at,
        ended_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{resolve, Discoveries};
    use serde_json::json;

    fn outcome(id: &str, status: ModuleStatus) -> ModuleOutcome {
        let now = Utc::now();
        match status {
            ModuleStatus::Success => ModuleOutcome::success(id, json!({"ok": true}), now, now),
            ModuleStatus::Partial => ModuleOutcome::partial(id, json!({}), "half done", now, now),
            ModuleStatus::Error => ModuleOutcome::error(id, "boom", now, now),
            ModuleStatus::Timeout => ModuleOutcome::timeout(id, "too slow", now, now),
            ModuleStatus::Skipped => ModuleOutcome::skipped(id, now),
        }
    }

    fn status_of(statuses: &[ModuleStatus]) -> ScanStatus {
        let outcomes: Vec<_> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| outcome(&format!("m{}", i), *s))
            .collect();
        derive_status(&outcomes)
    }

    #[test]
    fn test_status_derivation() {
        use ModuleStatus::*;
        assert_eq!(status_of(&[Success, Success]), ScanStatus::Success);
        assert_eq!(status_of(&[Error, Timeout]), ScanStatus::Error);
        assert_eq!(status_of(&[Success, Timeout]), ScanStatus::Partial);
        assert_eq!(status_of(&[Success, Partial]), ScanStatus::Partial);
        assert_eq!(status_of(&[Partial]), ScanStatus::Partial);
        assert_eq!(status_of(&[Partial, Error]), ScanStatus::Partial);
        assert_eq!(status_of(&[Skipped, Error]), ScanStatus::Error);
        assert_eq!(status_of(&[Skipped, Success]), ScanStatus::Success);
        assert_eq!(status_of(&[Skipped]), ScanStatus::Success);
    }

    #[test]
    fn test_aggregate_preserves_order() {
        let target = resolve("example.com").unwrap();
        let outcomes = vec![
            outcome("zeta", ModuleStatus::Success),
            outcome("alpha", ModuleStatus::Error),
            outcome("mid", ModuleStatus::Skipped),
        ];
        let now = Utc::now();
        let result = aggregate(&target, outcomes, now, now);

        let ids: Vec<_> = result.outcomes().iter().map(|o| o.module_id()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(result.status(), ScanStatus::Partial);
        assert_eq!(result.outcome("alpha").unwrap().status(), ModuleStatus::Error);
        assert!(result.outcome("ghost").is_none());
    }

    #[test]
    fn test_aggregate_merges_discoveries() {
        let target = resolve("example.com").unwrap();
        let mut found = Discoveries::default();
        found.subdomains.insert("mail.example.com".to_string());
        found.ip_addresses.insert("10.0.0.1".parse().unwrap());
        let now = Utc::now();
        let outcomes = vec![outcome("dns", ModuleStatus::Success).with_discoveries(found)];

        let result = aggregate(&target, outcomes, now, now);
        assert!(result.target().subdomains().contains("mail.example.com"));
        assert_eq!(result.target().ip_addresses().len(), 1);
        // the scan-time target is untouched
        assert!(target.subdomains().is_empty());
    }

    #[test]
    fn test_summary_and_duration() {
        let target = resolve("example.com").unwrap();
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(250);
        let result = aggregate(
            &target,
            vec![
                outcome("a", ModuleStatus::Success),
                outcome("b", ModuleStatus::Timeout),
                outcome("c", ModuleStatus::Skipped),
            ],
            start,
            end,
        );

        let summary = result.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(result.duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_result_serializes() {
        let target = resolve("example.com").unwrap();
        let now = Utc::now();
        let result = aggregate(&target, vec![outcome("a", ModuleStatus::Success)], now, now);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["outcomes"][0]["module_id"], "a");
        assert_eq!(value["target"]["canonical"], "example.com");
    }
}
