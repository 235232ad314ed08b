//! Serializable point-in-time view of a scan session.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use ps_core::{RiskLevel, ScanResult, ScanStatus};
use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

/// Results, counters and per-risk counts captured together.
///
/// Produced by [`ScanManager::snapshot`](crate::ScanManager::snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Model name of the installed analysis client, if any.
    pub model: Option<String>,
    /// Whether the scanner was running.
    pub running: bool,
    /// Configured pool size.
    pub thread_count: usize,
    /// Pipeline counters.
    pub stats: StatsSnapshot,
    /// Result count for every risk level.
    pub risk_counts: BTreeMap<RiskLevel, usize>,
    /// All results in acceptance order.
    pub results: Vec<ScanResult>,
}

impl ScanReport {
    /// Returns completed results at or above `level`, most severe first.
    #[must_use]
    pub fn findings(&self, level: RiskLevel) -> Vec<&ScanResult> {
        let mut findings: Vec<&ScanResult> = self
            .results
            .iter()
            .filter(|r| r.status() == ScanStatus::Completed && r.risk_level() >= level)
            .collect();
        findings.sort_by_key(|r| Reverse(r.risk_level()));
        findings
    }

    /// Renders the results as CSV with a header row.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    ///
    /// use ps_scanner::{ScanReport, StatsSnapshot};
    ///
    /// let report = ScanReport {
    ///     generated_at: chrono::Utc::now(),
    ///     model: None,
    ///     running: false,
    ///     thread_count: 3,
    ///     stats: StatsSnapshot::default(),
    ///     risk_counts: BTreeMap::new(),
    ///     results: Vec::new(),
    /// };
    /// assert_eq!(report.to_csv(), "id,method,url,status,risk,duration_ms,summary\n");
    /// ```
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut output = String::from("id,method,url,status,risk,duration_ms,summary\n");
        for result in &self.results {
            let duration = result
                .duration()
                .map(|d| d.as_millis().to_string())
                .unwrap_or_default();
            let summary = result
                .error_message()
                .or_else(|| result.analysis_result())
                .and_then(|text| text.lines().find(|l| !l.trim().is_empty()))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "{},{},{},{},{},{duration},{}",
                result.id().as_u64(),
                escape_csv(result.method()),
                escape_csv(result.url()),
                result.status().label(),
                result.risk_level().label(),
                escape_csv(summary.trim()),
            );
        }
        output
    }
}

/// Escapes a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}
