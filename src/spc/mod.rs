//! Statistical Process Control
//!
//! Daily defect-rate control chart over persisted wafer history.
//!
//! ```text
//! records ──► daily buckets (UTC) ──► CL / σ / UCL / LCL ──► per-point zone + rules
//!                                                           └─► summary + status
//! ```
//!
//! Rates are percent. σ is the sample standard deviation of the bucket rates.
//! Rules are evaluated per point with a sliding lookback; a point may violate
//! several rules at once.

use chrono::{Duration, NaiveDate, Utc};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::SpcConfig;
use crate::storage::{HistoryFilter, StorageError, WaferRepository};
use crate::types::{
    ControlLimits, ProcessStatus, RuleViolation, SpcBucket, SpcDataPoint, SpcReport, SpcSummary, WaferAnalysis,
    WesternElectricRule, Zone,
};

/// Control limit width in standard deviations.
const SIGMA_MULTIPLIER: f64 = 3.0;

/// Group records into one bucket per UTC day, oldest first. Empty days are absent.
pub fn daily_buckets(records: &[WaferAnalysis]) -> Vec<SpcBucket> {
    let mut days: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for record in records {
        let entry = days.entry(record.timestamp().date_naive()).or_insert((0, 0));
        entry.0 += 1;
        if record.is_defective() {
            entry.1 += 1;
        }
    }
    days.into_iter()
        .map(|(date, (total, defective))| SpcBucket { date, total, defective })
        .collect()
}

/// Limits for a window of rates. Fewer than two rates gives wide-open limits.
pub fn control_limits(rates: &[f64]) -> ControlLimits {
    if rates.len() < 2 {
        return ControlLimits {
            center_line: rates.first().copied().unwrap_or(0.0),
            ucl: 100.0,
            lcl: 0.0,
            std_dev: 0.0,
            sample_count: rates.len(),
        };
    }

    let mean = rates.iter().mean();
    let std_dev = rates.iter().std_dev();
    ControlLimits {
        center_line: mean,
        ucl: (mean + SIGMA_MULTIPLIER * std_dev).clamp(0.0, 100.0),
        lcl: (mean - SIGMA_MULTIPLIER * std_dev).clamp(0.0, 100.0),
        std_dev,
        sample_count: rates.len(),
    }
}

/// Zone of a single rate relative to the limits.
pub fn zone_of(rate: f64, limits: &ControlLimits) -> Zone {
    let distance = (rate - limits.center_line).abs();
    if rate > limits.ucl || rate < limits.lcl {
        Zone::OutOfControl
    } else if distance > 2.0 * limits.std_dev {
        Zone::ZoneA
    } else if distance > limits.std_dev {
        Zone::ZoneB
    } else {
        Zone::ZoneC
    }
}

/// Rules violated by the point at `i`, in rule order.
fn violations_at(rates: &[f64], i: usize, limits: &ControlLimits) -> Vec<WesternElectricRule> {
    let cl = limits.center_line;
    let sigma = limits.std_dev;
    let rate = rates[i];
    let mut fired = Vec::new();

    if rate > limits.ucl || rate < limits.lcl {
        fired.push(WesternElectricRule::Rule1);
    }

    // n of the last `window` points strictly beyond `k`σ on one side
    let beyond = |window: usize, k: f64, needed: usize| {
        let recent = &rates[i + 1 - window..=i];
        let above = recent.iter().filter(|&&v| v > cl + k * sigma).count();
        let below = recent.iter().filter(|&&v| v < cl - k * sigma).count();
        above >= needed || below >= needed
    };

    if i >= 2 && beyond(3, 2.0, 2) {
        fired.push(WesternElectricRule::Rule2);
    }
    if i >= 4 && beyond(5, 1.0, 4) {
        fired.push(WesternElectricRule::Rule3);
    }
    if i >= 7 {
        let recent = &rates[i - 7..=i];
        if recent.iter().all(|&v| v > cl) || recent.iter().all(|&v| v < cl) {
            fired.push(WesternElectricRule::Rule4);
        }
    }
    fired
}

/// Zone and rule evaluation for every bucket.
///
/// Rules need at least two samples behind the limits; below that only the
/// zone is reported.
pub fn evaluate(buckets: &[SpcBucket], limits: &ControlLimits) -> Vec<SpcDataPoint> {
    let rates: Vec<f64> = buckets.iter().map(SpcBucket::rate).collect();
    let evaluate_rules = limits.sample_count >= 2;

    buckets
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            let violations: Vec<RuleViolation> = if evaluate_rules {
                violations_at(&rates, i, limits).into_iter().map(RuleViolation::from).collect()
            } else {
                Vec::new()
            };
            SpcDataPoint {
                date: bucket.date,
                total: bucket.total,
                defective: bucket.defective,
                rate: rates[i],
                zone: zone_of(rates[i], limits),
                out_of_control: !violations.is_empty(),
                violations,
            }
        })
        .collect()
}

pub fn summarize(points: &[SpcDataPoint]) -> SpcSummary {
    let count_rule = |rule: WesternElectricRule| {
        points
            .iter()
            .filter(|p| p.violations.iter().any(|v| v.rule == rule))
            .count()
    };
    let rule1 = count_rule(WesternElectricRule::Rule1);
    let rule2 = count_rule(WesternElectricRule::Rule2);
    let rule3 = count_rule(WesternElectricRule::Rule3);
    let rule4 = count_rule(WesternElectricRule::Rule4);
    let out_of_control = points.iter().filter(|p| p.out_of_control).count();

    let status = if rule1 > 0 {
        ProcessStatus::Unstable
    } else if rule2 + rule3 + rule4 > 0 {
        ProcessStatus::Warning
    } else {
        ProcessStatus::Stable
    };

    SpcSummary {
        total_points: points.len(),
        out_of_control_points: out_of_control,
        out_of_control_rate: if points.is_empty() {
            0.0
        } else {
            out_of_control as f64 / points.len() as f64 * 100.0
        },
        rule1_violations: rule1,
        rule2_violations: rule2,
        rule3_violations: rule3,
        rule4_violations: rule4,
        status,
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Builds SPC reports from the wafer store.
#[derive(Debug, Clone, Default)]
pub struct SpcEngine {
    config: SpcConfig,
}

impl SpcEngine {
    pub fn new(config: SpcConfig) -> Self {
        Self { config }
    }

    /// Requested window, defaulted and clamped to `1..=max_window_days`.
    pub fn window_days(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_window_days)
            .clamp(1, self.config.max_window_days.max(1))
    }

    /// Chart the last `days` days, optionally for one tool.
    pub fn report(
        &self,
        store: &dyn WaferRepository,
        days: Option<u32>,
        tool_id: Option<&str>,
    ) -> Result<SpcReport, StorageError> {
        let window_days = self.window_days(days);
        let filter = HistoryFilter {
            tool_id: tool_id.map(str::to_string),
            ..HistoryFilter::since(Utc::now() - Duration::days(i64::from(window_days)))
        };
        let records = store.history(&filter)?;
        let report = Self::chart(&daily_buckets(&records), window_days, tool_id);
        debug!(
            window_days,
            tool_id = tool_id.unwrap_or("all"),
            points = report.points.len(),
            status = ?report.summary.status,
            "SPC report built"
        );
        Ok(report)
    }

    /// Chart precomputed buckets.
    pub fn chart(buckets: &[SpcBucket], window_days: u32, tool_id: Option<&str>) -> SpcReport {
        let rates: Vec<f64> = buckets.iter().map(SpcBucket::rate).collect();
        let limits = control_limits(&rates);
        let points = evaluate(buckets, &limits);
        let summary = summarize(&points);
        SpcReport {
            window_days,
            tool_id: tool_id.map(str::to_string),
            limits,
            points,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{fail, pass};
    use crate::storage::InMemoryWaferStore;
    use crate::types::DefectPattern;

    fn buckets(rates: &[u64]) -> Vec<SpcBucket> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        rates
            .iter()
            .enumerate()
            .map(|(i, &r)| SpcBucket {
                date: start + Duration::days(i as i64),
                total: 100,
                defective: r,
            })
            .collect()
    }

    fn fixed_limits() -> ControlLimits {
        // CL 10%, σ 2%
        ControlLimits {
            center_line: 10.0,
            ucl: 16.0,
            lcl: 4.0,
            std_dev: 2.0,
            sample_count: 20,
        }
    }

    fn rules(point: &SpcDataPoint) -> Vec<WesternElectricRule> {
        point.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_point_beyond_three_sigma_is_rule1() {
        let points = evaluate(&buckets(&[10, 17]), &fixed_limits());
        assert_eq!(rules(&points[1]), vec![WesternElectricRule::Rule1]);
        assert_eq!(points[1].zone, Zone::OutOfControl);
        assert!(points[1].out_of_control);
        assert!(points[0].violations.is_empty());
        assert_eq!(summarize(&points).status, ProcessStatus::Unstable);
    }

    #[test]
    fn test_two_of_three_beyond_two_sigma() {
        let points = evaluate(&buckets(&[10, 15, 15]), &fixed_limits());
        assert_eq!(rules(&points[2]), vec![WesternElectricRule::Rule2]);
        assert_eq!(points[2].zone, Zone::ZoneA);
        // Lookback not yet available at index 1
        assert!(points[1].violations.is_empty());
        assert_eq!(summarize(&points).status, ProcessStatus::Warning);
    }

    #[test]
    fn test_four_of_five_beyond_one_sigma() {
        let points = evaluate(&buckets(&[10, 13, 13, 13, 13]), &fixed_limits());
        assert_eq!(rules(&points[4]), vec![WesternElectricRule::Rule3]);
        assert_eq!(points[4].zone, Zone::ZoneB);
    }

    #[test]
    fn test_eight_on_one_side() {
        let points = evaluate(&buckets(&[11; 8]), &fixed_limits());
        assert!(points[..7].iter().all(|p| p.violations.is_empty()));
        assert_eq!(rules(&points[7]), vec![WesternElectricRule::Rule4]);
        assert_eq!(points[7].zone, Zone::ZoneC);

        let summary = summarize(&points);
        assert_eq!(summary.rule4_violations, 1);
        assert_eq!(summary.out_of_control_points, 1);
        assert!((summary.out_of_control_rate - 12.5).abs() < 1e-9);
        assert_eq!(summary.status, ProcessStatus::Warning);
    }

    #[test]
    fn test_multiple_rules_on_one_point() {
        let points = evaluate(&buckets(&[10, 17, 17]), &fixed_limits());
        assert_eq!(
            rules(&points[2]),
            vec![WesternElectricRule::Rule1, WesternElectricRule::Rule2]
        );
    }

    #[test]
    fn test_control_limits_from_rates() {
        let limits = control_limits(&[10.0, 20.0]);
        assert!((limits.center_line - 15.0).abs() < 1e-9);
        assert!((limits.std_dev - 50f64.sqrt()).abs() < 1e-9);
        assert!((limits.ucl - (15.0 + 3.0 * 50f64.sqrt())).abs() < 1e-9);
        assert_eq!(limits.lcl, 0.0);
        assert_eq!(limits.sample_count, 2);
    }

    #[test]
    fn test_sparse_window_is_stable() {
        let empty = SpcEngine::chart(&[], 30, None);
        assert_eq!(empty.limits.center_line, 0.0);
        assert_eq!(empty.limits.ucl, 100.0);
        assert_eq!(empty.summary.status, ProcessStatus::Stable);
        assert_eq!(empty.summary.total_points, 0);

        let single = SpcEngine::chart(&buckets(&[40]), 30, None);
        assert_eq!(single.limits.center_line, 40.0);
        assert_eq!(single.limits.std_dev, 0.0);
        assert!(single.points[0].violations.is_empty());
        assert_eq!(single.summary.status, ProcessStatus::Stable);
    }

    #[test]
    fn test_window_clamp() {
        let engine = SpcEngine::default();
        assert_eq!(engine.window_days(None), 30);
        assert_eq!(engine.window_days(Some(0)), 1);
        assert_eq!(engine.window_days(Some(10_000)), 365);
    }

    #[test]
    fn test_report_from_store_filters_tool() {
        let store = InMemoryWaferStore::new();
        let now = Utc::now();
        for day in 0..3 {
            let at = now - Duration::days(day);
            store.insert(&fail(&format!("a{day}"), at, "TOOL-1", DefectPattern::Scratch)).unwrap();
            store.insert(&pass(&format!("b{day}"), at, "TOOL-1")).unwrap();
            store.insert(&pass(&format!("c{day}"), at, "TOOL-2")).unwrap();
        }
        // Outside the window
        store
            .insert(&fail("old", now - Duration::days(90), "TOOL-1", DefectPattern::Loc))
            .unwrap();

        let report = SpcEngine::default().report(&store, Some(30), Some("TOOL-1")).unwrap();
        assert_eq!(report.points.len(), 3);
        assert!(report.points.iter().all(|p| p.total == 2 && p.defective == 1));
        assert!((report.limits.center_line - 50.0).abs() < 1e-9);
        assert_eq!(report.limits.std_dev, 0.0);
        assert_eq!(report.summary.status, ProcessStatus::Stable);
        assert!(report.points.windows(2).all(|w| w[0].date < w[1].date));
    }
}
