//! Lot aggregation
//!
//! Groups FAIL records by defect pattern (the no-defect label is excluded),
//! ranks them Pareto style and derives systematic-issue hypotheses plus
//! prioritized recommendations from the pattern knowledge tables.

use std::collections::BTreeMap;

use crate::config::LotConfig;
use crate::playbook;
use crate::types::{
    DefectPattern, LotAnalysis, LotRecommendation, PatternCount, Priority, Severity, SystematicIssue, WaferAnalysis,
};

/// Systematic issues reported per lot.
const MAX_SYSTEMATIC_ISSUES: usize = 2;

/// Lot severity of a pattern from its count: >3 High, >1 Medium, else Low.
pub fn count_severity(count: usize) -> Severity {
    match count {
        c if c > 3 => Severity::High,
        c if c > 1 => Severity::Medium,
        _ => Severity::Low,
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Aggregate a batch of wafer records.
pub fn analyze_lot(lot_id: Option<&str>, records: &[WaferAnalysis], config: &LotConfig) -> LotAnalysis {
    let total = records.len();
    let fail_count = records.iter().filter(|r| r.is_defective()).count();
    let pass_count = total - fail_count;

    let mut counts: BTreeMap<DefectPattern, usize> = BTreeMap::new();
    for pattern in records.iter().filter_map(WaferAnalysis::defect_pattern) {
        *counts.entry(pattern).or_insert(0) += 1;
    }
    let mut distribution: Vec<PatternCount> = counts
        .into_iter()
        .map(|(pattern, count)| PatternCount {
            pattern,
            count,
            percentage: percent(count, total),
            severity: count_severity(count),
        })
        .collect();
    // Stable: equal counts keep canonical pattern order
    distribution.sort_by(|a, b| b.count.cmp(&a.count));

    let systematic_issues: Vec<SystematicIssue> = distribution
        .iter()
        .take(MAX_SYSTEMATIC_ISSUES)
        .map(|pc| SystematicIssue {
            pattern: pc.pattern,
            count: pc.count,
            hypothesis: playbook::pattern(pc.pattern).lot_hypothesis.to_string(),
        })
        .collect();

    let recommendations = if systematic_issues.is_empty() {
        vec![LotRecommendation {
            priority: Priority::Low,
            action: "No systematic defects detected. Continue monitoring.".to_string(),
            pattern: None,
        }]
    } else {
        systematic_issues
            .iter()
            .enumerate()
            .map(|(i, issue)| LotRecommendation {
                priority: if i == 0 { Priority::Critical } else { Priority::High },
                action: format!(
                    "{} ({} wafers): {}",
                    issue.pattern,
                    issue.count,
                    playbook::pattern(issue.pattern).lot_actions.join("; ")
                ),
                pattern: Some(issue.pattern),
            })
            .collect()
    };

    let defect_rate = percent(fail_count, total);
    LotAnalysis {
        lot_id: lot_id.map(str::to_string),
        total_wafers: total,
        pass_count,
        fail_count,
        yield_rate: percent(pass_count, total),
        defect_rate,
        distribution,
        systematic_issues,
        recommendations,
        alert: defect_rate > config.defect_rate_alert_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{fail, pass};
    use chrono::Utc;

    fn lot(patterns: &[DefectPattern], passes: usize) -> Vec<WaferAnalysis> {
        let now = Utc::now();
        let mut out: Vec<_> = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| fail(&format!("f{i}"), now, "TOOL-1", *p))
            .collect();
        out.extend((0..passes).map(|i| pass(&format!("p{i}"), now, "TOOL-1")));
        out
    }

    #[test]
    fn test_count_severity() {
        assert_eq!(count_severity(4), Severity::High);
        assert_eq!(count_severity(2), Severity::Medium);
        assert_eq!(count_severity(1), Severity::Low);
    }

    #[test]
    fn test_yield_of_ten_with_three_failures() {
        let records = lot(&[DefectPattern::Scratch, DefectPattern::Scratch, DefectPattern::Center], 7);
        let a = analyze_lot(Some("LOT-1"), &records, &LotConfig::default());
        assert_eq!(a.total_wafers, 10);
        assert!((a.yield_rate - 70.0).abs() < 1e-9);
        assert!((a.defect_rate - 30.0).abs() < 1e-9);
        assert!(a.alert);
        assert_eq!(a.distribution[0].pattern, DefectPattern::Scratch);
        assert_eq!(a.distribution[0].severity, Severity::Medium);
        assert_eq!(a.recommendations[0].priority, Priority::Critical);
        assert_eq!(a.recommendations[1].priority, Priority::High);
        assert_eq!(a.systematic_issues.len(), 2);
    }

    #[test]
    fn test_distribution_sorted_and_capped_issues() {
        let records = lot(
            &[
                DefectPattern::Donut,
                DefectPattern::EdgeRing,
                DefectPattern::EdgeRing,
                DefectPattern::EdgeRing,
                DefectPattern::EdgeRing,
                DefectPattern::Loc,
                DefectPattern::Loc,
            ],
            0,
        );
        let a = analyze_lot(None, &records, &LotConfig::default());
        let order: Vec<_> = a.distribution.iter().map(|d| (d.pattern, d.count)).collect();
        assert_eq!(
            order,
            vec![(DefectPattern::EdgeRing, 4), (DefectPattern::Loc, 2), (DefectPattern::Donut, 1)]
        );
        assert_eq!(a.distribution[0].severity, Severity::High);
        assert_eq!(a.systematic_issues.len(), 2);
        assert_eq!(a.systematic_issues[0].hypothesis, "Edge bead removal (EBR) process deviation");
    }

    #[test]
    fn test_clean_lot_falls_back_to_monitoring() {
        let a = analyze_lot(None, &lot(&[], 5), &LotConfig::default());
        assert!(a.distribution.is_empty());
        assert_eq!(a.recommendations.len(), 1);
        assert!(a.recommendations[0].action.contains("Continue monitoring"));
        assert_eq!(a.yield_rate, 100.0);
        assert!(!a.alert);
    }

    #[test]
    fn test_empty_lot() {
        let a = analyze_lot(None, &[], &LotConfig::default());
        assert_eq!(a.total_wafers, 0);
        assert_eq!(a.yield_rate, 0.0);
        assert!(!a.alert);
    }
}
