//! Root Cause Analysis
//!
//! Turns a lookback window of wafer history into a structured hypothesis:
//! defect Pareto, per-tool defect rates, weekly trend of the leading pattern,
//! a five-step why-chain, a 6M fishbone and CAPA lists.
//!
//! The investigation subject is the most frequent FAIL pattern on the tool
//! with the highest defect rate. Output is for human review; nothing here is
//! a statistically certified causal claim.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::RcaConfig;
use crate::playbook;
use crate::storage::{HistoryFilter, StorageError, WaferRepository};
use crate::types::{
    CorrectiveAction, DefectPattern, Fishbone, PreventiveAction, Priority, RcaData, ToolDefectRate, TrendDirection,
    WaferAnalysis, WeeklyCount, WhyStep,
};

/// Tool label for records without tool metadata.
pub const UNASSIGNED_TOOL: &str = "unassigned";

/// Per-tool totals, highest defect rate first (ties by tool id).
pub fn tool_defect_rates(records: &[WaferAnalysis]) -> Vec<ToolDefectRate> {
    let mut tools: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = tools
            .entry(record.tool_id.as_deref().unwrap_or(UNASSIGNED_TOOL))
            .or_insert((0, 0));
        entry.0 += 1;
        if record.is_defective() {
            entry.1 += 1;
        }
    }
    let mut rates: Vec<ToolDefectRate> = tools
        .into_iter()
        .map(|(tool_id, (total, defective))| ToolDefectRate {
            tool_id: tool_id.to_string(),
            total,
            defective,
            defect_rate: defective as f64 / total as f64 * 100.0,
        })
        .collect();
    rates.sort_by(|a, b| b.defect_rate.total_cmp(&a.defect_rate));
    rates
}

/// FAIL counts per real defect pattern, most frequent first.
pub fn pattern_distribution(records: &[WaferAnalysis]) -> Vec<(DefectPattern, usize)> {
    let mut counts: BTreeMap<DefectPattern, usize> = BTreeMap::new();
    for pattern in records.iter().filter_map(WaferAnalysis::defect_pattern) {
        *counts.entry(pattern).or_insert(0) += 1;
    }
    let mut distribution: Vec<_> = counts.into_iter().collect();
    distribution.sort_by(|a, b| b.1.cmp(&a.1));
    distribution
}

fn due_label(hours: u32) -> String {
    match hours {
        h if h >= 24 * 30 && h % (24 * 30) == 0 => plural(h / (24 * 30), "month"),
        h if h >= 24 * 7 && h % (24 * 7) == 0 => plural(h / (24 * 7), "week"),
        h => plural(h, "hour"),
    }
}

fn plural(n: u32, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn why(level: u8, question: impl Into<String>, answer: impl Into<String>) -> WhyStep {
    WhyStep {
        level,
        question: question.into(),
        answer: answer.into(),
    }
}

/// Investigation subject for one window.
struct Subject<'a> {
    pattern: DefectPattern,
    pattern_count: usize,
    total_defects: usize,
    tool: Option<&'a ToolDefectRate>,
}

#[derive(Debug, Clone, Default)]
pub struct RcaEngine {
    config: RcaConfig,
}

impl RcaEngine {
    pub fn new(config: RcaConfig) -> Self {
        Self { config }
    }

    /// Analyze the configured lookback window ending now.
    pub fn report(&self, store: &dyn WaferRepository) -> Result<RcaData, StorageError> {
        let now = Utc::now();
        let span_days = self.config.lookback_days.max(self.config.trend_weeks * 7);
        let records = store.history(&HistoryFilter::since(now - Duration::days(i64::from(span_days))))?;
        Ok(self.analyze(&records, now))
    }

    /// Analyze `records` as seen at `now`. Records outside the lookback only
    /// feed the weekly trend.
    pub fn analyze(&self, records: &[WaferAnalysis], now: DateTime<Utc>) -> RcaData {
        let since = now - Duration::days(i64::from(self.config.lookback_days));
        let window: Vec<WaferAnalysis> = records
            .iter()
            .filter(|r| r.timestamp() >= since && r.timestamp() <= now)
            .cloned()
            .collect();

        let distribution = pattern_distribution(&window);
        let total_defects: usize = distribution.iter().map(|(_, n)| n).sum();
        let top_pattern = distribution.first().map(|(p, _)| *p);
        let tool_rates = tool_defect_rates(&window);
        let worst = tool_rates.iter().find(|t| t.defect_rate > 0.0);

        let weekly_trend = self.weekly_trend(records, top_pattern, now);
        let trend_direction = match weekly_trend.as_slice() {
            [.., previous, recent] if recent.count > previous.count => TrendDirection::Increasing,
            [.., previous, recent] if recent.count < previous.count => TrendDirection::Decreasing,
            _ => TrendDirection::Stable,
        };

        let subject = distribution.first().map(|&(pattern, pattern_count)| Subject {
            pattern,
            pattern_count,
            total_defects,
            tool: worst,
        });
        let five_whys = match &subject {
            Some(s) => self.five_whys(s, &window, trend_direction),
            None => self.insufficient_data_whys(),
        };
        let root_cause = five_whys.last().map(|s| s.answer.clone()).unwrap_or_default();

        let tool_label = worst.map_or("the affected tool", |t| t.tool_id.as_str());
        let pattern_label = top_pattern.map_or("defect", |p| p.as_str());

        debug!(
            wafers = window.len(),
            total_defects,
            top_pattern = pattern_label,
            worst_tool = tool_label,
            "RCA computed"
        );

        RcaData {
            generated_at: now,
            lookback_days: self.config.lookback_days,
            total_wafers: window.len(),
            total_defects,
            top_pattern,
            worst_tool: worst.map(|t| t.tool_id.clone()),
            fishbone: fishbone(tool_label, pattern_label),
            corrective_actions: corrective_actions(tool_label, pattern_label),
            preventive_actions: preventive_actions(tool_label, pattern_label),
            distribution,
            tool_rates,
            weekly_trend,
            trend_direction,
            five_whys,
            root_cause,
        }
    }

    /// FAIL counts of `pattern` per week, oldest first.
    fn weekly_trend(
        &self,
        records: &[WaferAnalysis],
        pattern: Option<DefectPattern>,
        now: DateTime<Utc>,
    ) -> Vec<WeeklyCount> {
        let weeks = self.config.trend_weeks.max(1) as i32;
        (0..weeks)
            .rev()
            .map(|offset| {
                let end = now - Duration::weeks(i64::from(offset));
                let start = end - Duration::weeks(1);
                let count = match pattern {
                    Some(p) => records
                        .iter()
                        .filter(|r| r.defect_pattern() == Some(p))
                        .filter(|r| r.timestamp() >= start && r.timestamp() < end)
                        .count(),
                    None => 0,
                };
                WeeklyCount {
                    week_start: start.date_naive(),
                    count,
                }
            })
            .collect()
    }

    fn five_whys(&self, subject: &Subject<'_>, window: &[WaferAnalysis], trend: TrendDirection) -> Vec<WhyStep> {
        let pattern = subject.pattern;
        let book = playbook::pattern(pattern);
        let share = subject.pattern_count as f64 / subject.total_defects.max(1) as f64 * 100.0;

        let frequency = why(
            1,
            format!("Why is {pattern} the leading defect pattern?"),
            format!(
                "{} of {} defective wafers ({share:.1}%) in the last {} days show {pattern}; the weekly count is {}.",
                subject.pattern_count,
                subject.total_defects,
                self.config.lookback_days,
                trend_label(trend),
            ),
        );

        let Some(tool) = subject.tool else {
            return vec![
                frequency,
                why(
                    2,
                    format!("Which tool is producing {pattern} defects?"),
                    "No tool stands out: defective wafers carry no usable tool metadata.",
                ),
                why(
                    3,
                    "Which process conditions correlate with the defects?",
                    "Insufficient metadata to correlate defects with chambers or process conditions.",
                ),
                why(4, format!("What mechanism produces {pattern}?"), book.mechanism),
                why(5, "What is the root cause?", book.systemic_gap),
            ];
        };

        let on_tool: Vec<&WaferAnalysis> = window
            .iter()
            .filter(|r| r.defect_pattern() == Some(pattern))
            .filter(|r| r.tool_id.as_deref().unwrap_or(UNASSIGNED_TOOL) == tool.tool_id)
            .collect();

        let correlation = why(
            2,
            format!("Why is {} the focus of the investigation?", tool.tool_id),
            format!(
                "{} has the highest defect rate at {:.1}% ({} of {} wafers) and produced {} of the {} {pattern} defects.",
                tool.tool_id,
                tool.defect_rate,
                tool.defective,
                tool.total,
                on_tool.len(),
                subject.pattern_count,
            ),
        );

        let mut chambers: HashMap<&str, usize> = HashMap::new();
        for record in &on_tool {
            if let Some(chamber) = record.chamber_id.as_deref() {
                *chambers.entry(chamber).or_insert(0) += 1;
            }
        }
        let dominant = chambers
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(c, n)| (*c, *n));
        let process = why(
            3,
            format!("Which process conditions on {} correlate with {pattern}?", tool.tool_id),
            match dominant {
                Some((chamber, n)) if chambers.len() > 1 && n * 2 > on_tool.len() => format!(
                    "Chamber {chamber} accounts for {n} of {} {pattern} defects on {}, pointing at chamber-specific hardware or recipe offsets.",
                    on_tool.len(),
                    tool.tool_id
                ),
                Some((chamber, _)) if chambers.len() == 1 => format!(
                    "All chamber-tagged {pattern} defects on {} come from chamber {chamber}.",
                    tool.tool_id
                ),
                Some(_) => format!(
                    "{pattern} defects on {} are spread across {} chambers, pointing at a tool-level rather than chamber-level condition.",
                    tool.tool_id,
                    chambers.len()
                ),
                None => format!("No chamber metadata recorded for {pattern} defects on {}.", tool.tool_id),
            },
        );

        vec![
            frequency,
            correlation,
            process,
            why(4, format!("Why would {} produce {pattern} defects?", tool.tool_id), book.mechanism),
            why(5, "What is the root cause?", book.systemic_gap),
        ]
    }

    fn insufficient_data_whys(&self) -> Vec<WhyStep> {
        vec![
            why(
                1,
                "Why are defects occurring?",
                format!("Insufficient data: no defective wafers in the last {} days.", self.config.lookback_days),
            ),
            why(2, "Which tool is involved?", "Insufficient data to correlate defects with tools."),
            why(
                3,
                "Which process conditions correlate with the defects?",
                "Insufficient data to correlate defects with chambers or process conditions.",
            ),
            why(4, "What mechanism is responsible?", "Insufficient data to infer a failure mechanism."),
            why(
                5,
                "What is the root cause?",
                "Insufficient data: continue collecting inspection history before drawing conclusions.",
            ),
        ]
    }
}

fn trend_label(trend: TrendDirection) -> &'static str {
    match trend {
        TrendDirection::Increasing => "increasing",
        TrendDirection::Decreasing => "decreasing",
        TrendDirection::Stable => "stable",
    }
}

// ============================================================================
// Fishbone and CAPA tables
// ============================================================================

fn fishbone(tool: &str, pattern: &str) -> Fishbone {
    let owned = |items: [&str; 3]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    Fishbone {
        man: vec![
            format!("Operator training on {tool} handling procedures"),
            "Shift handoff communication gaps".to_string(),
            "Recipe selection errors".to_string(),
        ],
        machine: vec![
            format!("{tool} requires maintenance inspection"),
            "Sensor calibration due for review".to_string(),
            "Component wear based on usage hours".to_string(),
        ],
        material: owned([
            "Incoming wafer quality variation",
            "Photoresist batch consistency",
            "Chemical lot changes",
        ]),
        method: vec![
            "Recipe parameter optimization needed".to_string(),
            "Process step sequence review".to_string(),
            format!("SPC alerts for {pattern} pattern"),
        ],
        measurement: owned([
            "Metrology sampling frequency",
            "Defect detection sensitivity",
            "Measurement recipe accuracy",
        ]),
        environment: owned([
            "Cleanroom particle counts",
            "Temperature/humidity stability",
            "AMC (airborne molecular contamination)",
        ]),
    }
}

fn corrective(priority: Priority, action: String, owner: &str, hours: u32, rationale: String) -> CorrectiveAction {
    CorrectiveAction {
        priority,
        action,
        owner: owner.to_string(),
        due_in_hours: hours,
        due: due_label(hours),
        rationale,
    }
}

fn corrective_actions(tool: &str, pattern: &str) -> Vec<CorrectiveAction> {
    vec![
        corrective(
            Priority::Critical,
            format!("Perform immediate maintenance inspection on {tool}"),
            "Equipment Engineering",
            24,
            format!("{tool} has the highest defect contribution"),
        ),
        corrective(
            Priority::High,
            format!("Run qualification wafers on {tool} after maintenance"),
            "Process Engineering",
            48,
            "Verify equipment performance before resuming production".to_string(),
        ),
        corrective(
            Priority::High,
            format!("Review recent {pattern} defects for common characteristics"),
            "Defect Engineering",
            48,
            format!("{pattern} is the dominant defect pattern"),
        ),
        corrective(
            Priority::Medium,
            "Audit wafer handling procedures across all shifts".to_string(),
            "Manufacturing",
            24 * 7,
            "Rule out human factors as a contributing cause".to_string(),
        ),
    ]
}

fn preventive(priority: Priority, action: String, owner: &str, hours: u32, impact: &str) -> PreventiveAction {
    PreventiveAction {
        priority,
        action,
        owner: owner.to_string(),
        due_in_hours: hours,
        due: due_label(hours),
        expected_impact: impact.to_string(),
    }
}

fn preventive_actions(tool: &str, pattern: &str) -> Vec<PreventiveAction> {
    vec![
        preventive(
            Priority::High,
            format!("Add {pattern}-specific SPC monitoring with automated alerts"),
            "Yield Engineering",
            24 * 14,
            "Early detection of pattern recurrence",
        ),
        preventive(
            Priority::High,
            format!("Update PM schedule for {tool} based on defect correlation"),
            "Equipment Engineering",
            24 * 14,
            "Prevent equipment-related defects",
        ),
        preventive(
            Priority::Medium,
            "Implement tool-specific defect dashboards".to_string(),
            "IT/Analytics",
            24 * 30,
            "Faster identification of tool issues",
        ),
        preventive(
            Priority::Medium,
            "Create defect pattern training module for operators".to_string(),
            "Training",
            24 * 30,
            "Improved defect recognition and escalation",
        ),
        preventive(
            Priority::Low,
            "Evaluate predictive maintenance solutions".to_string(),
            "Equipment Engineering",
            24 * 90,
            "Proactive equipment issue prevention",
        ),
    ]
}
