//! Aggregates derived from persisted wafer history: lot summaries, SPC
//! control charts and root-cause analysis reports.
//!
//! None of these are authoritative state. They are recomputed on demand.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{DefectPattern, Severity};

/// Action priority used by lot recommendations and RCA actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

// ============================================================================
// Lot / Trend
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternCount {
    pub pattern: DefectPattern,
    pub count: usize,
    /// Share of all wafers in the lot, percent
    pub percentage: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystematicIssue {
    pub pattern: DefectPattern,
    pub count: usize,
    pub hypothesis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotRecommendation {
    pub priority: Priority,
    pub action: String,
    pub pattern: Option<DefectPattern>,
}

/// Aggregate over the wafers uploaded together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotAnalysis {
    pub lot_id: Option<String>,
    pub total_wafers: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    /// Pass rate, percent
    pub yield_rate: f64,
    /// Defect rate, percent
    pub defect_rate: f64,
    /// Counts per pattern, descending
    pub distribution: Vec<PatternCount>,
    pub systematic_issues: Vec<SystematicIssue>,
    pub recommendations: Vec<LotRecommendation>,
    /// Defect rate exceeded the configured lot threshold
    pub alert: bool,
}

// ============================================================================
// SPC
// ============================================================================

/// Control limits for one query window (rates in percent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ControlLimits {
    pub center_line: f64,
    pub ucl: f64,
    pub lcl: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

/// Distance band of a point from the center line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    OutOfControl,
    ZoneA,
    ZoneB,
    ZoneC,
}

/// Western Electric rules, in evaluation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WesternElectricRule {
    /// One point beyond 3σ
    Rule1,
    /// 2 of 3 beyond 2σ, same side
    Rule2,
    /// 4 of 5 beyond 1σ, same side
    Rule3,
    /// 8 in a row on one side
    Rule4,
}

impl WesternElectricRule {
    pub const ALL: [WesternElectricRule; 4] = [
        WesternElectricRule::Rule1,
        WesternElectricRule::Rule2,
        WesternElectricRule::Rule3,
        WesternElectricRule::Rule4,
    ];

    pub fn severity(&self) -> &'static str {
        match self {
            WesternElectricRule::Rule1 => "critical",
            WesternElectricRule::Rule2 => "high",
            WesternElectricRule::Rule3 | WesternElectricRule::Rule4 => "medium",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WesternElectricRule::Rule1 => "Point beyond 3σ control limit",
            WesternElectricRule::Rule2 => "2 of 3 consecutive points beyond 2σ on the same side",
            WesternElectricRule::Rule3 => "4 of 5 consecutive points beyond 1σ on the same side",
            WesternElectricRule::Rule4 => "8 consecutive points on the same side of the center line",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleViolation {
    pub rule: WesternElectricRule,
    pub severity: String,
    pub description: String,
}

impl From<WesternElectricRule> for RuleViolation {
    fn from(rule: WesternElectricRule) -> Self {
        Self {
            rule,
            severity: rule.severity().to_string(),
            description: rule.description().to_string(),
        }
    }
}

/// Time-bucketed observation fed to the SPC engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpcBucket {
    pub date: NaiveDate,
    pub total: u64,
    pub defective: u64,
}

impl SpcBucket {
    /// Defect rate, percent.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.defective as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpcDataPoint {
    pub date: NaiveDate,
    pub total: u64,
    pub defective: u64,
    pub rate: f64,
    pub zone: Zone,
    pub violations: Vec<RuleViolation>,
    pub out_of_control: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stable,
    Warning,
    Unstable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpcSummary {
    pub total_points: usize,
    pub out_of_control_points: usize,
    /// Percent of points with any violation
    pub out_of_control_rate: f64,
    pub rule1_violations: usize,
    pub rule2_violations: usize,
    pub rule3_violations: usize,
    pub rule4_violations: usize,
    pub status: ProcessStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpcReport {
    pub window_days: u32,
    pub tool_id: Option<String>,
    pub limits: ControlLimits,
    pub points: Vec<SpcDataPoint>,
    pub summary: SpcSummary,
}

// ============================================================================
// RCA
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefectRate {
    pub tool_id: String,
    pub total: usize,
    pub defective: usize,
    /// percent
    pub defect_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeeklyCount {
    pub week_start: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhyStep {
    /// 1-based position in the chain
    pub level: u8,
    pub question: String,
    pub answer: String,
}

/// Ishikawa diagram with one field per 6M category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fishbone {
    pub man: Vec<String>,
    pub machine: Vec<String>,
    pub material: Vec<String>,
    pub method: Vec<String>,
    pub measurement: Vec<String>,
    pub environment: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectiveAction {
    pub priority: Priority,
    pub action: String,
    pub owner: String,
    pub due_in_hours: u32,
    pub due: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreventiveAction {
    pub priority: Priority,
    pub action: String,
    pub owner: String,
    pub due_in_hours: u32,
    pub due: String,
    pub expected_impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RcaData {
    pub generated_at: DateTime<Utc>,
    pub lookback_days: u32,
    pub total_wafers: usize,
    pub total_defects: usize,
    /// FAIL counts per pattern, descending
    pub distribution: Vec<(DefectPattern, usize)>,
    pub top_pattern: Option<DefectPattern>,
    /// Sorted by defect rate, descending
    pub tool_rates: Vec<ToolDefectRate>,
    pub worst_tool: Option<String>,
    pub weekly_trend: Vec<WeeklyCount>,
    pub trend_direction: TrendDirection,
    pub five_whys: Vec<WhyStep>,
    pub root_cause: String,
    pub fishbone: Fishbone,
    pub corrective_actions: Vec<CorrectiveAction>,
    pub preventive_actions: Vec<PreventiveAction>,
}
