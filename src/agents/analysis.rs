//! Analysis Stage - consistency score, ambiguity and severity
//!
//! Pure function of the selected distribution plus a snapshot of recent
//! defect history. The consistency score starts at 1.0 and subtracts
//! configured penalties:
//!
//! | Condition                                   | Penalty |
//! |---------------------------------------------|---------|
//! | confidence < 0.3                            | 0.3     |
//! | else confidence < 0.5                       | 0.1     |
//! | more than two defect labels above the cut   | 0.2     |
//! | no-defect top label while major issues exist| 0.3     |
//! | margin term (weight 0 by default)           | w·(1−margin)·H |
//!
//! Severity follows the confidence bands and escalates one level when the
//! pattern dominates recent FAIL history.

use std::collections::BTreeMap;

use tracing::debug;

use super::Stage;
use crate::config::AnalysisConfig;
use crate::error::InspectionError;
use crate::types::{AnalysisDetail, DefectPattern, ProbabilityDistribution, Recommendation, Severity, WaferAnalysis};

/// Pattern counts over recent FAIL records, used for severity escalation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternHistory {
    pub total_fail: usize,
    pub by_pattern: BTreeMap<DefectPattern, usize>,
}

impl PatternHistory {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a WaferAnalysis>) -> Self {
        let mut history = Self::default();
        for pattern in records.into_iter().filter_map(WaferAnalysis::defect_pattern) {
            history.total_fail += 1;
            *history.by_pattern.entry(pattern).or_insert(0) += 1;
        }
        history
    }

    /// Share of FAIL records carrying `pattern`, `None` without history.
    pub fn share(&self, pattern: DefectPattern) -> Option<f64> {
        (self.total_fail > 0)
            .then(|| self.by_pattern.get(&pattern).copied().unwrap_or(0) as f64 / self.total_fail as f64)
    }
}

pub struct AnalysisInput<'a> {
    pub probabilities: &'a ProbabilityDistribution,
    pub history: &'a PatternHistory,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisStage {
    config: AnalysisConfig,
}

impl AnalysisStage {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn consistency_score(&self, dist: &ProbabilityDistribution, major_issues: usize, mismatch: bool) -> f64 {
        let p = &self.config.penalties;
        let (_, confidence) = dist.top();
        let mut score = 1.0;

        if confidence < p.low_confidence_below {
            score -= p.low_confidence;
        } else if confidence < p.moderate_confidence_below {
            score -= p.moderate_confidence;
        }
        if major_issues > p.max_major_issues {
            score -= p.multiple_issues;
        }
        if mismatch {
            score -= p.prediction_mismatch;
        }
        if p.margin_weight > 0.0 {
            let margin = confidence - dist.second();
            score -= p.margin_weight * (1.0 - margin) * dist.normalized_entropy();
        }
        score.clamp(0.0, 1.0)
    }

    pub fn severity(&self, pattern: DefectPattern, confidence: f64, history: &PatternHistory) -> Severity {
        if !pattern.is_defect() {
            return Severity::None;
        }
        let base = if confidence > self.config.high_severity_confidence {
            Severity::High
        } else if confidence > self.config.medium_severity_confidence {
            Severity::Medium
        } else {
            Severity::Low
        };

        let frequent = history.total_fail >= self.config.escalation_min_records
            && history.share(pattern).is_some_and(|s| s >= self.config.escalation_share);
        if frequent {
            base.escalate()
        } else {
            base
        }
    }
}

impl<'a> Stage<AnalysisInput<'a>, AnalysisDetail> for AnalysisStage {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn run(&self, input: AnalysisInput<'a>) -> Result<AnalysisDetail, InspectionError> {
        let dist = input.probabilities;
        let (pattern, confidence) = dist.top();

        let major_issues: Vec<DefectPattern> = dist
            .defects_above(self.config.major_issue_probability)
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        let prediction_mismatch = !pattern.is_defect() && !major_issues.is_empty();
        let consistency_score = self.consistency_score(dist, major_issues.len(), prediction_mismatch);
        let severity = self.severity(pattern, confidence, input.history);

        let detail = AnalysisDetail {
            consistency_score,
            ambiguous: confidence < self.config.ambiguity_threshold,
            top_margin: confidence - dist.second(),
            normalized_entropy: dist.normalized_entropy(),
            major_issues,
            prediction_mismatch,
            historical_share: input.history.share(pattern),
            severity,
            recommendation: if consistency_score > self.config.pass_score {
                Recommendation::Pass
            } else {
                Recommendation::NeedsReview
            },
        };

        debug!(
            pattern = %pattern,
            consistency = detail.consistency_score,
            ambiguous = detail.ambiguous,
            severity = %detail.severity,
            "Analysis complete"
        );
        Ok(detail)
    }
}
