//! Explanation Stage - template narrative for one wafer

use std::fmt::Write as _;

use super::Stage;
use crate::error::InspectionError;
use crate::types::{AgentResult, AnalysisDetail, Severity, ValidationDetail, ValidationState, Verdict};

pub struct ExplanationInput<'a> {
    pub file_name: &'a str,
    pub verdict: Verdict,
    pub severity: Severity,
    pub selected: &'a AgentResult,
    pub members: &'a [AgentResult],
    pub analysis: &'a AnalysisDetail,
    pub validation: &'a ValidationDetail,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplanationStage;

impl ExplanationStage {
    /// Narrative for a wafer whose pipeline could not complete.
    pub fn failure(file_name: &str, error: &InspectionError) -> String {
        format!(
            "Analysis failed for {file_name}: {error}. The wafer is marked FAIL with zero confidence \
             and held for manual inspection."
        )
    }
}

impl<'a> Stage<ExplanationInput<'a>, String> for ExplanationStage {
    fn name(&self) -> &'static str {
        "explanation"
    }

    fn run(&self, input: ExplanationInput<'a>) -> Result<String, InspectionError> {
        let sel = input.selected;
        let mut out = String::new();

        // write! into a String cannot fail
        let _ = write!(
            out,
            "{} classified {} as {} ({:.1}% confidence). Verdict: {}. Severity: {}.",
            sel.agent,
            input.file_name,
            sel.pattern,
            sel.confidence * 100.0,
            input.verdict,
            input.severity
        );
        let _ = write!(out, " {}", sel.description);

        if input.members.len() > 1 {
            let others: Vec<String> = input
                .members
                .iter()
                .filter(|m| m.agent != sel.agent)
                .map(|m| format!("{} reported {} at {:.1}%", m.agent, m.pattern, m.confidence * 100.0))
                .collect();
            if !others.is_empty() {
                let _ = write!(out, " Other ensemble members: {}.", others.join("; "));
            }
        }

        if let Some(flag) = &sel.quality_flag {
            let _ = write!(out, " Quality: {flag}.");
        }
        let _ = write!(out, " Consistency score {:.2}", input.analysis.consistency_score);
        if input.analysis.ambiguous {
            out.push_str(" (ambiguous)");
        }
        out.push('.');
        if input.analysis.prediction_mismatch {
            out.push_str(" Secondary defect signatures conflict with the clean classification.");
        }

        match input.validation.state {
            ValidationState::Failed => {
                let _ = write!(
                    out,
                    " Validation did not pass after {} attempts; best available result reported.",
                    input.validation.attempts
                );
            }
            ValidationState::Passed if input.validation.attempts > 1 => {
                let _ = write!(out, " Validation passed on attempt {}.", input.validation.attempts);
            }
            _ => {}
        }

        if !sel.root_causes.is_empty() {
            let _ = write!(out, " Likely root causes: {}.", sel.root_causes.join("; "));
        }
        if !sel.actions.is_empty() {
            let _ = write!(out, " Recommended actions: {}.", sel.actions.join("; "));
        }
        Ok(out)
    }
}
