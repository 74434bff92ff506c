//! Ensemble Arbiter - best-confidence selection across classifier members
//!
//! Every member that produced a distribution becomes an [`AgentResult`]
//! carrying the pattern knowledge for its top label. The member with the
//! strictly highest top-label confidence wins; on an exact tie the member
//! listed first in the classifier set keeps the selection.
//!
//! ## Failure Handling
//!
//! - A member that errors or times out is logged and skipped
//! - If every member failed, arbitration fails with `InferenceUnavailable`

use tracing::{debug, warn};

use super::Stage;
use crate::config::defaults;
use crate::error::InspectionError;
use crate::playbook;
use crate::types::{AgentResult, ProbabilityDistribution};

/// Outcome of running one classifier member.
#[derive(Debug, Clone)]
pub struct MemberOutcome {
    pub agent: String,
    pub model_id: String,
    pub result: Result<ProbabilityDistribution, InspectionError>,
}

/// Arbitration output: every successful member plus the selected index.
#[derive(Debug, Clone)]
pub struct Arbitration {
    pub members: Vec<AgentResult>,
    /// Index into `members`
    pub selected: usize,
    /// Members that failed, with their errors
    pub failures: Vec<(String, InspectionError)>,
}

impl Arbitration {
    pub fn selected(&self) -> &AgentResult {
        &self.members[self.selected]
    }
}

/// Ensemble arbiter stage.
#[derive(Debug, Clone)]
pub struct EnsembleArbiter {
    /// Confidence below which a result is flagged as ambiguous
    ambiguity_threshold: f64,
}

impl Default for EnsembleArbiter {
    fn default() -> Self {
        Self::new(defaults::AMBIGUITY_THRESHOLD)
    }
}

impl EnsembleArbiter {
    pub fn new(ambiguity_threshold: f64) -> Self {
        Self { ambiguity_threshold }
    }

    fn quality_flag(&self, confidence: f64) -> Option<String> {
        if confidence < defaults::LOW_CONFIDENCE_FLAG_BELOW {
            Some("Low confidence - manual review recommended".to_string())
        } else if confidence < self.ambiguity_threshold {
            Some("Moderate confidence - consider verification".to_string())
        } else {
            None
        }
    }

    /// Wrap one member's distribution with the pattern knowledge for its top label.
    pub fn agent_result(&self, agent: &str, model_id: &str, probabilities: ProbabilityDistribution) -> AgentResult {
        let (pattern, confidence) = probabilities.top();
        let book = playbook::pattern(pattern);
        let description = format!(
            "Primary pattern detected: {} with {:.1}% confidence. Wafer shows {}.",
            pattern,
            confidence * 100.0,
            book.appearance
        );
        AgentResult {
            agent: agent.to_string(),
            model_id: model_id.to_string(),
            pattern,
            probabilities,
            confidence,
            quality_flag: self.quality_flag(confidence),
            description,
            root_causes: book.root_causes.iter().map(|s| s.to_string()).collect(),
            actions: book.actions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Stage<Vec<MemberOutcome>, Arbitration> for EnsembleArbiter {
    fn name(&self) -> &'static str {
        "arbiter"
    }

    fn run(&self, outcomes: Vec<MemberOutcome>) -> Result<Arbitration, InspectionError> {
        let mut members = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(dist) => members.push(self.agent_result(&outcome.agent, &outcome.model_id, dist)),
                Err(e) => {
                    warn!(agent = %outcome.agent, error = %e, "Classifier member failed, continuing with survivors");
                    failures.push((outcome.agent, e));
                }
            }
        }

        if members.is_empty() {
            let detail = failures
                .iter()
                .map(|(agent, e)| format!("{agent}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(InspectionError::InferenceUnavailable(if detail.is_empty() {
                "no classifier configured for this artifact kind".to_string()
            } else {
                detail
            }));
        }

        // Strictly greater: the earlier member keeps ties
        let mut selected = 0;
        for (i, member) in members.iter().enumerate().skip(1) {
            if member.confidence > members[selected].confidence {
                selected = i;
            }
        }

        debug!(
            selected = %members[selected].agent,
            pattern = %members[selected].pattern,
            confidence = members[selected].confidence,
            members = members.len(),
            failed = failures.len(),
            "Arbitration complete"
        );

        Ok(Arbitration {
            members,
            selected,
            failures,
        })
    }
}
