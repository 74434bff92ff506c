//! Validation Stage - bounded retry state machine
//!
//! ```text
//! PENDING ──▶ PASSED                    all criteria pass
//!        └──▶ RETRYING ──▶ (re-classify) attempts < max
//!        └──▶ FAILED                    attempts exhausted
//! ```
//!
//! FAILED is a recorded state, not an error: the best-confidence attempt
//! seen so far is still emitted as the verdict.

use tracing::{debug, info};

use super::Stage;
use crate::config::ValidationConfig;
use crate::error::InspectionError;
use crate::types::{AnalysisDetail, CriterionOutcome, ValidationDetail, ValidationState};

/// Evaluates the criteria set for one attempt.
#[derive(Debug, Clone, Default)]
pub struct ValidationStage {
    config: ValidationConfig,
}

impl ValidationStage {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }
}

impl<'a> Stage<(f64, &'a AnalysisDetail), Vec<CriterionOutcome>> for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn run(&self, (confidence, analysis): (f64, &'a AnalysisDetail)) -> Result<Vec<CriterionOutcome>, InspectionError> {
        let mut criteria = vec![
            CriterionOutcome {
                name: "confidence".to_string(),
                passed: confidence >= self.config.min_confidence,
                observed: confidence,
                required: self.config.min_confidence,
            },
            CriterionOutcome {
                name: "consistency".to_string(),
                passed: analysis.consistency_score >= self.config.min_consistency,
                observed: analysis.consistency_score,
                required: self.config.min_consistency,
            },
        ];
        if self.config.require_unambiguous {
            criteria.push(CriterionOutcome {
                name: "unambiguous".to_string(),
                passed: !analysis.ambiguous,
                observed: if analysis.ambiguous { 0.0 } else { 1.0 },
                required: 1.0,
            });
        }
        Ok(criteria)
    }
}

/// Retry state machine over candidate results of type `T`.
///
/// The caller classifies, then calls [`observe`](Self::observe); while the
/// returned state is `Retrying` it classifies again.
#[derive(Debug)]
pub struct ValidationMachine<T> {
    stage: ValidationStage,
    state: ValidationState,
    attempts: u32,
    best: Option<(f64, T, Vec<CriterionOutcome>)>,
    last_criteria: Vec<CriterionOutcome>,
}

impl<T> ValidationMachine<T> {
    pub fn new(stage: ValidationStage) -> Self {
        Self {
            stage,
            state: ValidationState::Pending,
            attempts: 0,
            best: None,
            last_criteria: Vec::new(),
        }
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one attempt and transition.
    pub fn observe(&mut self, candidate: T, confidence: f64, analysis: &AnalysisDetail) -> ValidationState {
        if matches!(self.state, ValidationState::Passed | ValidationState::Failed) {
            return self.state;
        }
        self.attempts += 1;
        // Criteria evaluation is infallible
        let criteria = self.stage.run((confidence, analysis)).unwrap_or_default();
        let passed = criteria.iter().all(|c| c.passed);

        let better = self.best.as_ref().map_or(true, |(best, _, _)| confidence > *best);
        if passed || better {
            self.best = Some((confidence, candidate, criteria.clone()));
        }
        self.last_criteria = criteria;

        self.state = if passed {
            ValidationState::Passed
        } else if self.attempts < self.stage.max_attempts() {
            info!(attempt = self.attempts, confidence, "Validation criteria failed, retrying classification");
            ValidationState::Retrying
        } else {
            info!(attempts = self.attempts, "Validation attempts exhausted, emitting best available result");
            ValidationState::Failed
        };
        debug!(state = ?self.state, attempts = self.attempts, "Validation step");
        self.state
    }

    /// Stop retrying early: a pending or retrying machine moves to `Failed`.
    /// Terminal states are left alone.
    pub fn abandon(&mut self) -> ValidationState {
        if !matches!(self.state, ValidationState::Passed | ValidationState::Failed) {
            info!(attempts = self.attempts, "Validation abandoned, emitting best available result");
            self.state = ValidationState::Failed;
        }
        self.state
    }

    /// Final candidate and the validation detail block.
    ///
    /// Returns `None` if nothing was observed.
    pub fn finish(self) -> Option<(T, ValidationDetail)> {
        let max_attempts = self.stage.max_attempts();
        let (_, candidate, best_criteria) = self.best?;
        let criteria = if self.state == ValidationState::Passed {
            best_criteria
        } else {
            self.last_criteria
        };
        Some((
            candidate,
            ValidationDetail {
                state: self.state,
                attempts: self.attempts,
                max_attempts,
                criteria,
            },
        ))
    }
}
