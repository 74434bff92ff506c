//! Inspection pipeline stages
//!
//! Each stage is a plain typed transform implementing [`Stage`]:
//!
//! 1. **Preprocessor** (`crate::ingestion`) - artifact to tensor
//! 2. **Classifiers** - tensor to per-member distributions
//! 3. **Ensemble Arbiter** - best-confidence member selection
//! 4. **Analysis** - consistency score, ambiguity, severity
//! 5. **Validation** - bounded retry state machine
//! 6. **Explanation** - narrative rendering
//! 7. **Trigger** - alert decision and checklist
//!
//! Sequencing, retries and timeouts live in `crate::pipeline`.

pub mod analysis;
pub mod arbiter;
pub mod classifiers;
pub mod explanation;
pub mod trigger;
pub mod validation;

pub use analysis::{AnalysisInput, AnalysisStage, PatternHistory};
pub use arbiter::{Arbitration, EnsembleArbiter, MemberOutcome};
pub use classifiers::{Classifier, ClassifierSet};
pub use explanation::{ExplanationInput, ExplanationStage};
pub use trigger::{TriggerInput, TriggerStage};
pub use validation::{ValidationMachine, ValidationStage};

use crate::error::InspectionError;

/// A pipeline stage with explicit typed input and output.
pub trait Stage<In, Out> {
    /// Stage name for logs and stage-detail blocks
    fn name(&self) -> &'static str;

    fn run(&self, input: In) -> Result<Out, InspectionError>;
}
