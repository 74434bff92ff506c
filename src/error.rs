//! Per-wafer pipeline errors.
//!
//! These never escape as process-fatal errors: the coordinator turns each of
//! them into a FAIL record with an explanatory message.

/// Errors raised while turning an artifact into a classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InspectionError {
    /// Declared kind does not match the payload, or the payload is corrupt
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Grid dimensions differ from the required N×N
    #[error("shape mismatch: expected {expected}x{expected} grid, got {actual}")]
    ShapeMismatch { expected: usize, actual: String },

    /// Classifier could not be loaded, failed, or timed out
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),
}

impl InspectionError {
    /// Stable kind name recorded in `FailureDetail`.
    pub fn kind(&self) -> &'static str {
        match self {
            InspectionError::UnsupportedFormat(_) => "UnsupportedFormat",
            InspectionError::ShapeMismatch { .. } => "ShapeMismatch",
            InspectionError::InferenceUnavailable(_) => "InferenceUnavailable",
        }
    }
}
