//! Shared data structures for the wafer inspection pipeline
//!
//! This module defines the core types passed between pipeline stages and
//! the analytics engines:
//! - Defect vocabularies and the canonical pattern enum (`pattern`)
//! - Artifacts, tensors, per-classifier results and the per-wafer record (`inspection`)
//! - Lot, SPC and RCA aggregates derived from persisted history (`analytics`)

mod analytics;
mod inspection;
mod pattern;

pub use analytics::*;
pub use inspection::*;
pub use pattern::*;

use serde::{Deserialize, Serialize};

// ============================================================================
// Severity & Verdict
// ============================================================================

/// Severity assigned to a wafer by the analysis stage.
///
/// Ordered so that threshold comparisons (`severity >= threshold`) read
/// naturally in the trigger stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// One level higher, saturating at `High`.
    pub fn escalate(self) -> Self {
        match self {
            Severity::None => Severity::None,
            Severity::Low => Severity::Medium,
            Severity::Medium | Severity::High => Severity::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Final quality-gate verdict for a wafer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    #[default]
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_fail(&self) -> bool {
        matches!(self, Verdict::Fail)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::None);
    }

    #[test]
    fn test_severity_escalate_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::High.escalate(), Severity::High);
        assert_eq!(Severity::None.escalate(), Severity::None);
    }

    #[test]
    fn test_verdict_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Fail).unwrap(), "\"FAIL\"");
        assert_eq!(serde_json::to_string(&Verdict::Pass).unwrap(), "\"PASS\"");
    }
}
