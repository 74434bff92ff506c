//! Defect knowledge tables
//!
//! Static engineering knowledge keyed by defect pattern and severity: likely
//! root causes, suggested actions, trigger checklists and the mechanisms the
//! RCA engine and lot narratives cite. Everything here is plain data; the
//! stages decide when to use it.

use crate::types::{DefectPattern, Severity};

/// Knowledge entry for one defect pattern.
#[derive(Debug, Clone, Copy)]
pub struct PatternPlaybook {
    /// One-line description of how the pattern looks on the wafer
    pub appearance: &'static str,
    pub root_causes: &'static [&'static str],
    pub actions: &'static [&'static str],
    /// Physical mechanism behind the pattern
    pub mechanism: &'static str,
    /// Organizational gap that lets the mechanism recur
    pub systemic_gap: &'static str,
    /// Lot-level systematic issue hypothesis
    pub lot_hypothesis: &'static str,
    /// Priority actions when the pattern dominates a lot
    pub lot_actions: &'static [&'static str],
}

const GENERIC_MECHANISM: &str = "Equipment degradation or process drift over time.";
const GENERIC_GAP: &str = "Need for more granular defect pattern tracking and tool-specific alerting.";

pub fn pattern(pattern: DefectPattern) -> PatternPlaybook {
    match pattern {
        DefectPattern::Center => PatternPlaybook {
            appearance: "defects clustered at the wafer center",
            root_causes: &[
                "Focus or exposure center bias",
                "Chuck temperature center gradient",
                "Gas flow distribution center concentration",
            ],
            actions: &[
                "Verify stepper focus calibration",
                "Check chuck thermal uniformity",
                "Analyze process gas flow patterns",
            ],
            mechanism: "Chuck heater may have degraded zones or vacuum leaks at center.",
            systemic_gap: "Insufficient sensor coverage for chuck thermal uniformity monitoring.",
            lot_hypothesis: "Chuck vacuum or thermal uniformity issue at wafer center",
            lot_actions: &["Check chuck heater zones", "Run center-uniformity qualification wafers"],
        },
        DefectPattern::Donut => PatternPlaybook {
            appearance: "a ring of defects between center and edge",
            root_causes: &[
                "Photoresist coating ring pattern",
                "Spin coating non-uniformity",
                "Temperature gradient during processing",
            ],
            actions: &[
                "Inspect photoresist dispense system",
                "Calibrate spin coater acceleration",
                "Check bake plate temperature uniformity",
            ],
            mechanism: "Thermal gradient during bake combined with cooling plate non-uniformity.",
            systemic_gap: GENERIC_GAP,
            lot_hypothesis: "Thermal gradient issue during bake process",
            lot_actions: &["Check heater zones 1 & 2 on the bake plate", "Verify cooling water flow rate"],
        },
        DefectPattern::EdgeLoc => PatternPlaybook {
            appearance: "localized defects on one section of the edge",
            root_causes: &[
                "Edge handling damage",
                "Edge exclusion zone misconfiguration",
                "Peripheral contamination",
            ],
            actions: &[
                "Inspect edge contact points",
                "Review edge exclusion settings",
                "Check for peripheral contamination",
            ],
            mechanism: "Aligner grip pressure or edge support pins damaging the wafer periphery.",
            systemic_gap: GENERIC_GAP,
            lot_hypothesis: "Wafer handling machinery gripping too hard at the edge",
            lot_actions: &["Adjust aligner grip pressure", "Clean edge ring support pins"],
        },
        DefectPattern::EdgeRing => PatternPlaybook {
            appearance: "defects around the full wafer circumference",
            root_causes: &[
                "Edge bead removal (EBR) process deviation",
                "Spin coating non-uniformity at wafer periphery",
                "Chamber edge heating inconsistency",
            ],
            actions: &[
                "Check EBR tool calibration and nozzle positioning",
                "Verify spin coating recipe parameters",
                "Inspect edge exclusion zone settings",
            ],
            mechanism: "Edge bead removal (EBR) process may be incomplete or the EBR nozzle is clogged.",
            systemic_gap: "Insufficient process monitoring at wafer edges combined with aging EBR equipment.",
            lot_hypothesis: "Edge bead removal (EBR) process deviation",
            lot_actions: &["Calibrate EBR nozzle position", "Verify spin-coat acceleration step"],
        },
        DefectPattern::Loc => PatternPlaybook {
            appearance: "a localized defect cluster away from the edge",
            root_causes: &[
                "Localized particle contamination",
                "Point source defect during deposition",
                "Mask defect or alignment issue",
            ],
            actions: &[
                "Run particle analysis on affected area",
                "Check deposition uniformity",
                "Inspect mask for defects",
            ],
            mechanism: "Localized particle source above the wafer chuck in the deposition chamber.",
            systemic_gap: GENERIC_GAP,
            lot_hypothesis: "Localized contamination in the deposition chamber",
            lot_actions: &["Inspect deposition chamber walls for flaking", "Check gas nozzle alignment"],
        },
        DefectPattern::NearFull => PatternPlaybook {
            appearance: "defects covering nearly the whole wafer",
            root_causes: &[
                "Severe process contamination",
                "Complete chamber malfunction",
                "Critical recipe parameter deviation",
            ],
            actions: &[
                "Immediate lot hold recommended",
                "Full chamber qualification required",
                "Escalate to process engineering team",
            ],
            mechanism: "Chamber-wide process failure or a critical recipe deviation.",
            systemic_gap: "Recipe and chamber interlocks do not stop processing on gross failures.",
            lot_hypothesis: "Chamber-wide process failure",
            lot_actions: &["Hold the lot", "Requalify the chamber before release"],
        },
        DefectPattern::Random => PatternPlaybook {
            appearance: "defects scattered without spatial structure",
            root_causes: &[
                "Ambient particle contamination",
                "Handling and transport issues",
                "Cleanroom environment degradation",
            ],
            actions: &[
                "Review cleanroom particle counts",
                "Inspect wafer handling equipment",
                "Check HEPA filter status",
            ],
            mechanism: "Ambient particle contamination during transport or processing.",
            systemic_gap: "Environmental monitoring is not correlated with wafer-level defect data.",
            lot_hypothesis: "General environment or multiple-tool drift",
            lot_actions: &["Review daily particle counts", "Check preventive maintenance schedules"],
        },
        DefectPattern::Scratch => PatternPlaybook {
            appearance: "linear defect trails across the wafer",
            root_causes: &[
                "Mechanical handling damage",
                "Robotic arm malfunction",
                "Wafer cassette contact issues",
            ],
            actions: &[
                "Inspect robotic handler end effectors",
                "Check wafer cassette for damage",
                "Review handling procedures",
            ],
            mechanism: "Wafer handling mechanism likely has worn components or misalignment.",
            systemic_gap: "Lack of data-driven PM scheduling that adapts based on actual defect patterns.",
            lot_hypothesis: "Mechanical handling error, end-effector likely damaged",
            lot_actions: &["Stop the handling robot for inspection", "Check cassette slots for alignment issues"],
        },
        DefectPattern::NoDefect => PatternPlaybook {
            appearance: "no defect structure",
            root_causes: &[],
            actions: &["Continue production monitoring", "Standard quality gate passage"],
            mechanism: GENERIC_MECHANISM,
            systemic_gap: GENERIC_GAP,
            lot_hypothesis: "No systematic issue",
            lot_actions: &["Continue monitoring"],
        },
    }
}

/// Mechanism used when no pattern-specific knowledge applies.
pub fn generic_mechanism() -> &'static str {
    GENERIC_MECHANISM
}

// ============================================================================
// Trigger Checklists
// ============================================================================

pub fn trigger_checklist(severity: Severity) -> &'static [&'static str] {
    match severity {
        Severity::High => &[
            "STOP production line for inspection",
            "Flag wafer for immediate review",
            "Notify Quality Control team",
        ],
        Severity::Medium => &[
            "Mark wafer for quality review",
            "Continue production with monitoring",
            "Log for trend analysis",
        ],
        Severity::Low => &[
            "Log defect for monitoring",
            "Continue normal operation",
            "Review in next batch analysis",
        ],
        Severity::None => &["Continue production monitoring", "Standard quality gate passage"],
    }
}

/// Checklist for wafers whose analysis could not complete.
pub const ANALYSIS_FAILURE_CHECKLIST: &[&str] = &[
    "Hold wafer for manual inspection",
    "Re-scan artifact",
    "Check classifier availability",
];
