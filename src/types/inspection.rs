//! Per-wafer inspection types: artifacts, tensors, classifier results and
//! the persisted `WaferAnalysis` record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{DefectPattern, ProbabilityDistribution, Severity, Verdict};

// ============================================================================
// Artifact Intake
// ============================================================================

/// Declared kind of an uploaded artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Photographic raster image (PNG, JPEG, BMP, GIF, TIFF)
    Photo,
    /// N×N defect-state grid serialized as an NPY array
    Grid,
}

impl ArtifactKind {
    /// Infer a kind from the file extension, if it is unambiguous.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "npy" => Some(ArtifactKind::Grid),
            "png" | "jpg" | "jpeg" | "bmp" | "gif" | "tif" | "tiff" => Some(ArtifactKind::Photo),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Photo => write!(f, "photo"),
            ArtifactKind::Grid => write!(f, "grid"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" | "image" | "photographic" => Ok(ArtifactKind::Photo),
            "grid" | "grid-map" | "grid_map" | "wafer-map" | "npy" => Ok(ArtifactKind::Grid),
            other => Err(format!("unknown artifact kind '{other}'")),
        }
    }
}

/// Raw uploaded bytes plus declared kind. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    file_name: String,
    kind: ArtifactKind,
    bytes: Arc<[u8]>,
}

impl ArtifactInput {
    pub fn new(file_name: impl Into<String>, kind: ArtifactKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Optional provenance attached to an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaferContext {
    pub wafer_id: Option<String>,
    pub lot_id: Option<String>,
    pub tool_id: Option<String>,
    pub chamber_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Tensors
// ============================================================================

/// Axis order of a 3-D image tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layout {
    /// channels, height, width
    Chw,
    /// height, width, channels
    Hwc,
}

/// Dense 3-channel image tensor with an explicit layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    channels: usize,
    height: usize,
    width: usize,
    layout: Layout,
    data: Vec<f32>,
}

impl Tensor {
    /// Build a CHW tensor. Returns `None` if `data` does not match the shape.
    pub fn from_chw(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == channels * height * width).then_some(Self {
            channels,
            height,
            width,
            layout: Layout::Chw,
            data,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Shape in the tensor's own axis order.
    pub fn shape(&self) -> [usize; 3] {
        match self.layout {
            Layout::Chw => [self.channels, self.height, self.width],
            Layout::Hwc => [self.height, self.width, self.channels],
        }
    }

    fn offset(&self, c: usize, y: usize, x: usize) -> usize {
        match self.layout {
            Layout::Chw => (c * self.height + y) * self.width + x,
            Layout::Hwc => (y * self.width + x) * self.channels + c,
        }
    }

    /// Value at channel `c`, row `y`, column `x`, regardless of layout.
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data.get(self.offset(c, y, x)).copied().unwrap_or(0.0)
    }

    /// Copy into another axis order. Identity when already in `layout`.
    pub fn to_layout(&self, layout: Layout) -> Tensor {
        if layout == self.layout {
            return self.clone();
        }
        let mut out = Tensor {
            channels: self.channels,
            height: self.height,
            width: self.width,
            layout,
            data: vec![0.0; self.data.len()],
        };
        for c in 0..self.channels {
            for y in 0..self.height {
                for x in 0..self.width {
                    let dst = out.offset(c, y, x);
                    out.data[dst] = self.at(c, y, x);
                }
            }
        }
        out
    }
}

/// Die-class pixel counts derived from a grid map.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PixelCounts {
    pub non_wafer: u64,
    pub normal: u64,
    pub defect: u64,
}

impl PixelCounts {
    /// Defective share of on-wafer dies, in percent.
    pub fn defect_density_pct(&self) -> f64 {
        let on_wafer = self.normal + self.defect;
        if on_wafer == 0 {
            0.0
        } else {
            self.defect as f64 / on_wafer as f64 * 100.0
        }
    }
}

/// Output of the preprocessor: the classifier-ready tensor plus reporting data.
#[derive(Debug, Clone)]
pub struct PreparedArtifact {
    pub kind: ArtifactKind,
    /// Always CHW; classifiers reshape to their own layout.
    pub tensor: Tensor,
    pub pixel_counts: Option<PixelCounts>,
    pub source_dims: (usize, usize),
    pub digest: String,
}

// ============================================================================
// Classifier Results
// ============================================================================

/// One classifier's verdict. Created once per invocation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    /// Classifier name
    pub agent: String,
    pub model_id: String,
    pub pattern: DefectPattern,
    pub probabilities: ProbabilityDistribution,
    /// Probability of `pattern`
    pub confidence: f64,
    pub quality_flag: Option<String>,
    pub description: String,
    pub root_causes: Vec<String>,
    pub actions: Vec<String>,
}

// ============================================================================
// Stage Details
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionDetail {
    pub kind: ArtifactKind,
    pub digest: String,
    pub source_width: usize,
    pub source_height: usize,
    pub tensor_shape: [usize; 3],
    pub pixel_counts: Option<PixelCounts>,
}

/// Analysis recommendation derived from the consistency score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Pass,
    NeedsReview,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisDetail {
    pub consistency_score: f64,
    pub ambiguous: bool,
    pub top_margin: f64,
    pub normalized_entropy: f64,
    pub major_issues: Vec<DefectPattern>,
    pub prediction_mismatch: bool,
    /// Share of recent FAIL records carrying the same pattern
    pub historical_share: Option<f64>,
    pub severity: Severity,
    pub recommendation: Recommendation,
}

/// Validation retry state machine states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationState {
    Pending,
    Passed,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionOutcome {
    pub name: String,
    pub passed: bool,
    pub observed: f64,
    pub required: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationDetail {
    pub state: ValidationState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub criteria: Vec<CriterionOutcome>,
}

/// Notification draft prepared by the trigger stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertDraft {
    pub subject: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerDetail {
    pub alert_due: bool,
    pub reasons: Vec<String>,
    pub checklist: Vec<String>,
    pub alert: Option<AlertDraft>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageDetails {
    pub ingestion: Option<IngestionDetail>,
    pub analysis: Option<AnalysisDetail>,
    pub validation: Option<ValidationDetail>,
    pub trigger: TriggerDetail,
}

/// Why a wafer pipeline could not produce a classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDetail {
    /// `UnsupportedFormat`, `ShapeMismatch` or `InferenceUnavailable`
    pub kind: String,
    pub message: String,
}

// ============================================================================
// Wafer Analysis (persisted record)
// ============================================================================

/// Consolidated per-wafer record. Frozen once the pipeline run completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaferAnalysis {
    pub wafer_id: String,
    pub file_name: String,
    pub lot_id: Option<String>,
    pub tool_id: Option<String>,
    pub chamber_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub analyzed_at: DateTime<Utc>,
    pub agents: Vec<AgentResult>,
    /// Name of the classifier whose result was selected
    pub selected_agent: Option<String>,
    pub pattern: DefectPattern,
    pub confidence: f64,
    pub verdict: Verdict,
    pub severity: Severity,
    pub probabilities: Option<ProbabilityDistribution>,
    pub explanation: String,
    pub stages: StageDetails,
    pub failure: Option<FailureDetail>,
}

impl WaferAnalysis {
    /// Event time used for ordering and windowing: process time when known.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.analyzed_at)
    }

    pub fn is_defective(&self) -> bool {
        self.verdict.is_fail()
    }

    /// Pattern counted by defect aggregates: FAIL records with a real defect.
    pub fn defect_pattern(&self) -> Option<DefectPattern> {
        (self.verdict.is_fail() && self.pattern.is_defect()).then_some(self.pattern)
    }
}
