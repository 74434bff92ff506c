//! System-wide default constants.
//!
//! Centralises the numbers the inspection pipeline and analytics engines
//! were built around. Grouped by subsystem for easy discovery.

// ============================================================================
// Intake
// ============================================================================

/// Side length N of grid-map artifacts (N×N dies).
pub const GRID_SIZE: usize = 56;

/// Square resolution photographic artifacts are resized to.
pub const PHOTO_SIZE: usize = 56;

/// ImageNet per-channel mean applied after scaling to [0, 1].
pub const PHOTO_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation.
pub const PHOTO_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Largest accepted upload (bytes). 16 MiB.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// Inference
// ============================================================================

/// Maximum time a single classifier call may take before it is treated as
/// unavailable (seconds).
pub const INFERENCE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Analysis
// ============================================================================

/// Confidence below which a prediction is flagged ambiguous.
pub const AMBIGUITY_THRESHOLD: f64 = 0.75;

/// Confidence above which a defect is rated High.
pub const HIGH_SEVERITY_CONFIDENCE: f64 = 0.8;

/// Confidence above which a defect is rated Medium.
pub const MEDIUM_SEVERITY_CONFIDENCE: f64 = 0.5;

/// Probability above which a defect class counts as a "major issue".
pub const MAJOR_ISSUE_PROBABILITY: f64 = 0.1;

/// Consistency score above which the analysis recommends PASS.
pub const CONSISTENCY_PASS_SCORE: f64 = 0.6;

/// Share of recent FAIL records that escalates severity one level.
pub const SEVERITY_ESCALATION_SHARE: f64 = 0.3;

/// Minimum FAIL records before historical escalation applies.
pub const SEVERITY_ESCALATION_MIN_RECORDS: usize = 5;

/// Recent records consulted for historical pattern frequency.
pub const SEVERITY_HISTORY_WINDOW: usize = 200;

// ============================================================================
// Validation
// ============================================================================

/// Classifier attempts before validation gives up.
pub const VALIDATION_MAX_ATTEMPTS: u32 = 3;

/// Minimum confidence for validation to pass.
pub const VALIDATION_MIN_CONFIDENCE: f64 = 0.25;

/// Minimum consistency score for validation to pass.
pub const VALIDATION_MIN_CONSISTENCY: f64 = 0.6;

// ============================================================================
// Quality Flags
// ============================================================================

pub const LOW_CONFIDENCE_FLAG_BELOW: f64 = 0.5;
pub const MODERATE_CONFIDENCE_FLAG_BELOW: f64 = 0.75;

// ============================================================================
// Analytics
// ============================================================================

/// Default SPC window (days).
pub const SPC_DEFAULT_DAYS: u32 = 30;

/// Largest SPC window a query may request (days).
pub const SPC_MAX_DAYS: u32 = 365;

/// RCA lookback window (days).
pub const RCA_LOOKBACK_DAYS: u32 = 30;

/// Weeks covered by the RCA weekly trend.
pub const RCA_TREND_WEEKS: u32 = 4;

/// Records the copilot reads per question.
pub const COPILOT_RECENT_RECORDS: usize = 100;

/// Lot defect rate (percent) that raises a lot-level alert.
pub const LOT_DEFECT_RATE_ALERT_PCT: f64 = 15.0;

/// Wafers analysed concurrently within one lot.
pub const LOT_MAX_CONCURRENCY: usize = 4;

// ============================================================================
// History API
// ============================================================================

pub const HISTORY_DEFAULT_LIMIT: usize = 50;
pub const HISTORY_MAX_LIMIT: usize = 1_000;

// ============================================================================
// Notifications
// ============================================================================

/// HTTP timeout for webhook deliveries (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// How often the digest job checks its schedule (seconds).
pub const DIGEST_TICK_SECS: u64 = 60;

/// Default UTC hour for the daily digest.
pub const DIGEST_HOUR_UTC: u32 = 8;
