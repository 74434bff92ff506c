//! Inspection Configuration - pipeline policy as operator-tunable TOML values
//!
//! Every threshold the pipeline and analytics engines use is a field here.
//! Each struct implements `Default` with the values in `defaults.rs`, so a
//! missing config file yields the reference behavior.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::notify::NotificationConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "WAFER_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "inspection_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an inspection deployment.
///
/// Load with `InspectionConfig::load()` which searches:
/// 1. `$WAFER_CONFIG` env var
/// 2. `./inspection_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectionConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default)]
    pub photo: PhotoConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub spc: SpcConfig,

    #[serde(default)]
    pub rca: RcaConfig,

    #[serde(default)]
    pub copilot: CopilotConfig,

    #[serde(default)]
    pub lot: LotConfig,

    /// Initial notification settings, used until a config is stored via the API
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl InspectionConfig {
    /// Load configuration using the standard search order:
    /// 1. `$WAFER_CONFIG` environment variable
    /// 2. `./inspection_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded inspection config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded inspection config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys produce warnings only.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Inspection config saved");
        Ok(())
    }

    /// Validate thresholds for internal consistency.
    ///
    /// Rules:
    /// - Probabilities and scores must lie in [0, 1]
    /// - Severity bands must escalate (medium <= high)
    /// - Counts and sizes must be positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let a = &self.analysis;

        for (name, value) in [
            ("analysis.ambiguity_threshold", a.ambiguity_threshold),
            ("analysis.high_severity_confidence", a.high_severity_confidence),
            ("analysis.medium_severity_confidence", a.medium_severity_confidence),
            ("analysis.major_issue_probability", a.major_issue_probability),
            ("analysis.pass_score", a.pass_score),
            ("analysis.escalation_share", a.escalation_share),
            ("analysis.penalties.low_confidence_below", a.penalties.low_confidence_below),
            ("analysis.penalties.moderate_confidence_below", a.penalties.moderate_confidence_below),
            ("validation.min_confidence", self.validation.min_confidence),
            ("validation.min_consistency", self.validation.min_consistency),
        ] {
            Self::check_unit_interval(value, name, &mut errors);
        }

        Self::check_escalation(
            a.medium_severity_confidence,
            a.high_severity_confidence,
            "analysis.severity_confidence",
            &mut errors,
        );
        Self::check_escalation(
            a.penalties.low_confidence_below,
            a.penalties.moderate_confidence_below,
            "analysis.penalties.confidence_cuts",
            &mut errors,
        );

        if self.validation.max_attempts == 0 {
            errors.push("validation.max_attempts must be >= 1".to_string());
        }
        if self.grid.size < 8 {
            errors.push(format!("grid.size = {} must be >= 8", self.grid.size));
        }
        if self.photo.size < 8 {
            errors.push(format!("photo.size = {} must be >= 8", self.photo.size));
        }
        if self.photo.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            errors.push("photo.std values must be > 0 (used as divisor)".to_string());
        }
        if self.models.inference_timeout_secs == 0 {
            errors.push("models.inference_timeout_secs must be > 0".to_string());
        }
        if self.spc.default_window_days == 0 || self.spc.default_window_days > self.spc.max_window_days {
            errors.push(format!(
                "spc.default_window_days = {} must be in 1..={}",
                self.spc.default_window_days, self.spc.max_window_days
            ));
        }
        if self.rca.lookback_days == 0 {
            errors.push("rca.lookback_days must be > 0".to_string());
        }
        if self.copilot.recent_records == 0 {
            errors.push("copilot.recent_records must be > 0".to_string());
        }
        if self.lot.max_concurrency == 0 {
            errors.push("lot.max_concurrency must be > 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.lot.defect_rate_alert_pct) {
            errors.push(format!(
                "lot.defect_rate_alert_pct = {:.1} must be a percentage",
                self.lot.defect_rate_alert_pct
            ));
        }
        if let Err(e) = self.notifications.validate() {
            errors.push(format!("notifications: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_unit_interval(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            errors.push(format!("{name} = {value} must be within [0, 1]"));
        }
    }

    fn check_escalation(lower: f64, upper: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !lower.is_finite() || !upper.is_finite() {
            errors.push(format!("{name}: values must be finite (got {lower}, {upper})"));
            return;
        }
        if upper < lower {
            errors.push(format!("{name}: upper ({upper:.3}) must be >= lower ({lower:.3})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address. Overridden by `WAFER_SERVER_ADDR` or `--addr`.
    pub addr: String,
    /// Allowed CORS origins. Empty means permissive.
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            cors_origins: Vec::new(),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Required side length N
    pub size: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: defaults::GRID_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    pub size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            size: defaults::PHOTO_SIZE,
            mean: defaults::PHOTO_MEAN,
            std: defaults::PHOTO_STD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Dense softmax weights for the first grid classifier (JSON)
    pub grid_linear: Option<PathBuf>,
    /// Prototype set for the second grid classifier (JSON)
    pub grid_prototype: Option<PathBuf>,
    /// Dense softmax weights for the photo classifier (JSON)
    pub photo_linear: Option<PathBuf>,
    pub inference_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            grid_linear: None,
            grid_prototype: None,
            photo_linear: None,
            inference_timeout_secs: defaults::INFERENCE_TIMEOUT_SECS,
        }
    }
}

/// Consistency-score penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub low_confidence_below: f64,
    pub low_confidence: f64,
    pub moderate_confidence_below: f64,
    pub moderate_confidence: f64,
    /// Applied when more than `max_major_issues` defect classes are significant
    pub multiple_issues: f64,
    pub max_major_issues: usize,
    /// Applied when the top label is no-defect but major issues exist
    pub prediction_mismatch: f64,
    /// Weight of the entropy-scaled top-2 margin term (0 disables it)
    pub margin_weight: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            low_confidence_below: 0.3,
            low_confidence: 0.3,
            moderate_confidence_below: 0.5,
            moderate_confidence: 0.1,
            multiple_issues: 0.2,
            max_major_issues: 2,
            prediction_mismatch: 0.3,
            margin_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub ambiguity_threshold: f64,
    pub high_severity_confidence: f64,
    pub medium_severity_confidence: f64,
    pub major_issue_probability: f64,
    pub pass_score: f64,
    pub escalation_share: f64,
    pub escalation_min_records: usize,
    pub history_window: usize,
    pub penalties: PenaltyConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: defaults::AMBIGUITY_THRESHOLD,
            high_severity_confidence: defaults::HIGH_SEVERITY_CONFIDENCE,
            medium_severity_confidence: defaults::MEDIUM_SEVERITY_CONFIDENCE,
            major_issue_probability: defaults::MAJOR_ISSUE_PROBABILITY,
            pass_score: defaults::CONSISTENCY_PASS_SCORE,
            escalation_share: defaults::SEVERITY_ESCALATION_SHARE,
            escalation_min_records: defaults::SEVERITY_ESCALATION_MIN_RECORDS,
            history_window: defaults::SEVERITY_HISTORY_WINDOW,
            penalties: PenaltyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_attempts: u32,
    pub min_confidence: f64,
    pub min_consistency: f64,
    /// Treat an ambiguous prediction as a failed criterion
    pub require_unambiguous: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::VALIDATION_MAX_ATTEMPTS,
            min_confidence: defaults::VALIDATION_MIN_CONFIDENCE,
            min_consistency: defaults::VALIDATION_MIN_CONSISTENCY,
            require_unambiguous: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpcConfig {
    pub default_window_days: u32,
    pub max_window_days: u32,
}

impl Default for SpcConfig {
    fn default() -> Self {
        Self {
            default_window_days: defaults::SPC_DEFAULT_DAYS,
            max_window_days: defaults::SPC_MAX_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RcaConfig {
    pub lookback_days: u32,
    pub trend_weeks: u32,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            lookback_days: defaults::RCA_LOOKBACK_DAYS,
            trend_weeks: defaults::RCA_TREND_WEEKS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    pub recent_records: usize,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            recent_records: defaults::COPILOT_RECENT_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LotConfig {
    pub defect_rate_alert_pct: f64,
    pub max_concurrency: usize,
}

impl Default for LotConfig {
    fn default() -> Self {
        Self {
            defect_rate_alert_pct: defaults::LOT_DEFECT_RATE_ALERT_PCT,
            max_concurrency: defaults::LOT_MAX_CONCURRENCY,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(InspectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = InspectionConfig::from_toml_str(
            r#"
            [validation]
            max_attempts = 5

            [analysis.penalties]
            margin_weight = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.validation.max_attempts, 5);
        assert!((config.validation.min_consistency - 0.6).abs() < 1e-12);
        assert!((config.analysis.penalties.margin_weight - 0.5).abs() < 1e-12);
        assert!((config.analysis.ambiguity_threshold - 0.75).abs() < 1e-12);
        assert_eq!(config.grid.size, 56);
    }

    #[test]
    fn test_validation_rejects_inverted_severity_bands() {
        let mut config = InspectionConfig::default();
        config.analysis.high_severity_confidence = 0.4;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.iter().any(|m| m.contains("severity_confidence"))));
    }

    #[test]
    fn test_validation_rejects_zero_attempts_and_bad_threshold() {
        let mut config = InspectionConfig::default();
        config.validation.max_attempts = 0;
        config.validation.min_confidence = 1.5;
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = InspectionConfig::default();
        let text = config.to_toml().unwrap();
        let back = InspectionConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.server.addr, config.server.addr);
        assert_eq!(back.photo.mean, config.photo.mean);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inspection_config.toml");
        std::fs::write(&path, "[spc]\ndefault_window_days = 14\n").unwrap();
        let config = InspectionConfig::load_from_file(&path).unwrap();
        assert_eq!(config.spc.default_window_days, 14);
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let err = InspectionConfig::load_from_file(Path::new("/nonexistent/x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
