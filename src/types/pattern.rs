//! Defect pattern vocabularies and probability distributions.
//!
//! The grid classifiers and the photo classifier were trained with different
//! label spellings (`Edge-Ring` vs `Edge_Ring`, `none` vs `Normal`). Each
//! vocabulary is an explicit enum, and both map into [`DefectPattern`] so the
//! rest of the pipeline never compares raw label strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance on the sum of a probability distribution.
pub const DISTRIBUTION_SUM_TOLERANCE: f64 = 1e-3;

// ============================================================================
// Canonical Pattern
// ============================================================================

/// Canonical defect pattern, shared by every classifier and analytics engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefectPattern {
    Center,
    Donut,
    #[serde(rename = "Edge-Loc")]
    EdgeLoc,
    #[serde(rename = "Edge-Ring")]
    EdgeRing,
    Loc,
    #[serde(rename = "Near-full")]
    NearFull,
    Random,
    Scratch,
    /// No defect detected
    #[serde(rename = "none")]
    NoDefect,
}

impl DefectPattern {
    pub const ALL: [DefectPattern; 9] = [
        DefectPattern::Center,
        DefectPattern::Donut,
        DefectPattern::EdgeLoc,
        DefectPattern::EdgeRing,
        DefectPattern::Loc,
        DefectPattern::NearFull,
        DefectPattern::Random,
        DefectPattern::Scratch,
        DefectPattern::NoDefect,
    ];

    /// Canonical display name (matches the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectPattern::Center => "Center",
            DefectPattern::Donut => "Donut",
            DefectPattern::EdgeLoc => "Edge-Loc",
            DefectPattern::EdgeRing => "Edge-Ring",
            DefectPattern::Loc => "Loc",
            DefectPattern::NearFull => "Near-full",
            DefectPattern::Random => "Random",
            DefectPattern::Scratch => "Scratch",
            DefectPattern::NoDefect => "none",
        }
    }

    pub fn is_defect(&self) -> bool {
        !matches!(self, DefectPattern::NoDefect)
    }

    /// Lenient parse used by query strings and the copilot.
    ///
    /// Accepts either vocabulary's spelling, case-insensitively.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "center" => Some(DefectPattern::Center),
            "donut" => Some(DefectPattern::Donut),
            "edgeloc" => Some(DefectPattern::EdgeLoc),
            "edgering" => Some(DefectPattern::EdgeRing),
            "loc" => Some(DefectPattern::Loc),
            "nearfull" => Some(DefectPattern::NearFull),
            "random" => Some(DefectPattern::Random),
            "scratch" => Some(DefectPattern::Scratch),
            "none" | "normal" => Some(DefectPattern::NoDefect),
            _ => None,
        }
    }
}

impl std::fmt::Display for DefectPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Classifier Vocabularies
// ============================================================================

/// Output labels of the grid-map classifiers, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridLabel {
    Center,
    Donut,
    EdgeLoc,
    EdgeRing,
    Loc,
    NearFull,
    Random,
    Scratch,
    None,
}

impl GridLabel {
    pub const ALL: [GridLabel; 9] = [
        GridLabel::Center,
        GridLabel::Donut,
        GridLabel::EdgeLoc,
        GridLabel::EdgeRing,
        GridLabel::Loc,
        GridLabel::NearFull,
        GridLabel::Random,
        GridLabel::Scratch,
        GridLabel::None,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GridLabel::Center => "Center",
            GridLabel::Donut => "Donut",
            GridLabel::EdgeLoc => "Edge-Loc",
            GridLabel::EdgeRing => "Edge-Ring",
            GridLabel::Loc => "Loc",
            GridLabel::NearFull => "Near-full",
            GridLabel::Random => "Random",
            GridLabel::Scratch => "Scratch",
            GridLabel::None => "none",
        }
    }

    pub fn canonical(&self) -> DefectPattern {
        match self {
            GridLabel::Center => DefectPattern::Center,
            GridLabel::Donut => DefectPattern::Donut,
            GridLabel::EdgeLoc => DefectPattern::EdgeLoc,
            GridLabel::EdgeRing => DefectPattern::EdgeRing,
            GridLabel::Loc => DefectPattern::Loc,
            GridLabel::NearFull => DefectPattern::NearFull,
            GridLabel::Random => DefectPattern::Random,
            GridLabel::Scratch => DefectPattern::Scratch,
            GridLabel::None => DefectPattern::NoDefect,
        }
    }
}

/// Output labels of the photographic classifier, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoLabel {
    Center,
    Donut,
    EdgeLoc,
    EdgeRing,
    Loc,
    NearFull,
    Normal,
    Random,
    Scratch,
}

impl PhotoLabel {
    pub const ALL: [PhotoLabel; 9] = [
        PhotoLabel::Center,
        PhotoLabel::Donut,
        PhotoLabel::EdgeLoc,
        PhotoLabel::EdgeRing,
        PhotoLabel::Loc,
        PhotoLabel::NearFull,
        PhotoLabel::Normal,
        PhotoLabel::Random,
        PhotoLabel::Scratch,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PhotoLabel::Center => "Center",
            PhotoLabel::Donut => "Donut",
            PhotoLabel::EdgeLoc => "Edge_Loc",
            PhotoLabel::EdgeRing => "Edge_Ring",
            PhotoLabel::Loc => "Loc",
            PhotoLabel::NearFull => "Near_Full",
            PhotoLabel::Normal => "Normal",
            PhotoLabel::Random => "Random",
            PhotoLabel::Scratch => "Scratch",
        }
    }

    pub fn canonical(&self) -> DefectPattern {
        match self {
            PhotoLabel::Center => DefectPattern::Center,
            PhotoLabel::Donut => DefectPattern::Donut,
            PhotoLabel::EdgeLoc => DefectPattern::EdgeLoc,
            PhotoLabel::EdgeRing => DefectPattern::EdgeRing,
            PhotoLabel::Loc => DefectPattern::Loc,
            PhotoLabel::NearFull => DefectPattern::NearFull,
            PhotoLabel::Normal => DefectPattern::NoDefect,
            PhotoLabel::Random => DefectPattern::Random,
            PhotoLabel::Scratch => DefectPattern::Scratch,
        }
    }
}

/// Which label vocabulary a classifier emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    Grid,
    Photo,
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        match self {
            Vocabulary::Grid => GridLabel::ALL.len(),
            Vocabulary::Photo => PhotoLabel::ALL.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical pattern at a model output index.
    pub fn canonical_at(&self, index: usize) -> Option<DefectPattern> {
        match self {
            Vocabulary::Grid => GridLabel::ALL.get(index).map(GridLabel::canonical),
            Vocabulary::Photo => PhotoLabel::ALL.get(index).map(PhotoLabel::canonical),
        }
    }

    /// Raw label spelling at a model output index.
    pub fn label_at(&self, index: usize) -> Option<&'static str> {
        match self {
            Vocabulary::Grid => GridLabel::ALL.get(index).map(GridLabel::label),
            Vocabulary::Photo => PhotoLabel::ALL.get(index).map(PhotoLabel::label),
        }
    }
}

// ============================================================================
// Probability Distribution
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistributionError {
    #[error("expected {expected} scores for the {vocabulary:?} vocabulary, got {actual}")]
    LengthMismatch {
        vocabulary: Vocabulary,
        expected: usize,
        actual: usize,
    },
    #[error("probability for {0} is negative or not finite")]
    InvalidValue(DefectPattern),
    #[error("probabilities sum to {0:.6}, expected 1.0")]
    BadSum(f64),
    #[error("distribution is empty")]
    Empty,
}

/// Mapping from canonical pattern to probability.
///
/// Always non-negative and summing to 1.0 within [`DISTRIBUTION_SUM_TOLERANCE`];
/// construction rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<DefectPattern, f64>", into = "BTreeMap<DefectPattern, f64>")]
pub struct ProbabilityDistribution {
    probs: BTreeMap<DefectPattern, f64>,
}

impl ProbabilityDistribution {
    /// Build from raw classifier scores in vocabulary output order.
    pub fn from_scores(vocabulary: Vocabulary, scores: &[f64]) -> Result<Self, DistributionError> {
        if scores.len() != vocabulary.len() {
            return Err(DistributionError::LengthMismatch {
                vocabulary,
                expected: vocabulary.len(),
                actual: scores.len(),
            });
        }
        let mut probs = BTreeMap::new();
        for (i, &p) in scores.iter().enumerate() {
            if let Some(pattern) = vocabulary.canonical_at(i) {
                probs.insert(pattern, p);
            }
        }
        Self::try_from(probs)
    }

    pub fn get(&self, pattern: DefectPattern) -> f64 {
        self.probs.get(&pattern).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DefectPattern, f64)> + '_ {
        self.probs.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// Top pattern and its probability. Ties resolve to the earlier canonical pattern.
    pub fn top(&self) -> (DefectPattern, f64) {
        let mut best = (DefectPattern::NoDefect, f64::NEG_INFINITY);
        for (pattern, p) in self.iter() {
            if p > best.1 {
                best = (pattern, p);
            }
        }
        best
    }

    /// Probability of the runner-up pattern (0.0 for single-entry distributions).
    pub fn second(&self) -> f64 {
        let (top, _) = self.top();
        self.iter()
            .filter(|(p, _)| *p != top)
            .map(|(_, v)| v)
            .fold(0.0, f64::max)
    }

    /// Shannon entropy normalized to [0, 1] by ln(n).
    pub fn normalized_entropy(&self) -> f64 {
        let n = self.probs.len();
        if n < 2 {
            return 0.0;
        }
        let h: f64 = self
            .probs
            .values()
            .filter(|p| **p > 0.0)
            .map(|p| -p * p.ln())
            .sum();
        (h / (n as f64).ln()).clamp(0.0, 1.0)
    }

    /// Patterns (excluding no-defect) above a probability cut, descending.
    pub fn defects_above(&self, cut: f64) -> Vec<(DefectPattern, f64)> {
        let mut out: Vec<_> = self
            .iter()
            .filter(|(pattern, p)| pattern.is_defect() && *p > cut)
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }
}

impl TryFrom<BTreeMap<DefectPattern, f64>> for ProbabilityDistribution {
    type Error = DistributionError;

    fn try_from(probs: BTreeMap<DefectPattern, f64>) -> Result<Self, Self::Error> {
        if probs.is_empty() {
            return Err(DistributionError::Empty);
        }
        for (pattern, p) in &probs {
            if !p.is_finite() || *p < 0.0 {
                return Err(DistributionError::InvalidValue(*pattern));
            }
        }
        let sum: f64 = probs.values().sum();
        if (sum - 1.0).abs() > DISTRIBUTION_SUM_TOLERANCE {
            return Err(DistributionError::BadSum(sum));
        }
        // Absorb float drift so downstream sums are exact
        let probs = probs.into_iter().map(|(k, v)| (k, v / sum)).collect();
        Ok(Self { probs })
    }
}

impl From<ProbabilityDistribution> for BTreeMap<DefectPattern, f64> {
    fn from(dist: ProbabilityDistribution) -> Self {
        dist.probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_scores(top: usize, p: f64) -> Vec<f64> {
        let rest = (1.0 - p) / 8.0;
        (0..9).map(|i| if i == top { p } else { rest }).collect()
    }

    #[test]
    fn test_vocabularies_map_to_same_canonical_set() {
        let grid: Vec<_> = GridLabel::ALL.iter().map(GridLabel::canonical).collect();
        let photo: Vec<_> = PhotoLabel::ALL.iter().map(PhotoLabel::canonical).collect();
        for pattern in DefectPattern::ALL {
            assert!(grid.contains(&pattern), "grid missing {pattern}");
            assert!(photo.contains(&pattern), "photo missing {pattern}");
        }
    }

    #[test]
    fn test_photo_underscore_labels_map_to_hyphenated() {
        assert_eq!(PhotoLabel::EdgeRing.label(), "Edge_Ring");
        assert_eq!(PhotoLabel::EdgeRing.canonical(), DefectPattern::EdgeRing);
        assert_eq!(PhotoLabel::Normal.canonical(), DefectPattern::NoDefect);
        assert_eq!(GridLabel::EdgeRing.label(), "Edge-Ring");
    }

    #[test]
    fn test_from_scores_rejects_wrong_length() {
        let err = ProbabilityDistribution::from_scores(Vocabulary::Grid, &[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, DistributionError::LengthMismatch { expected: 9, actual: 2, .. }));
    }

    #[test]
    fn test_from_scores_rejects_negative_and_bad_sum() {
        let mut scores = grid_scores(0, 0.9);
        scores[1] = -0.01;
        assert!(ProbabilityDistribution::from_scores(Vocabulary::Grid, &scores).is_err());

        let scores = vec![0.5; 9];
        assert!(matches!(
            ProbabilityDistribution::from_scores(Vocabulary::Grid, &scores),
            Err(DistributionError::BadSum(_))
        ));
    }

    #[test]
    fn test_distribution_sums_to_one() {
        let dist = ProbabilityDistribution::from_scores(Vocabulary::Grid, &grid_scores(3, 0.887)).unwrap();
        let sum: f64 = dist.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(dist.iter().all(|(_, p)| p >= 0.0));
    }

    #[test]
    fn test_top_and_second() {
        let dist = ProbabilityDistribution::from_scores(Vocabulary::Grid, &grid_scores(3, 0.887)).unwrap();
        let (pattern, p) = dist.top();
        assert_eq!(pattern, DefectPattern::EdgeRing);
        assert!((p - 0.887).abs() < 1e-9);
        assert!((dist.second() - 0.113 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_photo_distribution_uses_canonical_keys() {
        let mut scores = vec![0.0; 9];
        scores[6] = 1.0; // Normal
        let dist = ProbabilityDistribution::from_scores(Vocabulary::Photo, &scores).unwrap();
        assert_eq!(dist.top().0, DefectPattern::NoDefect);
    }

    #[test]
    fn test_entropy_bounds() {
        let uniform = ProbabilityDistribution::from_scores(Vocabulary::Grid, &[1.0 / 9.0; 9]).unwrap();
        assert!((uniform.normalized_entropy() - 1.0).abs() < 1e-9);

        let mut peaked = vec![0.0; 9];
        peaked[0] = 1.0;
        let peaked = ProbabilityDistribution::from_scores(Vocabulary::Grid, &peaked).unwrap();
        assert!(peaked.normalized_entropy().abs() < 1e-9);
    }

    #[test]
    fn test_serializes_as_label_map() {
        let dist = ProbabilityDistribution::from_scores(Vocabulary::Grid, &grid_scores(3, 0.9)).unwrap();
        let json = serde_json::to_value(&dist).unwrap();
        assert!(json.get("Edge-Ring").is_some());
        assert!(json.get("none").is_some());

        let back: ProbabilityDistribution = serde_json::from_value(json).unwrap();
        assert_eq!(back.top().0, DefectPattern::EdgeRing);
    }

    #[test]
    fn test_deserialize_rejects_invalid_sum() {
        let json = serde_json::json!({ "Center": 0.2, "none": 0.2 });
        assert!(serde_json::from_value::<ProbabilityDistribution>(json).is_err());
    }

    #[test]
    fn test_parse_lenient_accepts_both_spellings() {
        assert_eq!(DefectPattern::parse_lenient("Edge_Ring"), Some(DefectPattern::EdgeRing));
        assert_eq!(DefectPattern::parse_lenient("edge-ring"), Some(DefectPattern::EdgeRing));
        assert_eq!(DefectPattern::parse_lenient("Normal"), Some(DefectPattern::NoDefect));
        assert_eq!(DefectPattern::parse_lenient("bogus"), None);
    }
}
