//! Classifier ports
//!
//! Each classifier maps a tensor to scores over a fixed label vocabulary.
//! Grid maps run through two independently implemented classifiers whose
//! outputs the ensemble arbiter chooses between; photos run through one.
//!
//! ## Built-in classifiers
//!
//! 1. **grid-dense** (f32, CHW) - pooled occupancy features, dense softmax
//! 2. **grid-prototype** (f64, HWC) - radial/angular defect density, kernel prototypes
//! 3. **photo-dense** (f32, CHW) - pooled normalized-intensity features, dense softmax
//!
//! Weights load from JSON files named in `[models]`; without a file the
//! reference weights compiled into the crate are used.

pub mod dense;
pub mod prototype;
mod reference;

pub use dense::{DenseModel, DenseSoftmaxClassifier};
pub use prototype::{PrototypeClassifier, PrototypeModel};

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::ModelsConfig;
use crate::error::InspectionError;
use crate::types::{ArtifactKind, Layout, ProbabilityDistribution, Tensor, Vocabulary};

/// Trait for defect classifiers
///
/// Implementations must be immutable after construction: one loaded
/// instance is shared by every pipeline run.
pub trait Classifier: Send + Sync {
    /// Classifier name (e.g. "grid-dense")
    fn name(&self) -> &str;

    /// Identifier of the loaded weights
    fn model_id(&self) -> &str;

    fn vocabulary(&self) -> Vocabulary;

    /// Axis order `infer` expects
    fn layout(&self) -> Layout;

    /// Raw scores in vocabulary output order. `tensor` is already in `layout()`.
    fn infer(&self, tensor: &Tensor) -> Result<Vec<f64>, InspectionError>;

    /// Reshape to this classifier's layout, run inference and map the
    /// scores into a validated distribution over canonical patterns.
    fn classify(&self, tensor: &Tensor) -> Result<ProbabilityDistribution, InspectionError> {
        let shaped = tensor.to_layout(self.layout());
        let scores = self.infer(&shaped)?;
        ProbabilityDistribution::from_scores(self.vocabulary(), &scores).map_err(|e| {
            InspectionError::InferenceUnavailable(format!("{} produced an invalid distribution: {e}", self.name()))
        })
    }
}

/// Softmax over raw logits, numerically stabilized.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

// ============================================================================
// Classifier Set
// ============================================================================

/// The loaded classifiers, constructed once at start and shared read-only.
#[derive(Clone)]
pub struct ClassifierSet {
    grid: Vec<Arc<dyn Classifier>>,
    photo: Vec<Arc<dyn Classifier>>,
}

impl ClassifierSet {
    /// Grid members are arbitrated in the given order (first wins ties).
    pub fn new(grid: Vec<Arc<dyn Classifier>>, photo: Arc<dyn Classifier>) -> Self {
        Self {
            grid,
            photo: vec![photo],
        }
    }

    /// Load the built-in classifiers, reading weight files where configured.
    pub fn load(models: &ModelsConfig) -> Result<Self> {
        let grid_dense = match &models.grid_linear {
            Some(path) => dense_from_file(path, "grid_linear", Vocabulary::Grid)?,
            None => reference::grid_dense_model(),
        };
        let grid_proto = match &models.grid_prototype {
            Some(path) => PrototypeModel::from_file(path)?,
            None => reference::grid_prototype_model(),
        };
        let photo_dense = match &models.photo_linear {
            Some(path) => dense_from_file(path, "photo_linear", Vocabulary::Photo)?,
            None => reference::photo_dense_model(),
        };

        if models.grid_linear.is_none() || models.grid_prototype.is_none() || models.photo_linear.is_none() {
            warn!("One or more model weight files not configured, using reference weights");
        }

        let set = Self::new(
            vec![
                Arc::new(DenseSoftmaxClassifier::new("grid-dense", grid_dense)?),
                Arc::new(PrototypeClassifier::new("grid-prototype", grid_proto)?),
            ],
            Arc::new(DenseSoftmaxClassifier::new("photo-dense", photo_dense)?),
        );

        for c in set.grid.iter().chain(set.photo.iter()) {
            info!(
                classifier = c.name(),
                model_id = c.model_id(),
                vocabulary = ?c.vocabulary(),
                layout = ?c.layout(),
                "Classifier loaded"
            );
        }
        Ok(set)
    }

    /// Built-in reference classifiers, no files read.
    pub fn reference() -> Result<Self> {
        Self::load(&ModelsConfig::default())
    }

    pub fn for_kind(&self, kind: ArtifactKind) -> &[Arc<dyn Classifier>] {
        match kind {
            ArtifactKind::Grid => &self.grid,
            ArtifactKind::Photo => &self.photo,
        }
    }
}

impl std::fmt::Debug for ClassifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |v: &[Arc<dyn Classifier>]| v.iter().map(|c| c.name().to_string()).collect::<Vec<_>>();
        f.debug_struct("ClassifierSet")
            .field("grid", &names(&self.grid))
            .field("photo", &names(&self.photo))
            .finish()
    }
}

/// Dense weights for a slot that only accepts `expected` labels.
fn dense_from_file(path: &Path, slot: &str, expected: Vocabulary) -> Result<DenseModel> {
    let model = DenseModel::from_file(path)?;
    if model.vocabulary != expected {
        bail!(
            "models.{slot} ({}) declares the {:?} vocabulary, expected {:?}",
            path.display(),
            model.vocabulary,
            expected
        );
    }
    Ok(model)
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse model file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[3] > 0.99);
    }

    #[test]
    fn test_reference_set_shapes() {
        let set = ClassifierSet::reference().unwrap();
        assert_eq!(set.for_kind(ArtifactKind::Grid).len(), 2);
        assert_eq!(set.for_kind(ArtifactKind::Photo).len(), 1);
        assert_eq!(set.for_kind(ArtifactKind::Grid)[0].layout(), Layout::Chw);
        assert_eq!(set.for_kind(ArtifactKind::Grid)[1].layout(), Layout::Hwc);
        assert_eq!(set.for_kind(ArtifactKind::Photo)[0].vocabulary(), Vocabulary::Photo);
    }

    #[test]
    fn test_grid_weights_in_photo_slot_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");
        std::fs::write(&path, serde_json::to_vec(&reference::grid_dense_model()).unwrap()).unwrap();

        let swapped = ModelsConfig {
            photo_linear: Some(path.clone()),
            ..ModelsConfig::default()
        };
        let err = ClassifierSet::load(&swapped).unwrap_err();
        assert!(err.to_string().contains("models.photo_linear"), "{err}");

        // Same file is fine in its own slot
        let matched = ModelsConfig {
            grid_linear: Some(path),
            ..ModelsConfig::default()
        };
        assert!(ClassifierSet::load(&matched).is_ok());
    }

    #[test]
    fn test_missing_weight_file_fails_load() {
        let models = ModelsConfig {
            grid_linear: Some("/nonexistent/weights.json".into()),
            ..ModelsConfig::default()
        };
        assert!(ClassifierSet::load(&models).is_err());
    }
}
