//! Dense softmax classifier over block-pooled CHW features (f32 backend).

use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::{bail, Result};

use super::{softmax, Classifier};
use crate::error::InspectionError;
use crate::types::{Layout, Tensor, Vocabulary};

/// Serialized weights: one row per vocabulary label over
/// `3 * pool * pool` pooled features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseModel {
    pub model_id: String,
    pub vocabulary: Vocabulary,
    pub pool: usize,
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl DenseModel {
    pub fn from_file(path: &Path) -> Result<Self> {
        super::read_json(path)
    }

    fn feature_len(&self) -> usize {
        3 * self.pool * self.pool
    }

    fn check(&self) -> Result<()> {
        let labels = self.vocabulary.len();
        if self.pool == 0 {
            bail!("model {}: pool must be > 0", self.model_id);
        }
        if self.weights.len() != labels || self.bias.len() != labels {
            bail!(
                "model {}: expected {} weight rows and biases, got {} and {}",
                self.model_id,
                labels,
                self.weights.len(),
                self.bias.len()
            );
        }
        if let Some(row) = self.weights.iter().position(|r| r.len() != self.feature_len()) {
            bail!(
                "model {}: weight row {} has {} entries, expected {}",
                self.model_id,
                row,
                self.weights[row].len(),
                self.feature_len()
            );
        }
        Ok(())
    }
}

/// Average-pool each channel of a CHW tensor to a `pool`×`pool` grid.
pub(crate) fn block_pool(tensor: &Tensor, pool: usize) -> Vec<f32> {
    let (h, w) = (tensor.height(), tensor.width());
    let mut out = Vec::with_capacity(tensor.channels() * pool * pool);
    for c in 0..tensor.channels() {
        for by in 0..pool {
            let (y0, y1) = (by * h / pool, ((by + 1) * h / pool).max(by * h / pool + 1).min(h));
            for bx in 0..pool {
                let (x0, x1) = (bx * w / pool, ((bx + 1) * w / pool).max(bx * w / pool + 1).min(w));
                let mut sum = 0.0f32;
                let mut n = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += tensor.at(c, y, x);
                        n += 1;
                    }
                }
                out.push(if n == 0 { 0.0 } else { sum / n as f32 });
            }
        }
    }
    out
}

pub struct DenseSoftmaxClassifier {
    name: String,
    model: DenseModel,
}

impl DenseSoftmaxClassifier {
    pub fn new(name: impl Into<String>, model: DenseModel) -> Result<Self> {
        model.check()?;
        Ok(Self {
            name: name.into(),
            model,
        })
    }
}

impl Classifier for DenseSoftmaxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model.model_id
    }

    fn vocabulary(&self) -> Vocabulary {
        self.model.vocabulary
    }

    fn layout(&self) -> Layout {
        Layout::Chw
    }

    fn infer(&self, tensor: &Tensor) -> Result<Vec<f64>, InspectionError> {
        if tensor.channels() != 3 || tensor.layout() != Layout::Chw {
            return Err(InspectionError::InferenceUnavailable(format!(
                "{} expects a 3-channel CHW tensor, got {:?} {:?}",
                self.name,
                tensor.layout(),
                tensor.shape()
            )));
        }
        let features = block_pool(tensor, self.model.pool);
        let logits: Vec<f64> = self
            .model
            .weights
            .iter()
            .zip(&self.model.bias)
            .map(|(row, b)| {
                let dot: f32 = row.iter().zip(&features).map(|(w, f)| w * f).sum();
                f64::from(dot + b)
            })
            .collect();
        Ok(softmax(&logits))
    }
}
