//! Kernel-prototype classifier over radial/angular defect density (f64 backend).
//!
//! Features are rotation invariant: overall defect density, density in four
//! radial bands, and the eight angular-sector densities sorted descending.
//! Each label owns a prototype feature vector; scores are a softmax over
//! negative squared distances scaled by the kernel bandwidth.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

use anyhow::{bail, Result};

use super::{softmax, Classifier};
use crate::error::InspectionError;
use crate::types::{Layout, Tensor, Vocabulary};

pub const RADIAL_BANDS: usize = 4;
pub const ANGULAR_SECTORS: usize = 8;
pub const FEATURE_LEN: usize = 1 + RADIAL_BANDS + ANGULAR_SECTORS;

/// Channel indices of the one-hot grid encoding.
const NORMAL_CHANNEL: usize = 1;
const DEFECT_CHANNEL: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeModel {
    pub model_id: String,
    pub bandwidth: f64,
    /// One prototype per grid label, in vocabulary order
    pub prototypes: Vec<Vec<f64>>,
}

impl PrototypeModel {
    pub fn from_file(path: &Path) -> Result<Self> {
        super::read_json(path)
    }

    fn check(&self) -> Result<()> {
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            bail!("model {}: bandwidth must be > 0", self.model_id);
        }
        if self.prototypes.len() != Vocabulary::Grid.len() {
            bail!(
                "model {}: expected {} prototypes, got {}",
                self.model_id,
                Vocabulary::Grid.len(),
                self.prototypes.len()
            );
        }
        if self.prototypes.iter().any(|p| p.len() != FEATURE_LEN) {
            bail!("model {}: every prototype needs {} features", self.model_id, FEATURE_LEN);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DensityAccumulator {
    wafer: f64,
    defect: f64,
    band_wafer: [f64; RADIAL_BANDS],
    band_defect: [f64; RADIAL_BANDS],
    sector_wafer: [f64; ANGULAR_SECTORS],
    sector_defect: [f64; ANGULAR_SECTORS],
}

impl DensityAccumulator {
    fn merge(mut self, other: Self) -> Self {
        self.wafer += other.wafer;
        self.defect += other.defect;
        for i in 0..RADIAL_BANDS {
            self.band_wafer[i] += other.band_wafer[i];
            self.band_defect[i] += other.band_defect[i];
        }
        for i in 0..ANGULAR_SECTORS {
            self.sector_wafer[i] += other.sector_wafer[i];
            self.sector_defect[i] += other.sector_defect[i];
        }
        self
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Extract the density feature vector from an HWC one-hot grid tensor.
pub fn density_features(tensor: &Tensor) -> Vec<f64> {
    let (h, w) = (tensor.height(), tensor.width());
    let cy = (h as f64 - 1.0) / 2.0;
    let cx = (w as f64 - 1.0) / 2.0;
    let radius = (h.min(w) as f64 / 2.0).max(1.0);

    let acc = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut row = DensityAccumulator::default();
            for x in 0..w {
                let defect = f64::from(tensor.at(DEFECT_CHANNEL, y, x)) > 0.5;
                let on_wafer = defect || f64::from(tensor.at(NORMAL_CHANNEL, y, x)) > 0.5;
                if !on_wafer {
                    continue;
                }
                let (dy, dx) = (y as f64 - cy, x as f64 - cx);
                let r = ((dy * dy + dx * dx).sqrt() / radius).min(0.999_999);
                let band = ((r * RADIAL_BANDS as f64) as usize).min(RADIAL_BANDS - 1);
                let angle = dy.atan2(dx).rem_euclid(2.0 * PI);
                let sector = ((angle / (2.0 * PI) * ANGULAR_SECTORS as f64) as usize).min(ANGULAR_SECTORS - 1);

                row.wafer += 1.0;
                row.band_wafer[band] += 1.0;
                row.sector_wafer[sector] += 1.0;
                if defect {
                    row.defect += 1.0;
                    row.band_defect[band] += 1.0;
                    row.sector_defect[sector] += 1.0;
                }
            }
            row
        })
        .reduce(DensityAccumulator::default, DensityAccumulator::merge);

    let mut features = Vec::with_capacity(FEATURE_LEN);
    features.push(ratio(acc.defect, acc.wafer));
    for i in 0..RADIAL_BANDS {
        features.push(ratio(acc.band_defect[i], acc.band_wafer[i]));
    }
    let mut sectors: Vec<f64> = (0..ANGULAR_SECTORS)
        .map(|i| ratio(acc.sector_defect[i], acc.sector_wafer[i]))
        .collect();
    sectors.sort_by(|a, b| b.total_cmp(a));
    features.extend(sectors);
    features
}

pub struct PrototypeClassifier {
    name: String,
    model: PrototypeModel,
}

impl PrototypeClassifier {
    pub fn new(name: impl Into<String>, model: PrototypeModel) -> Result<Self> {
        model.check()?;
        Ok(Self {
            name: name.into(),
            model,
        })
    }
}

impl Classifier for PrototypeClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model.model_id
    }

    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Grid
    }

    fn layout(&self) -> Layout {
        Layout::Hwc
    }

    fn infer(&self, tensor: &Tensor) -> Result<Vec<f64>, InspectionError> {
        if tensor.channels() != 3 || tensor.layout() != Layout::Hwc {
            return Err(InspectionError::InferenceUnavailable(format!(
                "{} expects a 3-channel HWC tensor, got {:?} {:?}",
                self.name,
                tensor.layout(),
                tensor.shape()
            )));
        }
        let features = density_features(tensor);
        let denom = 2.0 * self.model.bandwidth * self.model.bandwidth;
        let logits: Vec<f64> = self
            .model
            .prototypes
            .iter()
            .map(|proto| {
                let d2: f64 = proto.iter().zip(&features).map(|(p, f)| (p - f).powi(2)).sum();
                -d2 / denom
            })
            .collect();
        Ok(softmax(&logits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-hot HWC grid from a die-state function (0 off-wafer, 1 normal, 2 defect).
    fn grid(n: usize, state: impl Fn(usize, usize) -> usize) -> Tensor {
        let mut data = vec![0.0f32; 3 * n * n];
        for y in 0..n {
            for x in 0..n {
                data[state(y, x) * n * n + y * n + x] = 1.0;
            }
        }
        Tensor::from_chw(3, n, n, data).unwrap().to_layout(Layout::Hwc)
    }

    #[test]
    fn test_clean_wafer_has_zero_density() {
        let f = density_features(&grid(20, |_, _| 1));
        assert_eq!(f.len(), FEATURE_LEN);
        assert!(f.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_center_blob_concentrates_in_inner_band() {
        let f = density_features(&grid(40, |y, x| {
            let (dy, dx) = (y as f64 - 19.5, x as f64 - 19.5);
            if (dy * dy + dx * dx).sqrt() < 5.0 { 2 } else { 1 }
        }));
        assert!(f[1] > 0.5, "inner band density {}", f[1]);
        assert_eq!(f[4], 0.0);
    }

    #[test]
    fn test_sector_features_sorted_descending() {
        let f = density_features(&grid(30, |y, x| if y < 5 && x > 20 { 2 } else { 1 }));
        let sectors = &f[1 + RADIAL_BANDS..];
        assert!(sectors.windows(2).all(|w| w[0] >= w[1]));
        assert!(sectors[0] > 0.0);
    }

    #[test]
    fn test_rejects_wrong_prototype_count() {
        let model = PrototypeModel {
            model_id: "x".into(),
            bandwidth: 0.1,
            prototypes: vec![vec![0.0; FEATURE_LEN]; 3],
        };
        assert!(PrototypeClassifier::new("p", model).is_err());
    }
}
