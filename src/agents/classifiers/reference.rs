//! Reference weights compiled into the crate.
//!
//! Derived from geometric templates of each defect pattern rather than a
//! training run. Good enough to exercise the full pipeline; production
//! deployments point `[models]` at trained weight files.

use std::f64::consts::PI;

use super::dense::DenseModel;
use super::prototype::{PrototypeModel, ANGULAR_SECTORS, FEATURE_LEN, RADIAL_BANDS};
use crate::types::{DefectPattern, Vocabulary};

const POOL: usize = 7;
const DENSE_SCALE: f64 = 24.0;
/// Defect density below which the clean-wafer label wins.
const CLEAN_DENSITY: f64 = 0.04;

/// Expected defect occupancy of a pooled cell for a pattern, given the cell
/// center in wafer coordinates (radius 1 at the rim).
fn template(pattern: DefectPattern, dx: f64, dy: f64) -> f64 {
    let r = (dx * dx + dy * dy).sqrt();
    if r > 1.05 {
        return 0.0;
    }
    let angle = dy.atan2(dx).rem_euclid(2.0 * PI);
    let hit = match pattern {
        DefectPattern::Center => r < 0.35,
        DefectPattern::Donut => (0.35..0.65).contains(&r),
        DefectPattern::EdgeLoc => r >= 0.7 && angle < PI / 2.0,
        DefectPattern::EdgeRing => r >= 0.75,
        DefectPattern::Loc => (0.25..0.6).contains(&r) && (PI..1.5 * PI).contains(&angle),
        DefectPattern::NearFull => true,
        DefectPattern::Random => return 0.3,
        DefectPattern::Scratch => (dx - dy).abs() < 0.2,
        DefectPattern::NoDefect => false,
    };
    if hit {
        1.0
    } else {
        0.0
    }
}

/// Per-label weights over the defect-evidence channel(s).
///
/// Logit = scale × (mean evidence inside template − mean evidence outside).
fn template_rows(labels: &[DefectPattern], channels: &[usize]) -> (Vec<Vec<f32>>, Vec<f32>) {
    let cells = POOL * POOL;
    let coord = |i: usize| (i as f64 + 0.5) / POOL as f64 * 2.0 - 1.0;
    let on_wafer: Vec<bool> = (0..cells)
        .map(|i| {
            let (dx, dy) = (coord(i % POOL), coord(i / POOL));
            (dx * dx + dy * dy).sqrt() <= 1.05
        })
        .collect();
    let wafer_cells = on_wafer.iter().filter(|w| **w).count().max(1) as f64;
    let per_channel = DENSE_SCALE / channels.len() as f64;

    let mut weights = Vec::with_capacity(labels.len());
    let mut bias = Vec::with_capacity(labels.len());
    for pattern in labels {
        let t: Vec<f64> = (0..cells)
            .map(|i| template(*pattern, coord(i % POOL), coord(i / POOL)))
            .collect();
        let inside: f64 = t.iter().sum();
        let outside: f64 = on_wafer.iter().zip(&t).filter(|(w, v)| **w && **v == 0.0).count() as f64;

        let mut row = vec![0.0f32; 3 * cells];
        let label_bias = if pattern.is_defect() {
            for (i, v) in t.iter().enumerate() {
                let w = if *v > 0.0 {
                    v / inside.max(1.0)
                } else if on_wafer[i] && outside > 0.0 {
                    -1.0 / outside
                } else {
                    0.0
                };
                for c in channels {
                    row[c * cells + i] = (w * per_channel) as f32;
                }
            }
            0.0
        } else {
            for (i, wafer) in on_wafer.iter().enumerate() {
                if *wafer {
                    for c in channels {
                        row[c * cells + i] = (-per_channel / wafer_cells) as f32;
                    }
                }
            }
            (DENSE_SCALE * CLEAN_DENSITY) as f32
        };
        weights.push(row);
        bias.push(label_bias);
    }
    (weights, bias)
}

fn vocabulary_patterns(vocabulary: Vocabulary) -> Vec<DefectPattern> {
    (0..vocabulary.len())
        .filter_map(|i| vocabulary.canonical_at(i))
        .collect()
}

pub(super) fn grid_dense_model() -> DenseModel {
    // Evidence lives in the one-hot defect channel
    let (weights, bias) = template_rows(&vocabulary_patterns(Vocabulary::Grid), &[2]);
    DenseModel {
        model_id: "grid-dense-ref-v1".to_string(),
        vocabulary: Vocabulary::Grid,
        pool: POOL,
        weights,
        bias,
    }
}

pub(super) fn photo_dense_model() -> DenseModel {
    // Normalized intensity on every channel acts as evidence
    let (weights, bias) = template_rows(&vocabulary_patterns(Vocabulary::Photo), &[0, 1, 2]);
    DenseModel {
        model_id: "photo-dense-ref-v1".to_string(),
        vocabulary: Vocabulary::Photo,
        pool: POOL,
        weights,
        bias,
    }
}

fn prototype(overall: f64, bands: [f64; RADIAL_BANDS], sectors: [f64; ANGULAR_SECTORS]) -> Vec<f64> {
    let mut v = Vec::with_capacity(FEATURE_LEN);
    v.push(overall);
    v.extend_from_slice(&bands);
    v.extend_from_slice(&sectors);
    v
}

pub(super) fn grid_prototype_model() -> PrototypeModel {
    let flat = |d: f64| [d; ANGULAR_SECTORS];
    let prototypes = vocabulary_patterns(Vocabulary::Grid)
        .into_iter()
        .map(|pattern| match pattern {
            DefectPattern::Center => prototype(0.08, [0.6, 0.15, 0.0, 0.0], [0.1, 0.1, 0.09, 0.09, 0.08, 0.08, 0.07, 0.07]),
            DefectPattern::Donut => prototype(0.15, [0.05, 0.5, 0.2, 0.02], flat(0.15)),
            DefectPattern::EdgeLoc => prototype(0.06, [0.0, 0.0, 0.03, 0.2], [0.35, 0.15, 0.02, 0.0, 0.0, 0.0, 0.0, 0.0]),
            DefectPattern::EdgeRing => prototype(0.2, [0.0, 0.0, 0.05, 0.55], flat(0.2)),
            DefectPattern::Loc => prototype(0.05, [0.05, 0.15, 0.05, 0.0], [0.25, 0.1, 0.02, 0.0, 0.0, 0.0, 0.0, 0.0]),
            DefectPattern::NearFull => prototype(0.85, [0.85; RADIAL_BANDS], flat(0.85)),
            DefectPattern::Random => prototype(0.12, [0.12; RADIAL_BANDS], [0.15, 0.14, 0.13, 0.12, 0.12, 0.11, 0.1, 0.09]),
            DefectPattern::Scratch => prototype(0.03, [0.03; RADIAL_BANDS], [0.08, 0.07, 0.02, 0.01, 0.0, 0.0, 0.0, 0.0]),
            DefectPattern::NoDefect => prototype(0.005, [0.005; RADIAL_BANDS], flat(0.005)),
        })
        .collect();
    PrototypeModel {
        model_id: "grid-prototype-ref-v1".to_string(),
        bandwidth: 0.15,
        prototypes,
    }
}
