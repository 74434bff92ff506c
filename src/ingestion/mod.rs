//! Artifact preprocessing
//!
//! Turns an uploaded artifact into the fixed-shape CHW tensor every
//! classifier starts from:
//!
//! - **Grid maps** (NPY): exact N×N check, die states {0, 1, 2} one-hot
//!   encoded into three channels (non-wafer, normal, defect) plus die counts
//! - **Photos**: decode, resize, RGB, per-channel mean/std normalization
//!
//! The declared kind must match the payload's magic bytes.

pub mod npy;
pub mod photo;

use tracing::debug;

use crate::agents::Stage;
use crate::config::{GridConfig, PhotoConfig};
use crate::error::InspectionError;
use crate::types::{ArtifactInput, ArtifactKind, PixelCounts, PreparedArtifact, Tensor};

/// Die state values in grid maps.
const NON_WAFER: u8 = 0;
const NORMAL_DIE: u8 = 1;
const DEFECT_DIE: u8 = 2;

/// Kind implied by the payload's magic bytes, if any.
pub fn detect_kind(bytes: &[u8]) -> Option<ArtifactKind> {
    if npy::has_magic(bytes) {
        Some(ArtifactKind::Grid)
    } else {
        photo::sniff(bytes).map(|_| ArtifactKind::Photo)
    }
}

/// Pure artifact-to-tensor transform.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    grid: GridConfig,
    photo: PhotoConfig,
}

impl Preprocessor {
    pub fn new(grid: GridConfig, photo: PhotoConfig) -> Self {
        Self { grid, photo }
    }

    pub fn grid_size(&self) -> usize {
        self.grid.size
    }

    /// Check the declared kind against the payload's magic bytes.
    fn check_kind(artifact: &ArtifactInput) -> Result<(), InspectionError> {
        let bytes = artifact.bytes();
        let is_npy = npy::has_magic(bytes);
        let image_format = photo::sniff(bytes);
        match artifact.kind() {
            ArtifactKind::Grid if is_npy => Ok(()),
            ArtifactKind::Photo if image_format.is_some() => Ok(()),
            declared => {
                let detected = if is_npy {
                    "an NPY grid".to_string()
                } else if let Some(fmt) = image_format {
                    format!("a {fmt:?} image")
                } else {
                    "unrecognized bytes".to_string()
                };
                Err(InspectionError::UnsupportedFormat(format!(
                    "declared {declared} but '{}' contains {detected}",
                    artifact.file_name()
                )))
            }
        }
    }

    fn prepare_grid(&self, bytes: &[u8]) -> Result<(Tensor, PixelCounts, (usize, usize)), InspectionError> {
        let array = npy::parse(bytes)?;
        let n = self.grid.size;
        if array.shape.len() != 2 || array.shape[0] != n || array.shape[1] != n {
            return Err(InspectionError::ShapeMismatch {
                expected: n,
                actual: array
                    .shape
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("x"),
            });
        }

        let plane = n * n;
        let mut data = vec![0.0f32; 3 * plane];
        let mut counts = PixelCounts::default();
        for (i, value) in array.values.iter().enumerate() {
            let state = match *value {
                v if v == f64::from(NON_WAFER) => NON_WAFER,
                v if v == f64::from(NORMAL_DIE) => NORMAL_DIE,
                v if v == f64::from(DEFECT_DIE) => DEFECT_DIE,
                v => {
                    return Err(InspectionError::UnsupportedFormat(format!(
                        "grid cell {} holds {v}, expected 0, 1 or 2",
                        i
                    )))
                }
            };
            match state {
                NON_WAFER => counts.non_wafer += 1,
                NORMAL_DIE => counts.normal += 1,
                _ => counts.defect += 1,
            }
            data[usize::from(state) * plane + i] = 1.0;
        }

        let tensor = Tensor::from_chw(3, n, n, data)
            .ok_or_else(|| InspectionError::UnsupportedFormat("grid tensor shape".to_string()))?;
        Ok((tensor, counts, (n, n)))
    }
}

impl<'a> Stage<&'a ArtifactInput, PreparedArtifact> for Preprocessor {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    fn run(&self, artifact: &'a ArtifactInput) -> Result<PreparedArtifact, InspectionError> {
        Self::check_kind(artifact)?;
        let digest = format!("{:x}", md5::compute(artifact.bytes()));

        let prepared = match artifact.kind() {
            ArtifactKind::Grid => {
                let (tensor, counts, dims) = self.prepare_grid(artifact.bytes())?;
                PreparedArtifact {
                    kind: ArtifactKind::Grid,
                    tensor,
                    pixel_counts: Some(counts),
                    source_dims: dims,
                    digest,
                }
            }
            ArtifactKind::Photo => {
                let (tensor, dims) = photo::to_tensor(artifact.bytes(), &self.photo)?;
                PreparedArtifact {
                    kind: ArtifactKind::Photo,
                    tensor,
                    pixel_counts: None,
                    source_dims: dims,
                    digest,
                }
            }
        };

        debug!(
            file = %artifact.file_name(),
            kind = %prepared.kind,
            digest = %prepared.digest,
            "Artifact prepared"
        );
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_bytes(n: usize, fill: impl Fn(usize, usize) -> u8) -> Vec<u8> {
        let cells: Vec<u8> = (0..n * n).map(|i| fill(i / n, i % n)).collect();
        npy::encode_u8_grid(n, &cells)
    }

    #[test]
    fn test_grid_one_hot_and_counts() {
        let bytes = grid_bytes(56, |r, c| if r == 0 { 0 } else if c == 0 { 2 } else { 1 });
        let artifact = ArtifactInput::new("w.npy", ArtifactKind::Grid, bytes);
        let prepared = Preprocessor::default().run(&artifact).unwrap();

        let counts = prepared.pixel_counts.unwrap();
        assert_eq!(counts.non_wafer, 56);
        assert_eq!(counts.defect, 55);
        assert_eq!(counts.normal, 55 * 55);
        assert_eq!(prepared.tensor.shape(), [3, 56, 56]);
        assert_eq!(prepared.tensor.at(0, 0, 5), 1.0);
        assert_eq!(prepared.tensor.at(2, 3, 0), 1.0);
        assert_eq!(prepared.tensor.at(1, 3, 3), 1.0);
        assert_eq!(prepared.tensor.at(2, 3, 3), 0.0);
        assert_eq!(prepared.digest.len(), 32);
    }

    #[test]
    fn test_wrong_grid_size_is_shape_mismatch() {
        let artifact = ArtifactInput::new("w.npy", ArtifactKind::Grid, grid_bytes(32, |_, _| 1));
        let err = Preprocessor::default().run(&artifact).unwrap_err();
        assert_eq!(
            err,
            InspectionError::ShapeMismatch { expected: 56, actual: "32x32".to_string() }
        );
    }

    #[test]
    fn test_out_of_range_cell_is_unsupported() {
        let artifact = ArtifactInput::new("w.npy", ArtifactKind::Grid, grid_bytes(56, |_, _| 7));
        let err = Preprocessor::default().run(&artifact).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_declared_photo_with_npy_payload_is_rejected() {
        let artifact = ArtifactInput::new("w.png", ArtifactKind::Photo, grid_bytes(56, |_, _| 1));
        let err = Preprocessor::default().run(&artifact).unwrap_err();
        assert!(matches!(err, InspectionError::UnsupportedFormat(m) if m.contains("NPY")));
    }

    #[test]
    fn test_garbage_grid_is_rejected() {
        let artifact = ArtifactInput::new("w.npy", ArtifactKind::Grid, b"not a grid".to_vec());
        assert!(Preprocessor::default().run(&artifact).is_err());
    }

    #[test]
    fn test_detect_kind_from_magic() {
        assert_eq!(detect_kind(&grid_bytes(4, |_, _| 1)), Some(ArtifactKind::Grid));
        assert_eq!(detect_kind(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some(ArtifactKind::Photo));
        assert_eq!(detect_kind(b"lot report, plain text"), None);
    }

    #[test]
    fn test_custom_grid_size() {
        let pre = Preprocessor::new(GridConfig { size: 16 }, PhotoConfig::default());
        let artifact = ArtifactInput::new("w.npy", ArtifactKind::Grid, grid_bytes(16, |_, _| 1));
        let prepared = pre.run(&artifact).unwrap();
        assert_eq!(prepared.tensor.shape(), [3, 16, 16]);
    }
}
