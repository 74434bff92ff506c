//! Photographic artifact decoding and normalization.

use image::imageops::FilterType;

use crate::config::PhotoConfig;
use crate::error::InspectionError;
use crate::types::Tensor;

/// True if the payload sniffs as a raster format the decoder understands.
pub fn sniff(bytes: &[u8]) -> Option<image::ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decode, resize to `size`×`size`, convert to RGB and apply per-channel
/// mean/std normalization. Returns a CHW tensor and the source dimensions.
pub fn to_tensor(bytes: &[u8], cfg: &PhotoConfig) -> Result<(Tensor, (usize, usize)), InspectionError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| InspectionError::UnsupportedFormat(format!("image decode failed: {e}")))?;
    let source = (decoded.width() as usize, decoded.height() as usize);

    let side = cfg.size;
    let side_u32 = u32::try_from(side)
        .map_err(|_| InspectionError::UnsupportedFormat(format!("photo size {side} too large")))?;
    let rgb = decoded
        .resize_exact(side_u32, side_u32, FilterType::Triangle)
        .to_rgb8();

    let plane = side * side;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * side + x as usize;
        for c in 0..3 {
            let scaled = f32::from(pixel.0[c]) / 255.0;
            data[c * plane + offset] = (scaled - cfg.mean[c]) / cfg.std[c];
        }
    }

    let tensor = Tensor::from_chw(3, side, side, data)
        .ok_or_else(|| InspectionError::UnsupportedFormat("photo tensor shape".to_string()))?;
    Ok((tensor, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_resizes_and_normalizes() {
        let cfg = PhotoConfig::default();
        let (tensor, source) = to_tensor(&png(120, 80, [255, 0, 0]), &cfg).unwrap();
        assert_eq!(source, (120, 80));
        assert_eq!(tensor.shape(), [3, 56, 56]);

        let red = (1.0 - 0.485) / 0.229;
        let green = (0.0 - 0.456) / 0.224;
        assert!((tensor.at(0, 10, 10) - red).abs() < 1e-4);
        assert!((tensor.at(1, 10, 10) - green).abs() < 1e-4);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(&png(4, 4, [0, 0, 0])), Some(image::ImageFormat::Png));
        assert_eq!(sniff(b"\x93NUMPY"), None);
    }

    #[test]
    fn test_corrupt_image_is_unsupported() {
        let mut bytes = png(8, 8, [1, 2, 3]);
        bytes.truncate(20);
        let err = to_tensor(&bytes, &PhotoConfig::default()).unwrap_err();
        assert!(matches!(err, InspectionError::UnsupportedFormat(_)));
    }
}
