//! Image preprocessing for model input.
//!
//! Decodes an uploaded image, forces RGB, resizes to the square resolution
//! the fold models were trained on, and scales channel values into [0, 1].

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array4, Axis};
use tracing::debug;

use crate::error::PredictError;

/// Batched image tensor shaped (1, H, W, 3), channel values in [0, 1].
pub type ImageTensor = Array4<f32>;

/// Converts raw upload bytes into the tensor the fold models expect.
pub struct Preprocessor {
    target_size: u32,
}

impl Preprocessor {
    /// Create a preprocessor targeting a square `size x size` resolution.
    pub fn new(target_size: u32) -> Self {
        Self { target_size }
    }

    /// Decode, normalize and batch raw image bytes.
    ///
    /// Any decode failure (unknown format, truncated file, unsupported
    /// pixel layout) maps to [`PredictError::Decode`].
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor, PredictError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| PredictError::Decode(e.to_string()))?;

        // Collapse every color mode (grayscale, RGBA, 16-bit) to 8-bit RGB.
        let rgb: RgbImage = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();

        let size = self.target_size;
        let resized = if (width, height) == (size, size) {
            rgb
        } else {
            debug!(
                from = format!("{}x{}", width, height),
                to = format!("{}x{}", size, size),
                "Resizing input image"
            );
            image::imageops::resize(&rgb, size, size, FilterType::Lanczos3)
        };

        let side = size as usize;
        let mut tensor = ImageTensor::zeros((1, side, side, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let image::Rgb([r, g, b]) = *pixel;
            tensor[[0, y as usize, x as usize, 0]] = f32::from(r) / 255.0;
            tensor[[0, y as usize, x as usize, 1]] = f32::from(g) / 255.0;
            tensor[[0, y as usize, x as usize, 2]] = f32::from(b) / 255.0;
        }

        Ok(tensor)
    }
}

/// Mirror the tensor along its width axis (axis 2 of (1, H, W, 3)).
///
/// Used for test-time augmentation.
pub fn horizontal_flip(tensor: &ImageTensor) -> ImageTensor {
    let mut flipped = tensor.clone();
    flipped.invert_axis(Axis(2));
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(img: RgbImage) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode test image");
        bytes.into_inner()
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let mut img = RgbImage::new(64, 48);
        for (_, _, p) in img.enumerate_pixels_mut() {
            *p = Rgb([255, 128, 0]);
        }
        let bytes = encode_png(img);

        let tensor = Preprocessor::new(32).preprocess(&bytes).expect("preprocess");
        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
        assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_keeps_exact_size() {
        let img = RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]));
        let bytes = encode_png(img);

        let tensor = Preprocessor::new(16).preprocess(&bytes).expect("preprocess");
        assert_eq!(tensor.shape(), &[1, 16, 16, 3]);
        assert!((tensor[[0, 5, 5, 2]] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_rejects_garbage() {
        let err = Preprocessor::new(32)
            .preprocess(b"definitely not an image")
            .expect_err("garbage must not decode");
        assert!(matches!(err, PredictError::Decode(_)));
    }

    #[test]
    fn test_preprocess_rejects_truncated_image() {
        let img = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let mut bytes = encode_png(img);
        bytes.truncate(bytes.len() / 2);

        let err = Preprocessor::new(16)
            .preprocess(&bytes)
            .expect_err("truncated file must not decode");
        assert!(matches!(err, PredictError::Decode(_)));
    }

    #[test]
    fn test_horizontal_flip_mirrors_width() {
        let mut tensor = ImageTensor::zeros((1, 1, 3, 3));
        tensor[[0, 0, 0, 0]] = 0.1;
        tensor[[0, 0, 1, 0]] = 0.2;
        tensor[[0, 0, 2, 0]] = 0.3;

        let flipped = horizontal_flip(&tensor);
        assert!((flipped[[0, 0, 0, 0]] - 0.3).abs() < 1e-6);
        assert!((flipped[[0, 0, 1, 0]] - 0.2).abs() < 1e-6);
        assert!((flipped[[0, 0, 2, 0]] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_double_flip_is_identity() {
        let mut tensor = ImageTensor::zeros((1, 2, 4, 3));
        for (i, v) in tensor.iter_mut().enumerate() {
            *v = i as f32;
        }
        let twice = horizontal_flip(&horizontal_flip(&tensor));
        assert_eq!(tensor, twice);
    }
}
