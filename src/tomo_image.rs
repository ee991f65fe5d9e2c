//
// Image management
//
// Load and save grayscale images as vectors of floats in [0,1], plus
// the conversion from a reconstructed matrix.
//

use anyhow::{Context, Result};
use image::{GrayImage, Pixel};
use nalgebra::DMatrix;
use std::path::Path;

pub struct Image {
    pub width: usize,
    pub height: usize,
    /// Row-major pixel values in [0,1].
    pub data: Vec<f64>,
}

impl Image {
    pub fn load(path: &Path) -> Result<Image> {
        let orig_img = image::open(path)
            .with_context(|| format!("loading image {}", path.display()))?;
        let grey_img = orig_img.into_luma8();

        let width = grey_img.width() as usize;
        let height = grey_img.height() as usize;

        Ok(Image {
            width,
            height,
            data: grey_img
                .pixels()
                .map(|p| p.channels()[0] as f64 / 255.0)
                .collect(),
        })
    }

    // Reconstructed values land on an arbitrary scale, so writing
    // always normalises first.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data_as_u8: Vec<u8> = normalize(&self.data)
            .iter()
            .map(|x| (x * 255.0).round() as u8)
            .collect();
        let img = GrayImage::from_vec(self.width as u32, self.height as u32, data_as_u8)
            .expect("pixel buffer matches image dimensions");
        img.save(path)
            .with_context(|| format!("writing image {}", path.display()))
    }

    // Matrix entry (r, c) becomes pixel (r, c).
    pub fn from_matrix(matrix: &DMatrix<f64>) -> Image {
        let height = matrix.nrows();
        let width = matrix.ncols();
        let mut data = Vec::with_capacity(width * height);
        for r in 0..height {
            for c in 0..width {
                data.push(matrix[(r, c)]);
            }
        }
        Image { width, height, data }
    }
}

// Min-max normalisation into [0,1]. A flat image has no range to map
// and comes out all ones.
fn normalize(data: &[f64]) -> Vec<f64> {
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 {
        vec![1.0; data.len()]
    } else {
        data.iter().map(|x| (x - min) / range).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spans_unit_interval() {
        let normalized = normalize(&[1.0, 2.0, 5.0]);
        assert_eq!(normalized, vec![0.0, 0.25, 1.0]);
    }

    #[test]
    fn test_normalize_flat_image_is_white() {
        assert_eq!(normalize(&[0.7; 4]), vec![1.0; 4]);
    }

    #[test]
    fn test_from_matrix_is_row_major() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let image = Image::from_matrix(&m);
        assert_eq!(image.width, 3);
        assert_eq!(image.height, 2);
        assert_eq!(image.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
