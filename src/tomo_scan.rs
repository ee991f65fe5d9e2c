//
// Sinogram handling
//
// A sinogram is the stack of 1-D projections of the specimen, one
// column per tilt angle with one detector bin per image row. Code here
// loads sinograms from grayscale images, reads the accompanying
// tilt-angle series, and builds the forward projection operator the
// solver inverts.
//

use anyhow::{ensure, Context, Result};
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rand_pcg::Pcg64;
use std::path::Path;

use crate::tomo_image::Image;

// Only real difference from Image is that the axes are labelled
// "detector bins" and "angles", and the raster order is the solver's
// column-major convention rather than the image's row-major one.
#[derive(Clone, Debug)]
pub struct Sinogram {
    /// Detector bins per projection; equals the recovered image side.
    pub side: usize,
    pub angles: usize,
    /// Column-major, side x angles.
    pub data: Vec<f64>,
}

impl Sinogram {
    // Image rows are detector bins, image columns are tilt angles.
    pub fn from_image(image: &Image) -> Sinogram {
        let side = image.height;
        let angles = image.width;
        let mut data = Vec::with_capacity(side * angles);
        for c in 0..angles {
            for r in 0..side {
                data.push(image.data[r * image.width + c]);
            }
        }
        Sinogram { side, angles, data }
    }

    pub fn load(path: &Path) -> Result<Sinogram> {
        Ok(Sinogram::from_image(&Image::load(path)?))
    }

    // The measurement vector b, length side * angles.
    pub fn measurements(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.data)
    }
}

////////////////////////////////////////////////////////////////////////
// Tilt angles
//

pub fn parse_tilt_angles(text: &str) -> Result<Vec<f64>> {
    let mut angles = Vec::new();
    for token in text.split_whitespace() {
        let angle: f64 = token
            .parse()
            .with_context(|| format!("bad tilt angle {:?}", token))?;
        ensure!(angle.is_finite(), "tilt angle {} is not finite", angle);
        angles.push(angle);
    }
    ensure!(!angles.is_empty(), "no tilt angles found");

    // Acquisition files ending in a newline double up the final entry
    // in naive readers. A tilt series has no repeated angles, so a
    // duplicated last value is that artefact and gets dropped.
    if angles.len() >= 2 && angles[angles.len() - 1] == angles[angles.len() - 2] {
        angles.pop();
    }

    Ok(angles)
}

// Read a whitespace-separated series of tilt angles, in radians.
pub fn read_tilt_angles(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading tilt angles from {}", path.display()))?;
    parse_tilt_angles(&text)
}

////////////////////////////////////////////////////////////////////////
// Projection operator
//

// The forward operator mapping a rasterized side x side image to its
// measurements under the given tilt series.
//
// This is a stand-in: an i.i.d. standard normal matrix of the right
// shape, seeded for reproducibility, which uses only the number of
// angles. The solver depends only on receiving a finite M x N operator,
// so a real tilt-geometry projector can replace this without touching
// anything downstream.
pub fn projection_matrix(tilt_angles: &[f64], side: usize, seed: u64) -> DMatrix<f64> {
    let mut rng = Pcg64::seed_from_u64(seed);
    DMatrix::from_fn(side * tilt_angles.len(), side * side, |_, _| {
        rng.sample(StandardNormal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tilt_angles() {
        let angles = parse_tilt_angles("0.0 0.1\n0.2\n").unwrap();
        assert_eq!(angles, vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_parse_drops_trailing_duplicate() {
        let angles = parse_tilt_angles("0.0\n0.1\n0.2\n0.2").unwrap();
        assert_eq!(angles, vec![0.0, 0.1, 0.2]);
        // An interior repeat is not the newline artefact.
        let angles = parse_tilt_angles("0.1 0.1 0.2").unwrap();
        assert_eq!(angles, vec![0.1, 0.1, 0.2]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_tilt_angles("").is_err());
        assert!(parse_tilt_angles("0.1 sideways").is_err());
        assert!(parse_tilt_angles("0.1 inf").is_err());
    }

    #[test]
    fn test_sinogram_raster_is_column_major() {
        // A 3-bin, 2-angle sinogram stored as an image: row-major
        // (1, 4, 2, 5, 3, 6) becomes columns (1, 2, 3) and (4, 5, 6).
        let image = Image {
            width: 2,
            height: 3,
            data: vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0],
        };
        let sinogram = Sinogram::from_image(&image);
        assert_eq!(sinogram.side, 3);
        assert_eq!(sinogram.angles, 2);
        assert_eq!(sinogram.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(sinogram.measurements().as_slice(), &sinogram.data[..]);
    }

    #[test]
    fn test_projection_matrix_shape_and_determinism() {
        let tilt = [0.0, 0.3, 0.6];
        let a = projection_matrix(&tilt, 4, 42);
        assert_eq!((a.nrows(), a.ncols()), (12, 16));
        assert!(a.iter().all(|x| x.is_finite()));
        assert_eq!(a, projection_matrix(&tilt, 4, 42));
        assert_ne!(a, projection_matrix(&tilt, 4, 43));
    }
}
