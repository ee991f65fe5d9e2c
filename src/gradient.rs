//
// Discrete 2-D gradient operator
//
// The solver treats an L x L image as a length N = L^2 vector in
// column-major raster order: pixel i = r + c * L, so the right-hand
// neighbour of a pixel sits at i + L and the neighbour below it at
// i + 1. The per-pixel gradient is the pair of forward differences
// (right, down), truncated to zero at the last column and last row.
//
// The transpose action is applied by scattering each component back
// onto the pixel and its neighbour with opposite signs, directly from
// the index arithmetic. Building an explicit N x N difference matrix
// would be quadratic work per application for what is a linear-time
// operator.
//

use itertools::iproduct;
use nalgebra::{DMatrix, DVector, Vector2};

use crate::tval3_solver::SolverError;

// Recover the image side length from a pixel count, checking that the
// count is a perfect square.
pub fn side_length(pixels: usize) -> Result<usize, SolverError> {
    let side = (pixels as f64).sqrt().round() as usize;
    if side * side != pixels {
        return Err(SolverError::InvalidShape(format!(
            "pixel count {} is not a perfect square",
            pixels
        )));
    }
    Ok(side)
}

// Forward-difference gradient at a single pixel.
pub fn gradient_at(
    u: &DVector<f64>,
    side: usize,
    pixel: usize,
) -> Result<Vector2<f64>, SolverError> {
    let pixels = side * side;
    if pixel >= pixels {
        return Err(SolverError::InvalidIndex { pixel, pixels });
    }
    let r = pixel % side;
    let c = pixel / side;
    let right = if c + 1 < side {
        u[pixel] - u[pixel + side]
    } else {
        0.0
    };
    let down = if r + 1 < side {
        u[pixel] - u[pixel + 1]
    } else {
        0.0
    };
    Ok(Vector2::new(right, down))
}

// The full gradient field, one (right, down) row per pixel.
pub fn gradient_all(u: &DVector<f64>, side: usize) -> DMatrix<f64> {
    let pixels = side * side;
    assert_eq!(u.len(), pixels);
    let mut field = DMatrix::zeros(pixels, 2);
    for (c, r) in iproduct!(0..side, 0..side) {
        let i = r + c * side;
        if c + 1 < side {
            field[(i, 0)] = u[i] - u[i + side];
        }
        if r + 1 < side {
            field[(i, 1)] = u[i] - u[i + 1];
        }
    }
    field
}

// Transpose of the gradient, applied to an N x 2 field. Each component
// contributes positively to its own pixel and negatively to the
// neighbour it was differenced against; truncated components at the
// boundary contribute nothing, matching gradient_all.
pub fn gradient_transpose(field: &DMatrix<f64>, side: usize) -> DVector<f64> {
    let pixels = side * side;
    assert_eq!(field.nrows(), pixels);
    assert_eq!(field.ncols(), 2);
    let mut out = DVector::zeros(pixels);
    for (c, r) in iproduct!(0..side, 0..side) {
        let i = r + c * side;
        if c + 1 < side {
            out[i] += field[(i, 0)];
            out[i + side] -= field[(i, 0)];
        }
        if r + 1 < side {
            out[i] += field[(i, 1)];
            out[i + 1] -= field[(i, 1)];
        }
    }
    out
}

////////////////////////////////////////////////////////////////////////
// Rasterisation
//
// nalgebra stores dense matrices column-major, which is exactly the
// raster convention above, so these are thin reshapes.
//

pub fn rasterize(matrix: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_column_slice(matrix.as_slice())
}

pub fn unrasterize(vector: &DVector<f64>, rows: usize, cols: usize) -> DMatrix<f64> {
    assert_eq!(vector.len(), rows * cols);
    DMatrix::from_column_slice(rows, cols, vector.as_slice())
}
