//! Total-variation reconstruction of tomographic images.
//!
//! Recovers an L x L image from a sinogram by the TVAL3 method:
//! augmented-Lagrangian total-variation minimisation with variable
//! splitting, alternating closed-form shrinkage of the per-pixel
//! gradient with a non-monotone Barzilai-Borwein descent on the image.
//! The entry point is [`tval3_solver::reconstruct`].

pub mod gradient;
pub mod tomo_image;
pub mod tomo_scan;
pub mod tval3_solver;
