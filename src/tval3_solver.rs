//
// Image reconstruction via TVAL3
//
// Reconstructs an L x L image u from measurements b = A u by minimising
// total variation subject to the measurement constraint. The TV term is
// split out into an auxiliary per-pixel gradient variable w, and the
// constraints w = Du and Au = b are enforced with an augmented
// Lagrangian. Each outer iteration alternates a closed-form shrinkage
// update of w with a one-step Barzilai-Borwein descent on u, then
// performs the method-of-multipliers ascent on the duals and grows the
// penalties geometrically.
//
// The w update has an exact solution, so the expensive part is the u
// sub-problem. Rather than solving it to completion, we take a single
// BB-scaled steepest-descent step per pass, backtracked against a
// non-monotone reference value. This is the scheme of Li's TVAL3.
//

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector2};
use thiserror::Error;

use crate::gradient::{gradient_all, gradient_transpose, side_length, unrasterize};

// Backtracking always terminates: after this many halvings the step is
// ~1e-12 of the BB step and is accepted as-is.
const MAX_BACKTRACKS: usize = 40;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("shape mismatch: {0}")]
    InvalidShape(String),
    #[error("pixel index {pixel} out of range for a {pixels}-pixel image")]
    InvalidIndex { pixel: usize, pixels: usize },
    #[error("non-finite value in {0}")]
    NumericalFailure(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Converged,
    /// The outer iteration cap was reached; the returned image is the
    /// final iterate, not a converged solution.
    DidNotConverge,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverParams {
    /// Initial penalty on the measurement constraint Au = b.
    pub mu0: f64,
    /// Initial penalty on the splitting constraint w = Du.
    pub beta0: f64,
    /// Geometric growth factor for both penalties per outer iteration.
    pub penalty_growth: f64,
    pub inner_tol: f64,
    pub outer_tol: f64,
    pub max_outer_iters: usize,
    pub max_inner_iters: usize,
    /// Backtracking shrink factor for the Armijo line search.
    pub rho: f64,
    /// Sufficient-decrease coefficient for the Armijo line search.
    pub delta: f64,
    /// Decay of the non-monotone reference value.
    pub eta: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            mu0: 3.0,
            beta0: std::f64::consts::SQRT_2,
            penalty_growth: 1.05,
            inner_tol: 1e-2,
            outer_tol: 1e-2,
            max_outer_iters: 100,
            max_inner_iters: 100,
            rho: 0.5,
            delta: 0.5,
            eta: 0.5,
        }
    }
}

pub struct Reconstruction {
    /// The recovered image, L x L.
    pub image: DMatrix<f64>,
    pub status: Status,
}

// Reconstruct an image from measurements b under the forward operator
// A, starting from a zero image.
pub fn reconstruct(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    side: usize,
    params: SolverParams,
) -> Result<Reconstruction, SolverError> {
    reconstruct_from(a, b, side, DVector::zeros(side * side), params)
}

// As reconstruct, but warm-started from a caller-supplied iterate. The
// multipliers and penalties still start fresh.
pub fn reconstruct_from(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    side: usize,
    u0: DVector<f64>,
    params: SolverParams,
) -> Result<Reconstruction, SolverError> {
    if side == 0 {
        return Err(SolverError::InvalidShape("image side must be positive".into()));
    }
    if side_length(a.ncols())? != side {
        return Err(SolverError::InvalidShape(format!(
            "operator has {} columns but a {}x{} image has {} pixels",
            a.ncols(),
            side,
            side,
            side * side
        )));
    }
    if b.len() != a.nrows() {
        return Err(SolverError::InvalidShape(format!(
            "operator has {} rows but {} measurements were supplied",
            a.nrows(),
            b.len()
        )));
    }
    let pixels = side * side;
    if u0.len() != pixels {
        return Err(SolverError::InvalidShape(format!(
            "starting iterate has {} entries, expected {}",
            u0.len(),
            pixels
        )));
    }

    let solver = Tval3 { a, at: a.transpose(), b, side, params };

    let mut u = u0;
    let mut w = DMatrix::zeros(pixels, 2);
    let mut nu = DMatrix::zeros(pixels, 2);
    let mut lambda = DVector::zeros(b.len());
    let mut beta = params.beta0;
    let mut mu = params.mu0;
    let mut status = Status::DidNotConverge;

    for outer in 0..params.max_outer_iters {
        let u_old = u.clone();
        solver.alternating_minimize(&mut u, &mut w, &nu, &lambda, beta, mu)?;

        // Multiplier ascent at the current penalties, then geometric
        // growth. mu is re-derived from the grown beta.
        let split_residual = gradient_all(&u, side) - &w;
        let data_residual = a * &u - b;
        nu -= &split_residual * beta;
        lambda -= &data_residual * mu;
        beta *= params.penalty_growth;
        mu = params.penalty_growth * beta;

        ensure_finite("u", u.iter())?;
        ensure_finite("w", w.iter())?;
        ensure_finite("nu", nu.iter())?;
        ensure_finite("lambda", lambda.iter())?;

        let change = (&u - &u_old).norm();
        debug!(
            "outer {}: |du| = {:.3e}, |Au - b| = {:.3e}, |Du - w| = {:.3e}, beta = {:.3}",
            outer,
            change,
            data_residual.norm(),
            split_residual.norm(),
            beta
        );
        if change <= params.outer_tol {
            status = Status::Converged;
            break;
        }
    }

    if status == Status::DidNotConverge {
        warn!(
            "reconstruction stopped at the outer iteration cap ({})",
            params.max_outer_iters
        );
    }

    Ok(Reconstruction { image: unrasterize(&u, side, side), status })
}

fn ensure_finite<'a>(
    what: &'static str,
    mut values: impl Iterator<Item = &'a f64>,
) -> Result<(), SolverError> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolverError::NumericalFailure(what))
    }
}

// Isotropic shrinkage: the closed-form minimiser of
// |w| + (beta/2) |g - w|^2 over a single pixel's gradient pair.
fn shrink(g: Vector2<f64>, beta: f64) -> Vector2<f64> {
    let norm = g.norm();
    if norm == 0.0 {
        return Vector2::zeros();
    }
    g * ((norm - 1.0 / beta).max(0.0) / norm)
}

// Running convex combination of past objective values. The Armijo test
// compares against this instead of the latest value, which lets the BB
// step survive occasional increases.
struct NonmonotoneRef {
    eta: f64,
    weight: f64,
    value: f64,
}

impl NonmonotoneRef {
    fn new(eta: f64, initial: f64) -> NonmonotoneRef {
        NonmonotoneRef { eta, weight: 1.0, value: initial }
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn update(&mut self, q: f64) {
        let next_weight = self.eta * self.weight + 1.0;
        self.value = (self.eta * self.weight * self.value + q) / next_weight;
        self.weight = next_weight;
    }
}

// The solve for one (A, b) pair. Holds the transpose of A so the
// gradient evaluations don't recompute it.
struct Tval3<'a> {
    a: &'a DMatrix<f64>,
    at: DMatrix<f64>,
    b: &'a DVector<f64>,
    side: usize,
    params: SolverParams,
}

impl Tval3<'_> {
    // The full augmented Lagrangian. Only used to seed the non-monotone
    // reference; the minimisation itself works on the quadratic model.
    fn lagrangian(
        &self,
        u: &DVector<f64>,
        w: &DMatrix<f64>,
        nu: &DMatrix<f64>,
        lambda: &DVector<f64>,
        beta: f64,
        mu: f64,
    ) -> f64 {
        let tv: f64 = w.row_iter().map(|wi| wi.norm()).sum();
        tv + self.quadratic(u, w, nu, lambda, beta, mu)
    }

    // The u-dependent part of the augmented Lagrangian, for fixed w and
    // multipliers.
    fn quadratic(
        &self,
        u: &DVector<f64>,
        w: &DMatrix<f64>,
        nu: &DMatrix<f64>,
        lambda: &DVector<f64>,
        beta: f64,
        mu: f64,
    ) -> f64 {
        let du = gradient_all(u, self.side);
        let mut total = 0.0;
        for i in 0..u.len() {
            let diff = du.row(i) - w.row(i);
            total += -nu.row(i).dot(&diff) + 0.5 * beta * diff.norm_squared();
        }
        let residual = self.a * u - self.b;
        total - lambda.dot(&residual) + 0.5 * mu * residual.norm_squared()
    }

    // Gradient of the quadratic model:
    //   beta D^T (Du - w) - D^T nu + mu A^T (Au - b) - A^T lambda
    fn quadratic_gradient(
        &self,
        u: &DVector<f64>,
        w: &DMatrix<f64>,
        nu: &DMatrix<f64>,
        lambda: &DVector<f64>,
        beta: f64,
        mu: f64,
    ) -> DVector<f64> {
        let field = (gradient_all(u, self.side) - w) * beta - nu;
        let residual = self.a * u - self.b;
        gradient_transpose(&field, self.side) + &self.at * (residual * mu - lambda)
    }

    // Alternate the w shrinkage with single BB steps on u until u stops
    // moving. Updates u and w in place; the multipliers are read-only
    // here.
    fn alternating_minimize(
        &self,
        u: &mut DVector<f64>,
        w: &mut DMatrix<f64>,
        nu: &DMatrix<f64>,
        lambda: &DVector<f64>,
        beta: f64,
        mu: f64,
    ) -> Result<(), SolverError> {
        let p = &self.params;
        let mut reference =
            NonmonotoneRef::new(p.eta, self.lagrangian(u, w, nu, lambda, beta, mu));
        let mut previous: Option<(DVector<f64>, DVector<f64>)> = None;

        for _ in 0..p.max_inner_iters {
            // w sub-problem: per-pixel shrinkage against the current u.
            let du = gradient_all(u, self.side);
            for i in 0..u.len() {
                let target = Vector2::new(
                    du[(i, 0)] - nu[(i, 0)] / beta,
                    du[(i, 1)] - nu[(i, 1)] / beta,
                );
                let wi = shrink(target, beta);
                w[(i, 0)] = wi.x;
                w[(i, 1)] = wi.y;
            }

            // u sub-problem: descend along the model gradient with a
            // BB-scaled step, backtracking until sufficient decrease
            // against the reference value.
            let g = self.quadratic_gradient(u, w, nu, lambda, beta, mu);
            let g_norm_sq = g.dot(&g);
            let mut alpha = match &previous {
                Some((u_prev, g_prev)) => {
                    let s = &*u - u_prev;
                    let y = &g - g_prev;
                    let step = s.dot(&y) / y.dot(&y);
                    if step.is_finite() && step > 0.0 {
                        step
                    } else {
                        1.0
                    }
                }
                None => 1.0,
            };
            let mut q_trial = f64::INFINITY;
            for _ in 0..MAX_BACKTRACKS {
                alpha *= p.rho;
                q_trial = self.quadratic(&(&*u - &g * alpha), w, nu, lambda, beta, mu);
                if q_trial <= reference.value() - p.delta * alpha * g_norm_sq {
                    break;
                }
            }
            if !alpha.is_finite() {
                return Err(SolverError::NumericalFailure("step length"));
            }

            let u_next = &*u - &g * alpha;
            reference.update(q_trial);
            previous = Some((std::mem::replace(u, u_next), g));

            // u moved by alpha * |g|; stop once that is negligible.
            if alpha * g_norm_sq.sqrt() <= p.inner_tol {
                break;
            }
        }
        Ok(())
    }
}
