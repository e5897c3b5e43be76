//! MINRES for symmetric indefinite solves.
//!
//! Lanczos tridiagonalization with a running Givens QR of the tridiagonal
//! factor. Unlike conjugate gradient this tolerates an indefinite operator,
//! which is the common case when a constant shift moves the spectrum across
//! zero.

use crate::error::{Result, SolverError};
use crate::linalg;

/// Tuning knobs for [`minres`].
#[derive(Debug, Clone)]
pub struct MinresOptions {
    /// Constant added to the operator: the solve targets `(A + shift) x = b`.
    pub shift: f64,
    /// Hard iteration cap; exceeding it is an error.
    pub max_iter: usize,
    /// Soft iteration cap; `0` disables it. Exceeding it returns the best
    /// iterate with `converged = false`.
    pub soft_max_iter: usize,
    /// Residual norm below which the solve counts as converged.
    pub conv_threshold: f64,
    pub verbose: bool,
}

impl Default for MinresOptions {
    fn default() -> Self {
        Self {
            shift: 0.0,
            max_iter: 5000,
            soft_max_iter: 0,
            conv_threshold: 1e-10,
            verbose: false,
        }
    }
}

impl MinresOptions {
    pub fn with_shift(mut self, shift: f64) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_soft_max_iter(mut self, soft_max_iter: usize) -> Self {
        self.soft_max_iter = soft_max_iter;
        self
    }

    pub fn with_conv_threshold(mut self, conv_threshold: f64) -> Self {
        self.conv_threshold = conv_threshold;
        self
    }
}

/// Outcome of a [`minres`] solve.
#[derive(Debug, Clone)]
pub struct MinresResult {
    /// The functional `<x, b>` at the final iterate.
    pub func: f64,
    pub iterations: usize,
    /// Operator applications performed.
    pub n_ops: usize,
    pub converged: bool,
    pub residual_norm: f64,
}

/// Solve `(A + shift) x = b` for a symmetric operator.
///
/// `op` accumulates `A*v` into its (pre-zeroed) output slice. `x` holds the
/// initial guess on entry and the solution on exit.
pub fn minres<F>(
    mut op: F,
    x: &mut [f64],
    b: &[f64],
    options: &MinresOptions,
) -> Result<MinresResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = b.len();
    if x.len() != n {
        return Err(SolverError::DimensionMismatch {
            solver: "minres",
            expected: n,
            actual: x.len(),
        });
    }
    let mut n_ops = 0usize;
    let mut apply = |v: &[f64], y: &mut [f64], n_ops: &mut usize| {
        op(v, y);
        *n_ops += 1;
        if options.shift != 0.0 {
            linalg::iadd(y, v, options.shift);
        }
    };

    let mut r = vec![0.0; n];
    apply(x, &mut r, &mut n_ops);
    for (ri, &bi) in r.iter_mut().zip(b.iter()) {
        *ri = bi - *ri;
    }
    let beta1 = linalg::norm(&r);
    if beta1 < options.conv_threshold {
        return Ok(MinresResult {
            func: linalg::dot(x, b),
            iterations: 0,
            n_ops,
            converged: true,
            residual_norm: beta1,
        });
    }

    let mut v = r;
    linalg::iscale(&mut v, 1.0 / beta1);
    let mut v_prev = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut d_prev = vec![0.0; n];

    let mut beta = beta1;
    let mut eta = beta1;
    let (mut gamma, mut gamma_prev) = (1.0f64, 1.0f64);
    let (mut sigma, mut sigma_prev) = (0.0f64, 0.0f64);

    for iter in 0..options.max_iter {
        let mut w = vec![0.0; n];
        apply(&v, &mut w, &mut n_ops);
        let alpha = linalg::dot(&v, &w);
        linalg::iadd(&mut w, &v, -alpha);
        linalg::iadd(&mut w, &v_prev, -beta);
        let beta_next = linalg::norm(&w);

        // apply the two previous rotations, then form the new one
        let delta = gamma * alpha - gamma_prev * sigma * beta;
        let rho1 = (delta * delta + beta_next * beta_next).sqrt();
        let rho2 = sigma * alpha + gamma_prev * gamma * beta;
        let rho3 = sigma_prev * beta;
        if rho1 < 1e-300 {
            return Err(SolverError::Breakdown {
                solver: "minres",
                reason: "vanishing QR pivot".into(),
            });
        }
        let gamma_next = delta / rho1;
        let sigma_next = beta_next / rho1;

        let mut d_new = v.clone();
        linalg::iadd(&mut d_new, &d_prev, -rho3);
        linalg::iadd(&mut d_new, &d, -rho2);
        linalg::iscale(&mut d_new, 1.0 / rho1);
        linalg::iadd(x, &d_new, gamma_next * eta);
        eta = -sigma_next * eta;
        let resid = eta.abs();

        if options.verbose {
            eprintln!("minres iter {:5} resid {:9.2e}", iter + 1, resid);
        }

        let soft_hit = options.soft_max_iter != 0 && iter + 1 >= options.soft_max_iter;
        let exhausted = beta_next < 1e-14;
        if resid < options.conv_threshold || soft_hit || exhausted {
            return Ok(MinresResult {
                func: linalg::dot(x, b),
                iterations: iter + 1,
                n_ops,
                converged: resid < options.conv_threshold || exhausted,
                residual_norm: resid,
            });
        }

        v_prev.copy_from_slice(&v);
        v = w;
        linalg::iscale(&mut v, 1.0 / beta_next);
        beta = beta_next;
        gamma_prev = gamma;
        gamma = gamma_next;
        sigma_prev = sigma;
        sigma = sigma_next;
        d_prev = std::mem::replace(&mut d, d_new);
    }

    Err(SolverError::MaxIterationExceeded {
        solver: "minres",
        max_iter: options.max_iter,
    })
}
