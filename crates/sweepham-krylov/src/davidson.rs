//! Davidson eigensolver for symmetric operators.
//!
//! Finds the lowest eigenpairs by Rayleigh-Ritz extraction over a growing
//! preconditioned subspace. An interior variant targets the smallest
//! eigenvalues strictly above a given shift, which is what a sweep needs when
//! projecting onto an excitation window.

use crate::error::{Result, SolverError};
use crate::linalg;

/// Which eigenvalues the solver extracts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DavidsonMode {
    /// The lowest eigenvalues of the spectrum.
    Lowest,
    /// The smallest eigenvalues strictly greater than `shift`.
    HarmonicGreaterThan { shift: f64 },
}

/// Tuning knobs for [`davidson`].
#[derive(Debug, Clone)]
pub struct DavidsonOptions {
    pub mode: DavidsonMode,
    /// Hard iteration cap; exceeding it is an error.
    pub max_iter: usize,
    /// Soft iteration cap; `0` disables it. Exceeding it returns the best
    /// iterate with `converged = false`.
    pub soft_max_iter: usize,
    /// Residual norm below which an eigenpair counts as converged.
    pub conv_threshold: f64,
    /// Subspace size that triggers a restart onto the current Ritz vectors.
    pub max_subspace: usize,
    /// Apply the diagonal preconditioner when expanding the subspace.
    pub precondition: bool,
    pub verbose: bool,
}

impl Default for DavidsonOptions {
    fn default() -> Self {
        Self {
            mode: DavidsonMode::Lowest,
            max_iter: 500,
            soft_max_iter: 0,
            conv_threshold: 1e-9,
            max_subspace: 30,
            precondition: true,
            verbose: false,
        }
    }
}

impl DavidsonOptions {
    pub fn with_mode(mut self, mode: DavidsonMode) -> Self {
        self.mode = mode;
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

    pub fn with_max_subspace(mut self, max_subspace: usize) -> Self {
        self.max_subspace = max_subspace;
        self
    }

    pub fn with_precondition(mut self, precondition: bool) -> Self {
        self.precondition = precondition;
        self
    }
}

/// Outcome of a [`davidson`] run.
#[derive(Debug, Clone)]
pub struct DavidsonResult {
    /// Extracted eigenvalues, one per requested vector.
    pub eigenvalues: Vec<f64>,
    /// Outer iterations performed.
    pub iterations: usize,
    /// Operator applications performed.
    pub n_ops: usize,
    pub converged: bool,
    /// Largest residual norm over the requested eigenpairs.
    pub residual_norm: f64,
}

/// Solve for the requested eigenpairs of a symmetric operator.
///
/// `op` accumulates `A*x` into its (pre-zeroed) output slice. `diag` is the
/// operator diagonal used for preconditioning. `vectors` holds the initial
/// guesses on entry and the eigenvectors on exit; its length sets the number
/// of eigenpairs.
pub fn davidson<F>(
    mut op: F,
    diag: &[f64],
    vectors: &mut [Vec<f64>],
    options: &DavidsonOptions,
) -> Result<DavidsonResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = diag.len();
    let k = vectors.len();
    if k == 0 || n == 0 {
        return Err(SolverError::Breakdown {
            solver: "davidson",
            reason: "empty problem".into(),
        });
    }
    for v in vectors.iter() {
        if v.len() != n {
            return Err(SolverError::DimensionMismatch {
                solver: "davidson",
                expected: n,
                actual: v.len(),
            });
        }
    }

    let mut basis: Vec<Vec<f64>> = Vec::new();
    for v in vectors.iter() {
        let mut w = v.clone();
        let r = linalg::orthogonalize(&mut w, &basis);
        if r < 1e-14 {
            return Err(SolverError::Breakdown {
                solver: "davidson",
                reason: "linearly dependent initial guesses".into(),
            });
        }
        linalg::iscale(&mut w, 1.0 / r);
        basis.push(w);
    }
    let mut sigmas: Vec<Vec<f64>> = Vec::new();
    let mut n_ops = 0usize;

    let mut best_vals = vec![0.0; k];

    for iter in 0..options.max_iter {
        while sigmas.len() < basis.len() {
            let mut s = vec![0.0; n];
            op(&basis[sigmas.len()], &mut s);
            n_ops += 1;
            sigmas.push(s);
        }
        let m = basis.len();

        let mut h = vec![0.0; m * m];
        for i in 0..m {
            for j in 0..m {
                h[i * m + j] = linalg::dot(&basis[i], &sigmas[j]);
            }
        }
        let (vals, vecs) = linalg::jacobi_eigh(&mut h, m);

        let selected = select_indices(&vals, k, options.mode);

        // Ritz vectors and their images under the operator
        let mut ritz: Vec<Vec<f64>> = Vec::with_capacity(k);
        let mut ritz_sigma: Vec<Vec<f64>> = Vec::with_capacity(k);
        for &j in &selected {
            let mut x = vec![0.0; n];
            let mut sx = vec![0.0; n];
            for i in 0..m {
                let c = vecs[i * m + j];
                linalg::iadd(&mut x, &basis[i], c);
                linalg::iadd(&mut sx, &sigmas[i], c);
            }
            ritz.push(x);
            ritz_sigma.push(sx);
        }

        let mut max_resid = 0.0f64;
        let mut residuals: Vec<Vec<f64>> = Vec::with_capacity(k);
        for j in 0..k {
            let mut r = ritz_sigma[j].clone();
            linalg::iadd(&mut r, &ritz[j], -vals[selected[j]]);
            max_resid = max_resid.max(linalg::norm(&r));
            residuals.push(r);
        }
        for (j, &sj) in selected.iter().enumerate() {
            best_vals[j] = vals[sj];
        }
        if options.verbose {
            eprintln!(
                "davidson iter {:4} subspace {:3} eval {:20.12} resid {:9.2e}",
                iter, m, best_vals[0], max_resid
            );
        }

        let soft_hit = options.soft_max_iter != 0 && iter + 1 >= options.soft_max_iter;
        if max_resid < options.conv_threshold || soft_hit {
            for (v, x) in vectors.iter_mut().zip(ritz.into_iter()) {
                *v = x;
            }
            return Ok(DavidsonResult {
                eigenvalues: best_vals,
                iterations: iter + 1,
                n_ops,
                converged: max_resid < options.conv_threshold,
                residual_norm: max_resid,
            });
        }

        if m + k > options.max_subspace {
            // restart onto the current Ritz vectors
            basis = ritz.clone();
            sigmas = ritz_sigma.clone();
        }

        let mut expanded = false;
        for (j, r) in residuals.iter().enumerate() {
            if linalg::norm(r) < options.conv_threshold {
                continue;
            }
            let mut t = r.clone();
            if options.precondition {
                let lambda = best_vals[j];
                for (ti, &di) in t.iter_mut().zip(diag.iter()) {
                    let denom = lambda - di;
                    if denom.abs() > 1e-12 {
                        *ti /= denom;
                    }
                }
            }
            let rn = linalg::orthogonalize(&mut t, &basis);
            if rn > 1e-12 {
                linalg::iscale(&mut t, 1.0 / rn);
                basis.push(t);
                expanded = true;
                break;
            }
        }
        if !expanded {
            return Err(SolverError::Breakdown {
                solver: "davidson",
                reason: "subspace expansion produced no new direction".into(),
            });
        }
    }

    Err(SolverError::MaxIterationExceeded {
        solver: "davidson",
        max_iter: options.max_iter,
    })
}

/// Pick `k` Ritz indices according to the extraction mode. `vals` is sorted
/// ascending.
fn select_indices(vals: &[f64], k: usize, mode: DavidsonMode) -> Vec<usize> {
    match mode {
        DavidsonMode::Lowest => (0..k.min(vals.len())).collect(),
        DavidsonMode::HarmonicGreaterThan { shift } => {
            let mut above: Vec<usize> =
                (0..vals.len()).filter(|&i| vals[i] > shift).collect();
            if above.len() < k {
                // pad from the values just below the shift
                let mut below: Vec<usize> =
                    (0..vals.len()).filter(|&i| vals[i] <= shift).collect();
                below.reverse();
                above.extend(below.into_iter().take(k - above.len()));
                above.sort_unstable();
            }
            above.truncate(k);
            above
        }
    }
}
