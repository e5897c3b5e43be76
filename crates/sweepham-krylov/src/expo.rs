//! Krylov approximation of the matrix exponential action `exp(beta*A)*v`.
//!
//! Lanczos tridiagonalization for symmetric operators, full Arnoldi
//! otherwise. The small-subspace exponential is evaluated densely and the
//! subspace grows until the last-component estimate drops below tolerance. A
//! constant shift commutes with the operator and is applied as the scalar
//! factor `exp(beta*shift)`.
//!
//! A single Krylov space only resolves `exp` accurately while
//! `|beta| * ||A||` stays moderate. When the caller supplies an operator
//! norm estimate (`anorm`, typically the norm of the diagonal), `beta` is
//! split into substeps with `|step| * anorm <= 1` and the propagation is
//! chained through one Krylov solve per substep.

use crate::error::{Result, SolverError};
use crate::linalg;

/// Tuning knobs for [`expo_apply`].
#[derive(Debug, Clone)]
pub struct ExpoOptions {
    /// Constant added to the operator before exponentiation.
    pub shift: f64,
    /// The operator is symmetric; enables the short Lanczos recurrence.
    pub symmetric: bool,
    /// Largest Krylov subspace dimension.
    pub max_krylov: usize,
    /// Norm estimate of the shifted operator; `> 0` bounds the substep size
    /// so that `|step| * anorm <= 1`, `0` propagates in one step.
    pub anorm: f64,
    /// Estimated truncation error below which the expansion stops.
    pub conv_threshold: f64,
    pub verbose: bool,
}

impl Default for ExpoOptions {
    fn default() -> Self {
        Self {
            shift: 0.0,
            symmetric: true,
            max_krylov: 30,
            anorm: 0.0,
            conv_threshold: 1e-12,
            verbose: false,
        }
    }
}

impl ExpoOptions {
    pub fn with_shift(mut self, shift: f64) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_symmetric(mut self, symmetric: bool) -> Self {
        self.symmetric = symmetric;
        self
    }

    pub fn with_max_krylov(mut self, max_krylov: usize) -> Self {
        self.max_krylov = max_krylov;
        self
    }

    pub fn with_anorm(mut self, anorm: f64) -> Self {
        self.anorm = anorm;
        self
    }

    pub fn with_conv_threshold(mut self, conv_threshold: f64) -> Self {
        self.conv_threshold = conv_threshold;
        self
    }
}

/// Outcome of an [`expo_apply`] run.
#[derive(Debug, Clone)]
pub struct ExpoResult {
    /// Norm of the propagated vector.
    pub norm: f64,
    /// Krylov subspace dimension actually used.
    pub krylov_size: usize,
    /// Operator applications performed.
    pub n_ops: usize,
    pub converged: bool,
}

/// Overwrite `v` with `exp(beta * (A + shift)) v`.
///
/// `op` accumulates `A*x` into its (pre-zeroed) output slice. With a
/// positive `anorm` the step is subdivided; the reported `n_ops` is the
/// total over all substeps and `converged` requires every substep to
/// converge.
pub fn expo_apply<F>(
    mut op: F,
    beta: f64,
    v: &mut [f64],
    options: &ExpoOptions,
) -> Result<ExpoResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n_sub = if options.anorm > 0.0 && beta != 0.0 {
        ((beta.abs() * options.anorm).ceil() as usize).max(1)
    } else {
        1
    };
    if n_sub == 1 {
        return expo_step(&mut op, beta, v, options);
    }
    let step = beta / n_sub as f64;
    if options.verbose {
        eprintln!("expo substeps {} step {:9.2e}", n_sub, step);
    }
    let mut total = ExpoResult {
        norm: linalg::norm(v),
        krylov_size: 0,
        n_ops: 0,
        converged: true,
    };
    for _ in 0..n_sub {
        let res = expo_step(&mut op, step, v, options)?;
        total.norm = res.norm;
        total.krylov_size = total.krylov_size.max(res.krylov_size);
        total.n_ops += res.n_ops;
        total.converged &= res.converged;
    }
    Ok(total)
}

fn expo_step<F>(mut op: F, beta: f64, v: &mut [f64], options: &ExpoOptions) -> Result<ExpoResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = v.len();
    if n == 0 {
        return Err(SolverError::Breakdown {
            solver: "expo",
            reason: "empty vector".into(),
        });
    }
    let scalar = (beta * options.shift).exp();
    let norm_v = linalg::norm(v);
    if norm_v == 0.0 || beta == 0.0 {
        linalg::iscale(v, scalar);
        return Ok(ExpoResult {
            norm: norm_v * scalar,
            krylov_size: 0,
            n_ops: 0,
            converged: true,
        });
    }

    let m_max = options.max_krylov.min(n);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m_max + 1);
    let mut first = v.to_vec();
    linalg::iscale(&mut first, 1.0 / norm_v);
    basis.push(first);

    // column-major-free: h[j] is column j with j+2 entries
    let mut hcols: Vec<Vec<f64>> = Vec::new();
    let mut n_ops = 0usize;
    let mut converged = false;
    let mut m = 0usize;

    for j in 0..m_max {
        let mut w = vec![0.0; n];
        op(&basis[j], &mut w);
        n_ops += 1;
        let mut hj = vec![0.0; j + 2];
        if options.symmetric {
            if j > 0 {
                let h = hcols[j - 1][j];
                linalg::iadd(&mut w, &basis[j - 1], -h);
                hj[j - 1] = h;
            }
            let alpha = linalg::dot(&basis[j], &w);
            linalg::iadd(&mut w, &basis[j], -alpha);
            hj[j] = alpha;
        } else {
            for (i, u) in basis.iter().enumerate() {
                let h = linalg::dot(u, &w);
                linalg::iadd(&mut w, u, -h);
                hj[i] = h;
            }
        }
        let wn = linalg::norm(&w);
        hj[j + 1] = wn;
        hcols.push(hj);
        m = j + 1;

        // dense m x m projection, scaled by beta
        let mut t = vec![0.0; m * m];
        for (col, hc) in hcols.iter().enumerate() {
            for (row, &h) in hc.iter().enumerate().take(m) {
                t[row * m + col] = h * beta;
            }
        }
        let e = linalg::expm_small(&t, m);
        // first column of exp(beta*T) is the coefficient vector
        let err = if m > 1 {
            wn * beta.abs() * e[(m - 1) * m].abs()
        } else {
            wn * beta.abs()
        };
        if options.verbose {
            eprintln!("expo krylov {:3} err {:9.2e}", m, err);
        }
        let happy = wn < 1e-14;
        if err < options.conv_threshold || happy || m == m_max {
            converged = err < options.conv_threshold || happy;
            let mut out = vec![0.0; n];
            for (i, u) in basis.iter().enumerate().take(m) {
                linalg::iadd(&mut out, u, e[i * m] * norm_v * scalar);
            }
            v.copy_from_slice(&out);
            break;
        }

        let mut next = w;
        linalg::iscale(&mut next, 1.0 / wn);
        basis.push(next);
    }

    Ok(ExpoResult {
        norm: linalg::norm(v),
        krylov_size: m,
        n_ops,
        converged,
    })
}
