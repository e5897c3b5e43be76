//! GCROT(m,k) for complex non-Hermitian solves.
//!
//! Flexible GMRES(m) inner cycles combined with an outer recycling space of
//! up to `k` pairs `(c, u)` with `A u = c` and `C` orthonormal. Each new
//! cycle first removes the components of the residual already covered by the
//! recycled space, so information survives the inner restarts. This is the
//! workhorse for shifted resolvent solves where the operator is complex
//! symmetric but far from definite.

use num_complex::Complex64;

use crate::error::{Result, SolverError};
use crate::linalg;

/// Tuning knobs for [`gcrotmk`].
#[derive(Debug, Clone)]
pub struct GcrotOptions {
    /// Inner Arnoldi cycle length.
    pub m: usize,
    /// Number of recycled outer pairs kept between cycles.
    pub k: usize,
    /// Hard cap on outer cycles; exceeding it is an error.
    pub max_iter: usize,
    /// Soft cap on outer cycles; `0` disables it. Exceeding it returns the
    /// best iterate with `converged = false`.
    pub soft_max_iter: usize,
    /// Residual norm below which the solve counts as converged.
    pub conv_threshold: f64,
    pub verbose: bool,
}

impl Default for GcrotOptions {
    fn default() -> Self {
        Self {
            m: 20,
            k: 10,
            max_iter: 200,
            soft_max_iter: 0,
            conv_threshold: 1e-10,
            verbose: false,
        }
    }
}

impl GcrotOptions {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
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

/// Outcome of a [`gcrotmk`] solve.
#[derive(Debug, Clone)]
pub struct GcrotResult {
    /// The functional `<x, b>` (conjugated on `x`) at the final iterate.
    pub func: Complex64,
    /// Outer cycles performed.
    pub iterations: usize,
    /// Operator applications performed.
    pub n_ops: usize,
    pub converged: bool,
    pub residual_norm: f64,
}

/// Solve `A x = b` for a complex, possibly non-Hermitian operator.
///
/// `op` accumulates `A*v` into its (pre-zeroed) output slice. `diag`, when
/// given, is used as a diagonal right preconditioner. `x` holds the initial
/// guess on entry and the solution on exit.
pub fn gcrotmk<F>(
    mut op: F,
    diag: Option<&[Complex64]>,
    x: &mut [Complex64],
    b: &[Complex64],
    options: &GcrotOptions,
) -> Result<GcrotResult>
where
    F: FnMut(&[Complex64], &mut [Complex64]),
{
    let n = b.len();
    if x.len() != n {
        return Err(SolverError::DimensionMismatch {
            solver: "gcrotmk",
            expected: n,
            actual: x.len(),
        });
    }
    let m = options.m.max(1).min(n);

    // right preconditioning: iterate on t with x = M^{-1} t
    let minv = |v: &mut [Complex64]| {
        if let Some(d) = diag {
            for (vi, &di) in v.iter_mut().zip(d.iter()) {
                if di.norm() > 1e-12 {
                    *vi /= di;
                }
            }
        }
    };
    let mut n_ops = 0usize;
    let mut apply = |v: &[Complex64], y: &mut [Complex64], n_ops: &mut usize| {
        if diag.is_some() {
            let mut t = v.to_vec();
            minv(&mut t);
            op(&t, y);
        } else {
            op(v, y);
        }
        *n_ops += 1;
    };
    if let Some(d) = diag {
        for (xi, &di) in x.iter_mut().zip(d.iter()) {
            *xi *= di;
        }
    }

    let mut r = vec![Complex64::new(0.0, 0.0); n];
    apply(x, &mut r, &mut n_ops);
    for (ri, &bi) in r.iter_mut().zip(b.iter()) {
        *ri = bi - *ri;
    }

    // recycled pairs: cs orthonormal, A us[i] = cs[i]
    let mut cs: Vec<Vec<Complex64>> = Vec::new();
    let mut us: Vec<Vec<Complex64>> = Vec::new();

    let mut resid = linalg::cnorm(&r);
    for outer in 0..options.max_iter {
        let soft_hit = options.soft_max_iter != 0 && outer >= options.soft_max_iter;
        if resid < options.conv_threshold || soft_hit {
            minv(x);
            return Ok(GcrotResult {
                func: linalg::cdot(x, b),
                iterations: outer,
                n_ops,
                converged: resid < options.conv_threshold,
                residual_norm: resid,
            });
        }

        // project the residual onto the complement of the recycled space
        for (c, u) in cs.iter().zip(us.iter()) {
            let alpha = linalg::cdot(c, &r);
            linalg::ciadd(x, u, alpha);
            linalg::ciadd(&mut r, c, -alpha);
        }
        let beta = linalg::cnorm(&r);
        if beta < options.conv_threshold {
            resid = beta;
            continue;
        }

        // inner Arnoldi on (I - C C^*) A
        let mut vs: Vec<Vec<Complex64>> = Vec::with_capacity(m + 1);
        let mut v0 = r.clone();
        linalg::ciscale(&mut v0, Complex64::new(1.0 / beta, 0.0));
        vs.push(v0);
        // hess[j] holds column j (j+2 entries); bmat[j] the C-projection
        // coefficients of A v_j
        let mut hess: Vec<Vec<Complex64>> = Vec::new();
        let mut bmat: Vec<Vec<Complex64>> = Vec::new();
        let mut giv: Vec<(f64, Complex64)> = Vec::new();
        let mut g = vec![Complex64::new(0.0, 0.0); m + 1];
        g[0] = Complex64::new(beta, 0.0);
        let mut width = 0usize;

        for j in 0..m {
            let mut w = vec![Complex64::new(0.0, 0.0); n];
            apply(&vs[j], &mut w, &mut n_ops);
            let mut bj = Vec::with_capacity(cs.len());
            for c in &cs {
                let h = linalg::cdot(c, &w);
                linalg::ciadd(&mut w, c, -h);
                bj.push(h);
            }
            let mut hj = vec![Complex64::new(0.0, 0.0); j + 2];
            for _ in 0..2 {
                for (i, v) in vs.iter().enumerate() {
                    let h = linalg::cdot(v, &w);
                    linalg::ciadd(&mut w, v, -h);
                    hj[i] += h;
                }
            }
            let wn = linalg::cnorm(&w);
            hj[j + 1] = Complex64::new(wn, 0.0);

            // Givens QR of the Hessenberg column
            for (i, &(gc, gs)) in giv.iter().enumerate() {
                let a = hj[i];
                let bb = hj[i + 1];
                hj[i] = gc * a + gs * bb;
                hj[i + 1] = -gs.conj() * a + gc * bb;
            }
            let h1 = hj[j];
            let h2 = hj[j + 1];
            let t = (h1.norm_sqr() + h2.norm_sqr()).sqrt();
            let (gc, gs) = if t < 1e-300 {
                (1.0, Complex64::new(0.0, 0.0))
            } else if h1.norm() < 1e-300 {
                (0.0, Complex64::new(1.0, 0.0))
            } else {
                (h1.norm() / t, (h1 / h1.norm()) * h2.conj() / t)
            };
            hj[j] = gc * h1 + gs * h2;
            hj[j + 1] = Complex64::new(0.0, 0.0);
            let ga = g[j];
            g[j] = gc * ga;
            g[j + 1] = -gs.conj() * ga;
            giv.push((gc, gs));
            hess.push(hj);
            bmat.push(bj);
            width = j + 1;
            let inner_resid = g[j + 1].norm();

            let breakdown = wn < 1e-14;
            if !breakdown {
                let mut v = w;
                linalg::ciscale(&mut v, Complex64::new(1.0 / wn, 0.0));
                vs.push(v);
            }
            if inner_resid < options.conv_threshold || breakdown {
                break;
            }
        }

        // back substitution for the least squares coefficients
        let mut y = vec![Complex64::new(0.0, 0.0); width];
        for i in (0..width).rev() {
            let mut s = g[i];
            for l in (i + 1)..width {
                s -= hess[l][i] * y[l];
            }
            let piv = hess[i][i];
            if piv.norm() < 1e-300 {
                return Err(SolverError::Breakdown {
                    solver: "gcrotmk",
                    reason: "singular least squares system".into(),
                });
            }
            y[i] = s / piv;
        }

        // z = V y, its image A z = V_{m+1} (H y) + C (B y)
        let mut z = vec![Complex64::new(0.0, 0.0); n];
        for (j, &yj) in y.iter().enumerate() {
            linalg::ciadd(&mut z, &vs[j], yj);
        }
        // hy in the original (pre-rotation) Hessenberg frame is not stored;
        // recompute c_new = A z - C (B y) directly
        let mut c_new = vec![Complex64::new(0.0, 0.0); n];
        apply(&z, &mut c_new, &mut n_ops);
        let mut by = vec![Complex64::new(0.0, 0.0); cs.len()];
        for (j, bj) in bmat.iter().enumerate() {
            for (i, &bij) in bj.iter().enumerate() {
                by[i] += bij * y[j];
            }
        }
        for (c, &byi) in cs.iter().zip(by.iter()) {
            linalg::ciadd(&mut c_new, c, -byi);
        }
        let mut u_new = z;
        for (u, &byi) in us.iter().zip(by.iter()) {
            linalg::ciadd(&mut u_new, u, -byi);
        }
        let gamma = linalg::cnorm(&c_new);
        if gamma < 1e-300 {
            return Err(SolverError::Breakdown {
                solver: "gcrotmk",
                reason: "stagnated inner cycle".into(),
            });
        }
        let inv = Complex64::new(1.0 / gamma, 0.0);
        linalg::ciscale(&mut c_new, inv);
        linalg::ciscale(&mut u_new, inv);

        let alpha = linalg::cdot(&c_new, &r);
        linalg::ciadd(x, &u_new, alpha);
        linalg::ciadd(&mut r, &c_new, -alpha);
        resid = linalg::cnorm(&r);

        if options.verbose {
            eprintln!(
                "gcrotmk cycle {:4} inner {:3} resid {:9.2e}",
                outer + 1,
                width,
                resid
            );
        }

        cs.push(c_new);
        us.push(u_new);
        while cs.len() > options.k {
            cs.remove(0);
            us.remove(0);
        }
    }

    Err(SolverError::MaxIterationExceeded {
        solver: "gcrotmk",
        max_iter: options.max_iter,
    })
}
