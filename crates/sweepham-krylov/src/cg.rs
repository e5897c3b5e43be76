//! Preconditioned conjugate gradient for symmetric positive-definite solves.

use crate::error::{Result, SolverError};
use crate::linalg;

/// Tuning knobs for [`conjugate_gradient`].
#[derive(Debug, Clone)]
pub struct CgOptions {
    /// Hard iteration cap; exceeding it is an error.
    pub max_iter: usize,
    /// Soft iteration cap; `0` disables it. Exceeding it returns the best
    /// iterate with `converged = false`.
    pub soft_max_iter: usize,
    /// Residual norm below which the solve counts as converged.
    pub conv_threshold: f64,
    pub verbose: bool,
}

impl Default for CgOptions {
    fn default() -> Self {
        Self {
            max_iter: 5000,
            soft_max_iter: 0,
            conv_threshold: 1e-10,
            verbose: false,
        }
    }
}

impl CgOptions {
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

/// Outcome of a conjugate gradient solve.
#[derive(Debug, Clone)]
pub struct CgResult {
    /// The functional `<x, b>` at the final iterate.
    pub func: f64,
    pub iterations: usize,
    /// Operator applications performed.
    pub n_ops: usize,
    pub converged: bool,
    pub residual_norm: f64,
}

/// Solve `A x = b` for a symmetric positive-definite operator.
///
/// `op` accumulates `A*v` into its (pre-zeroed) output slice. `diag`, when
/// given, is the operator diagonal used as a Jacobi preconditioner. `x` holds
/// the initial guess on entry and the solution on exit.
pub fn conjugate_gradient<F>(
    mut op: F,
    diag: Option<&[f64]>,
    x: &mut [f64],
    b: &[f64],
    options: &CgOptions,
) -> Result<CgResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = b.len();
    if x.len() != n {
        return Err(SolverError::DimensionMismatch {
            solver: "cg",
            expected: n,
            actual: x.len(),
        });
    }
    if linalg::norm(b) == 0.0 {
        for xi in x.iter_mut() {
            *xi = 0.0;
        }
        return Ok(CgResult {
            func: 0.0,
            iterations: 0,
            n_ops: 0,
            converged: true,
            residual_norm: 0.0,
        });
    }

    let precond = |z: &mut [f64]| {
        if let Some(d) = diag {
            for (zi, &di) in z.iter_mut().zip(d.iter()) {
                if di.abs() > 1e-12 {
                    *zi /= di;
                }
            }
        }
    };

    let mut n_ops = 0usize;
    let mut r = vec![0.0; n];
    op(x, &mut r);
    n_ops += 1;
    for (ri, &bi) in r.iter_mut().zip(b.iter()) {
        *ri = bi - *ri;
    }
    let mut z = r.clone();
    precond(&mut z);
    let mut p = z.clone();
    let mut rz = linalg::dot(&r, &z);

    let mut resid = linalg::norm(&r);
    for iter in 0..options.max_iter {
        let soft_hit = options.soft_max_iter != 0 && iter >= options.soft_max_iter;
        if resid < options.conv_threshold || soft_hit {
            return Ok(CgResult {
                func: linalg::dot(x, b),
                iterations: iter,
                n_ops,
                converged: resid < options.conv_threshold,
                residual_norm: resid,
            });
        }
        let mut q = vec![0.0; n];
        op(&p, &mut q);
        n_ops += 1;
        let pq = linalg::dot(&p, &q);
        if pq.abs() < 1e-300 {
            return Err(SolverError::Breakdown {
                solver: "cg",
                reason: "vanishing curvature p'Ap".into(),
            });
        }
        let alpha = rz / pq;
        linalg::iadd(x, &p, alpha);
        linalg::iadd(&mut r, &q, -alpha);
        resid = linalg::norm(&r);
        if options.verbose {
            eprintln!("cg iter {:5} resid {:9.2e}", iter + 1, resid);
        }
        z.copy_from_slice(&r);
        precond(&mut z);
        let rz_new = linalg::dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for (pi, &zi) in p.iter_mut().zip(z.iter()) {
            *pi = zi + beta * *pi;
        }
    }

    Err(SolverError::MaxIterationExceeded {
        solver: "cg",
        max_iter: options.max_iter,
    })
}

/// Conjugate gradient restricted to the orthogonal complement of a fixed
/// subspace.
///
/// Components along `deflation` are projected out of the right-hand side, the
/// initial guess and every operator application, so the solve never reenters
/// the deflated directions. Used for resolvent solves where the operator is
/// singular along known eigenvectors.
pub fn deflated_conjugate_gradient<F>(
    mut op: F,
    diag: Option<&[f64]>,
    x: &mut [f64],
    b: &[f64],
    deflation: &[Vec<f64>],
    options: &CgOptions,
) -> Result<CgResult>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = b.len();
    let mut w: Vec<Vec<f64>> = Vec::with_capacity(deflation.len());
    for d in deflation {
        if d.len() != n {
            return Err(SolverError::DimensionMismatch {
                solver: "cg",
                expected: n,
                actual: d.len(),
            });
        }
        let mut v = d.clone();
        let r = linalg::orthogonalize(&mut v, &w);
        if r > 1e-12 {
            linalg::iscale(&mut v, 1.0 / r);
            w.push(v);
        }
    }
    let project = |v: &mut [f64], w: &[Vec<f64>]| {
        for u in w {
            let h = linalg::dot(u, v);
            linalg::iadd(v, u, -h);
        }
    };

    let mut pb = b.to_vec();
    project(&mut pb, &w);
    project(x, &w);
    let wrapped = |v: &[f64], y: &mut [f64]| {
        op(v, y);
        project(y, &w);
    };
    conjugate_gradient(wrapped, diag, x, &pb, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_diagonal_solve() {
        let d: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..10).map(|i| (i as f64) * 0.3 - 1.0).collect();
        let mut x = vec![0.0; 10];
        let res = conjugate_gradient(
            |v, y| {
                for i in 0..10 {
                    y[i] += d[i] * v[i];
                }
            },
            Some(&d),
            &mut x,
            &b,
            &CgOptions::default(),
        )
        .unwrap();
        assert!(res.converged);
        for i in 0..10 {
            assert!((x[i] - b[i] / d[i]).abs() < 1e-8);
        }
        let func: f64 = (0..10).map(|i| x[i] * b[i]).sum();
        assert!((res.func - func).abs() < 1e-12);
    }

    #[test]
    fn test_dense_spd_solve() {
        let n = 8;
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut a = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let x = rng.gen_range(-0.3..0.3);
                a[i * n + j] = x;
                a[j * n + i] = x;
            }
            a[i * n + i] += 4.0;
        }
        let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut x = vec![0.0; n];
        let res = conjugate_gradient(
            |v, y| {
                for i in 0..n {
                    for j in 0..n {
                        y[i] += a[i * n + j] * v[j];
                    }
                }
            },
            None,
            &mut x,
            &b,
            &CgOptions::default(),
        )
        .unwrap();
        assert!(res.converged);
        // check the residual directly
        for i in 0..n {
            let mut ax = 0.0;
            for j in 0..n {
                ax += a[i * n + j] * x[j];
            }
            assert!((ax - b[i]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_zero_rhs() {
        let mut x = vec![1.0, 2.0];
        let res = conjugate_gradient(
            |v, y| {
                y[0] += v[0];
                y[1] += v[1];
            },
            None,
            &mut x,
            &[0.0, 0.0],
            &CgOptions::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert_eq!(x, vec![0.0, 0.0]);
    }

    #[test]
    fn test_deflated_singular_operator() {
        // diag(0, 1, 2, 3) is singular along e0; deflating e0 makes the
        // restricted solve well posed
        let d = [0.0, 1.0, 2.0, 3.0];
        let b = vec![5.0, 1.0, 2.0, 3.0];
        let defl = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let mut x = vec![0.0; 4];
        let res = deflated_conjugate_gradient(
            |v, y| {
                for i in 0..4 {
                    y[i] += d[i] * v[i];
                }
            },
            None,
            &mut x,
            &b,
            &defl,
            &CgOptions::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert!(x[0].abs() < 1e-10);
        for i in 1..4 {
            assert!((x[i] - b[i] / d[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_soft_cap() {
        let n = 50;
        let d: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let opts = CgOptions::default()
            .with_soft_max_iter(3)
            .with_conv_threshold(1e-14);
        let res = conjugate_gradient(
            |v, y| {
                for i in 0..n {
                    y[i] += d[i] * v[i];
                }
            },
            None,
            &mut x,
            &b,
            &opts,
        )
        .unwrap();
        assert!(!res.converged);
        assert_eq!(res.iterations, 3);
    }
}
