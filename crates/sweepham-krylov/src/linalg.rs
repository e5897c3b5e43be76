//! Small dense helpers shared by the solvers.
//!
//! Subspace problems here are tiny (tens of rows), so the dense kernels are
//! written out directly rather than pulling in a linear-algebra backend.

use num_complex::Complex64;

// ---------------------------------------------------------------------------
// Real slice operations
// ---------------------------------------------------------------------------

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y += alpha * x`
pub fn iadd(y: &mut [f64], x: &[f64], alpha: f64) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

pub fn iscale(y: &mut [f64], alpha: f64) {
    for yi in y.iter_mut() {
        *yi *= alpha;
    }
}

/// Orthogonalize `w` against `basis` twice (modified Gram-Schmidt with one
/// reorthogonalization pass) and return its remaining norm.
pub fn orthogonalize(w: &mut [f64], basis: &[Vec<f64>]) -> f64 {
    for _ in 0..2 {
        for v in basis {
            let h = dot(v, w);
            iadd(w, v, -h);
        }
    }
    norm(w)
}

// ---------------------------------------------------------------------------
// Complex slice operations
// ---------------------------------------------------------------------------

/// Conjugated inner product `<a|b>`.
pub fn cdot(a: &[Complex64], b: &[Complex64]) -> Complex64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

pub fn cnorm(a: &[Complex64]) -> f64 {
    a.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// `y += alpha * x`
pub fn ciadd(y: &mut [Complex64], x: &[Complex64], alpha: Complex64) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

pub fn ciscale(y: &mut [Complex64], alpha: Complex64) {
    for yi in y.iter_mut() {
        *yi *= alpha;
    }
}

// ---------------------------------------------------------------------------
// Dense symmetric eigensolve (cyclic Jacobi)
// ---------------------------------------------------------------------------

/// Eigendecomposition of a small symmetric matrix, ascending eigenvalues.
///
/// `a` is row-major `n x n` and is destroyed. Returns `(eigenvalues,
/// eigenvectors)` with eigenvector `j` stored in column `j` of the returned
/// row-major matrix.
pub fn jacobi_eigh(a: &mut [f64], n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }
    for _sweep in 0..100 {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[p * n + q] * a[p * n + q];
            }
        }
        if off.sqrt() < 1e-14 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let app = a[p * n + p];
                let aqq = a[q * n + q];
                let theta = (aqq - app) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[i * n + i].partial_cmp(&a[j * n + j]).unwrap());
    let eigenvalues: Vec<f64> = order.iter().map(|&i| a[i * n + i]).collect();
    let mut vectors = vec![0.0; n * n];
    for (jnew, &jold) in order.iter().enumerate() {
        for k in 0..n {
            vectors[k * n + jnew] = v[k * n + jold];
        }
    }
    (eigenvalues, vectors)
}

// ---------------------------------------------------------------------------
// Dense matrix exponential (scaling + truncated Taylor)
// ---------------------------------------------------------------------------

/// `exp(a)` of a small row-major `n x n` matrix.
pub fn expm_small(a: &[f64], n: usize) -> Vec<f64> {
    // scale so the scaled norm is comfortably below 1
    let amax = a.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
    let s = if amax > 0.5 {
        (amax / 0.5).log2().ceil() as u32
    } else {
        0
    };
    let scale = 1.0 / (1u64 << s) as f64;

    let mut result = vec![0.0; n * n];
    let mut term = vec![0.0; n * n];
    for i in 0..n {
        result[i * n + i] = 1.0;
        term[i * n + i] = 1.0;
    }
    for k in 1..=20 {
        let mut next = vec![0.0; n * n];
        for i in 0..n {
            for l in 0..n {
                let t = term[i * n + l];
                if t == 0.0 {
                    continue;
                }
                for j in 0..n {
                    next[i * n + j] += t * a[l * n + j] * scale;
                }
            }
        }
        for x in next.iter_mut() {
            *x /= k as f64;
        }
        for (r, t) in result.iter_mut().zip(next.iter()) {
            *r += t;
        }
        term = next;
    }
    for _ in 0..s {
        let mut sq = vec![0.0; n * n];
        for i in 0..n {
            for l in 0..n {
                let t = result[i * n + l];
                if t == 0.0 {
                    continue;
                }
                for j in 0..n {
                    sq[i * n + j] += t * result[l * n + j];
                }
            }
        }
        result = sq;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jacobi_diagonal() {
        let mut a = vec![3.0, 0.0, 0.0, 1.0];
        let (vals, _) = jacobi_eigh(&mut a, 2);
        assert!((vals[0] - 1.0).abs() < 1e-12);
        assert!((vals[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_jacobi_symmetric_2x2() {
        // eigenvalues of [[2,1],[1,2]] are 1 and 3
        let mut a = vec![2.0, 1.0, 1.0, 2.0];
        let (vals, vecs) = jacobi_eigh(&mut a, 2);
        assert!((vals[0] - 1.0).abs() < 1e-12);
        assert!((vals[1] - 3.0).abs() < 1e-12);
        // eigenvector for 1 is (1,-1)/sqrt(2)
        let (x, y) = (vecs[0], vecs[2]);
        assert!((x + y).abs() < 1e-10);
    }

    #[test]
    fn test_expm_diagonal() {
        let a = vec![1.0, 0.0, 0.0, -2.0];
        let e = expm_small(&a, 2);
        assert!((e[0] - 1.0f64.exp()).abs() < 1e-10);
        assert!((e[3] - (-2.0f64).exp()).abs() < 1e-10);
        assert!(e[1].abs() < 1e-12);
    }

    #[test]
    fn test_expm_nilpotent() {
        // exp([[0,1],[0,0]]) = [[1,1],[0,1]]
        let a = vec![0.0, 1.0, 0.0, 0.0];
        let e = expm_small(&a, 2);
        assert!((e[0] - 1.0).abs() < 1e-12);
        assert!((e[1] - 1.0).abs() < 1e-12);
        assert!(e[2].abs() < 1e-12);
        assert!((e[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_orthogonalize() {
        let basis = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let mut w = vec![1.0, 1.0, 2.0];
        let r = orthogonalize(&mut w, &basis);
        assert!((r - 2.0).abs() < 1e-12);
        assert!(w[0].abs() < 1e-12 && w[1].abs() < 1e-12);
    }
}
