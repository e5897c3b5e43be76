//! Matrix-free iterative solvers.
//!
//! Every solver here consumes the operator as a callback `FnMut(&[f64], &mut
//! [f64])` (or its `Complex64` counterpart) that accumulates `A*x` into the
//! output buffer; solvers zero the buffer before each call. This keeps the
//! algorithms independent of any tensor representation: the caller decides
//! what a "vector" is by handing over flat slices.
//!
//! # Solvers
//!
//! - [`davidson`]: lowest (or harmonic-shifted interior) eigenpairs of a
//!   symmetric operator with diagonal preconditioning.
//! - [`conjugate_gradient`] / [`deflated_conjugate_gradient`]: symmetric
//!   positive-definite solves, optionally deflated against a fixed subspace.
//! - [`minres`]: symmetric indefinite solves.
//! - [`gcrotmk`]: complex non-Hermitian solves with recycled outer vectors.
//! - [`expo_apply`]: Krylov approximation of `exp(beta*A)*v`.
//!
//! # Convergence contract
//!
//! Each linear and eigen solver takes a hard `max_iter` and a soft cap.
//! Exhausting the soft cap returns the best iterate with `converged = false`;
//! exhausting `max_iter` is an error. [`expo_apply`] instead caps the
//! subspace size and reports `converged = false` when the truncation estimate
//! stays above tolerance. All solvers report the number of operator
//! applications actually used.

pub mod cg;
pub mod davidson;
pub mod error;
pub mod expo;
pub mod gcrotmk;
pub(crate) mod linalg;
pub mod minres;

pub use cg::{conjugate_gradient, deflated_conjugate_gradient, CgOptions, CgResult};
pub use davidson::{davidson, DavidsonMode, DavidsonOptions, DavidsonResult};
pub use error::SolverError;
pub use expo::{expo_apply, ExpoOptions, ExpoResult};
pub use gcrotmk::{gcrotmk, GcrotOptions, GcrotResult};
pub use minres::{minres, MinresOptions, MinresResult};
