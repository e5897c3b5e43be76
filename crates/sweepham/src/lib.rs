//! Matrix-free effective Hamiltonian for 1D tensor-network sweeps.
//!
//! The effective Hamiltonian is the local operator restricted to the active
//! site(s) between a left and a right environment. Every higher-level
//! procedure of a sweep (ground-state search, Green's functions, time
//! propagation, density-matrix expectations, noise-based subspace expansion)
//! reduces to many applications of this operator to a block-sparse state
//! vector.
//!
//! - [`engine`]: block contraction over a precomputed connection index, with
//!   a direct mode and a recorded-plan mode that amortizes dispatch over the
//!   thousands of applies of one iterative solve.
//! - [`effective`]: the operator itself and its solve entry points.
//! - [`functions`]: complex-resolvent and squared-resolvent specializations.
//! - [`linear`]: scalar linear combinations of several operators.
//! - [`parallel`]: deterministic work distribution across cooperating
//!   processes and the collective reductions keeping them consistent.
//! - [`noise`]: perturbative subspace expansion.

pub mod effective;
pub mod engine;
pub mod functions;
pub mod linear;
pub mod noise;
pub mod parallel;

pub use effective::EffectiveHamiltonian;
pub use engine::{
    ContractionEngine, ModeGuard, OperatorSlice, OperatorTensor, SeqMode,
};
pub use functions::{greens_function_complex, greens_function_squared};
pub use linear::LinearEffectiveHamiltonian;
pub use noise::{FuseType, NoiseType};
pub use parallel::{Communicator, ParallelRule, SerialComm, SumMpoRule, ThreadComm};
