//! Core data structures for one-dimensional tensor-network sweep algorithms.
//!
//! A sweep optimizes one or two active sites between a left and a right
//! environment. Everything in this crate serves that structural assumption:
//!
//! - [`symmetry`]: conserved quantum-number labels and the [`QuantumNumber`]
//!   trait they implement.
//! - [`state_info`]: per-sector dimension tables for a basis, and fused
//!   (tensor-product) bases.
//! - [`sparse`]: block-sparse tensors whose blocks are selected by symmetry.
//! - [`expr`]: symbolic operator expressions (sums and products of elementary
//!   operators attached to the two environments).
//! - [`connection`]: the precomputed enumeration of compatible sector triples
//!   that drives block contraction.
//! - [`arena`]: stack-discipline allocation tracking for transient solver
//!   resources.

pub mod arena;
pub mod connection;
pub mod error;
pub mod expr;
pub mod sparse;
pub mod state_info;
pub mod symmetry;

pub use arena::{ArenaSlot, StackArena};
pub use connection::{ConnectionEntry, ConnectionIndex, SubLabel};
pub use error::CoreError;
pub use expr::{OpElement, OpExpr, OpName, OpProduct, OpSumProd};
pub use sparse::{BlockEntry, SparseInfo, SparseTensor, SparseTensorGroup};
pub use state_info::{MpsInfo, StateInfo};
pub use symmetry::{QuantumNumber, SzQ};
