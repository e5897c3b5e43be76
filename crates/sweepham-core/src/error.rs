//! Error types for core structures.

use thiserror::Error;

/// Error type for sector-table and block-sparse operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A requested symmetry sector is not present in the basis.
    #[error("Sector not found in basis")]
    SectorNotFound,

    /// A block violates the delta-quantum constraint of its info.
    #[error("Block ({bra}, {ket}) violates delta quantum {delta}")]
    DeltaQuantumViolation {
        bra: String,
        ket: String,
        delta: String,
    },

    /// Data buffer length does not match the block layout.
    #[error("Buffer length {actual} does not match layout size {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
