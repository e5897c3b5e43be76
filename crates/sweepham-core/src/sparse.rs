//! Block-sparse tensors selected by symmetry.
//!
//! A [`SparseInfo`] describes the block layout: which `(bra sector, ket
//! sector)` pairs carry data, their dense shapes, and their offsets into one
//! contiguous buffer. A [`SparseTensor`] binds such a layout to an owned data
//! buffer; the buffer itself carries no symmetry metadata and is meaningful
//! only through the layout it is currently bound to, so the same flat vector
//! can be handed to iterative solvers as a plain slice.
//!
//! Layouts come in two flavors:
//! - operator layout: blocks `(q + delta, q)`, one per ket sector whose
//!   shifted label exists in the bra basis;
//! - wavefunction layout: blocks `(lq, rq)` over a left and a right basis
//!   with `lq + rq` equal to the state's total label.
//!
//! Either way, for every stored block the row sector is determined by the
//! column sector and the layout's declared delta quantum.

use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::state_info::StateInfo;
use crate::symmetry::QuantumNumber;

/// One dense block of a block-sparse tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry<S> {
    /// Row (bra-side) sector label.
    pub bra: S,
    /// Column (ket-side) sector label.
    pub ket: S,
    /// Dense rows.
    pub rows: usize,
    /// Dense columns.
    pub cols: usize,
    /// Offset of this block in the flat data buffer.
    pub offset: usize,
}

/// Block layout of a sparse tensor: delta quantum plus sorted block list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseInfo<S: QuantumNumber> {
    /// Total label: `bra = ket + delta` for operators, `lq + rq = delta` for
    /// wavefunctions.
    pub delta_quantum: S,
    /// True when this layout addresses a two-sided wavefunction.
    pub wavefunction: bool,
    blocks: Vec<BlockEntry<S>>,
    total_memory: usize,
}

impl<S: QuantumNumber> SparseInfo<S> {
    /// Layout of an operator with delta quantum `delta` acting on `basis`.
    pub fn operator_info(basis: &StateInfo<S>, delta: S) -> Self {
        let mut blocks = Vec::new();
        for (q, cols) in basis.iter() {
            let bq = q + delta;
            let rows = basis.dim_of(bq);
            if rows > 0 {
                blocks.push(BlockEntry {
                    bra: bq,
                    ket: q,
                    rows,
                    cols,
                    offset: 0,
                });
            }
        }
        Self::from_blocks(delta, false, blocks)
    }

    /// Layout of a wavefunction with total label `target` over a left and a
    /// right basis.
    pub fn wavefunction_info(left: &StateInfo<S>, right: &StateInfo<S>, target: S) -> Self {
        let mut blocks = Vec::new();
        for (lq, rows) in left.iter() {
            let rq = target - lq;
            let cols = right.dim_of(rq);
            if cols > 0 {
                blocks.push(BlockEntry {
                    bra: lq,
                    ket: rq,
                    rows,
                    cols,
                    offset: 0,
                });
            }
        }
        Self::from_blocks(target, true, blocks)
    }

    fn from_blocks(delta: S, wavefunction: bool, mut blocks: Vec<BlockEntry<S>>) -> Self {
        blocks.sort_by_key(|b| (b.bra, b.ket));
        let mut offset = 0;
        for b in blocks.iter_mut() {
            b.offset = offset;
            offset += b.rows * b.cols;
        }
        Self {
            delta_quantum: delta,
            wavefunction,
            blocks,
            total_memory: offset,
        }
    }

    /// Validate that every block satisfies the layout's delta constraint.
    pub fn validate(&self) -> Result<()> {
        for b in &self.blocks {
            let ok = if self.wavefunction {
                b.bra + b.ket == self.delta_quantum
            } else {
                b.bra == b.ket + self.delta_quantum
            };
            if !ok {
                return Err(CoreError::DeltaQuantumViolation {
                    bra: b.bra.to_string(),
                    ket: b.ket.to_string(),
                    delta: self.delta_quantum.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Number of stored blocks.
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Total buffer length required by this layout.
    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Block at list position `i`.
    pub fn block(&self, i: usize) -> &BlockEntry<S> {
        &self.blocks[i]
    }

    /// Iterate stored blocks in `(bra, ket)` order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockEntry<S>> + '_ {
        self.blocks.iter()
    }

    /// Position of the block with the given sector pair.
    pub fn find_block(&self, bra: S, ket: S) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&(bra, ket), |b| (b.bra, b.ket))
            .ok()
    }
}

/// A block-sparse tensor: one layout, one owned flat buffer.
#[derive(Debug, Clone)]
pub struct SparseTensor<S: QuantumNumber> {
    /// Shared block layout.
    pub info: Arc<SparseInfo<S>>,
    data: Vec<f64>,
}

impl<S: QuantumNumber> SparseTensor<S> {
    /// Allocate a zeroed tensor for `info`.
    pub fn zeros(info: Arc<SparseInfo<S>>) -> Self {
        let n = info.total_memory();
        Self {
            info,
            data: vec![0.0; n],
        }
    }

    /// Bind an existing buffer to `info`.
    pub fn from_data(info: Arc<SparseInfo<S>>, data: Vec<f64>) -> Result<Self> {
        if data.len() != info.total_memory() {
            return Err(CoreError::BufferSizeMismatch {
                expected: info.total_memory(),
                actual: data.len(),
            });
        }
        Ok(Self { info, data })
    }

    /// Flat view of the whole buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat view of the whole buffer.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Dense block at list position `i`.
    pub fn block(&self, i: usize) -> &[f64] {
        let b = self.info.block(i);
        &self.data[b.offset..b.offset + b.rows * b.cols]
    }

    /// Mutable dense block at list position `i`.
    pub fn block_mut(&mut self, i: usize) -> &mut [f64] {
        let b = *self.info.block(i);
        &mut self.data[b.offset..b.offset + b.rows * b.cols]
    }

    /// Zero the buffer.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Euclidean norm of the buffer.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Inner product with another tensor over the same layout.
    pub fn dot(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// `self += factor * other`, element-wise over the shared layout.
    pub fn iadd(&mut self, other: &Self, factor: f64) {
        debug_assert_eq!(self.data.len(), other.data.len());
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += factor * b;
        }
    }

    /// Scale the buffer in place.
    pub fn iscale(&mut self, factor: f64) {
        for a in self.data.iter_mut() {
            *a *= factor;
        }
    }

    /// Copy another tensor's buffer into this one.
    pub fn copy_from(&mut self, other: &Self) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data.copy_from_slice(&other.data);
    }
}

/// Several layouts over one contiguous buffer.
///
/// Used where a family of related states (one per reachable sector) must live
/// in a single allocation so it can be reduced across processes in one
/// collective call.
#[derive(Debug, Clone)]
pub struct SparseTensorGroup<S: QuantumNumber> {
    infos: Vec<Arc<SparseInfo<S>>>,
    offsets: Vec<usize>,
    data: Vec<f64>,
}

impl<S: QuantumNumber> SparseTensorGroup<S> {
    /// Allocate a zeroed group for the given member layouts.
    pub fn zeros(infos: Vec<Arc<SparseInfo<S>>>) -> Self {
        let mut offsets = Vec::with_capacity(infos.len());
        let mut total = 0;
        for info in &infos {
            offsets.push(total);
            total += info.total_memory();
        }
        Self {
            infos,
            offsets,
            data: vec![0.0; total],
        }
    }

    /// Number of member tensors.
    pub fn n(&self) -> usize {
        self.infos.len()
    }

    /// Layout of member `i`.
    pub fn info(&self, i: usize) -> &Arc<SparseInfo<S>> {
        &self.infos[i]
    }

    /// Flat buffer of the whole group.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat buffer of the whole group.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Flat view of member `i`.
    pub fn member(&self, i: usize) -> &[f64] {
        let off = self.offsets[i];
        &self.data[off..off + self.infos[i].total_memory()]
    }

    /// Mutable flat view of member `i`.
    pub fn member_mut(&mut self, i: usize) -> &mut [f64] {
        let off = self.offsets[i];
        let len = self.infos[i].total_memory();
        &mut self.data[off..off + len]
    }

    /// Euclidean norm over the whole group buffer.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symmetry::SzQ;

    fn basis() -> StateInfo<SzQ> {
        StateInfo::new(vec![
            (SzQ::new(0, 0), 2),
            (SzQ::new(1, 1), 3),
            (SzQ::new(2, 2), 1),
        ])
    }

    #[test]
    fn test_operator_layout() {
        let b = basis();
        // raising operator: delta = (1, 1)
        let info = SparseInfo::operator_info(&b, SzQ::new(1, 1));
        assert_eq!(info.n_blocks(), 2);
        info.validate().unwrap();
        // (1,1) <- (0,0): 3 x 2, (2,2) <- (1,1): 1 x 3
        assert_eq!(info.total_memory(), 3 * 2 + 1 * 3);
        let i = info.find_block(SzQ::new(1, 1), SzQ::new(0, 0)).unwrap();
        assert_eq!((info.block(i).rows, info.block(i).cols), (3, 2));
    }

    #[test]
    fn test_wavefunction_layout() {
        let left = basis();
        let right = basis();
        let info = SparseInfo::wavefunction_info(&left, &right, SzQ::new(2, 2));
        info.validate().unwrap();
        // lq + rq = (2,2): (0,0)x(2,2), (1,1)x(1,1), (2,2)x(0,0)
        assert_eq!(info.n_blocks(), 3);
        assert_eq!(info.total_memory(), 2 * 1 + 3 * 3 + 1 * 2);
    }

    #[test]
    fn test_tensor_block_views() {
        let b = basis();
        let info = Arc::new(SparseInfo::operator_info(&b, SzQ::default()));
        let mut t = SparseTensor::zeros(info.clone());
        assert_eq!(t.data().len(), 2 * 2 + 3 * 3 + 1 * 1);
        t.block_mut(1)[0] = 2.0;
        assert_eq!(t.block(1)[0], 2.0);
        assert!((t.norm() - 2.0).abs() < 1e-14);
    }

    #[test]
    fn test_from_data_size_check() {
        let b = basis();
        let info = Arc::new(SparseInfo::operator_info(&b, SzQ::default()));
        assert!(SparseTensor::from_data(info, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_group_members_are_disjoint() {
        let b = basis();
        let i0 = Arc::new(SparseInfo::operator_info(&b, SzQ::default()));
        let i1 = Arc::new(SparseInfo::operator_info(&b, SzQ::new(1, 1)));
        let mut g = SparseTensorGroup::zeros(vec![i0.clone(), i1.clone()]);
        assert_eq!(g.n(), 2);
        assert_eq!(g.data().len(), i0.total_memory() + i1.total_memory());
        g.member_mut(1)[0] = 1.0;
        assert_eq!(g.member(0).iter().copied().sum::<f64>(), 0.0);
        assert_eq!(g.member(1)[0], 1.0);
    }
}
