//! Connection indices for block contraction.
//!
//! Applying `sum_a L_a (x) R_a` to a wavefunction touches only those block
//! triples whose sector labels are compatible. A [`ConnectionIndex`]
//! enumerates them once, grouped by the unique sub-labels (effective left and
//! right delta quanta plus conjugation flags) appearing in the symbolic
//! expression, so that every subsequent apply is a flat walk over
//! precomputed `(bra block, ket block, sector pair)` records.
//!
//! A connection index must exist before any apply against it and is released
//! through the owning arena in reverse order of construction.

use crate::expr::OpExpr;
use crate::sparse::SparseInfo;
use crate::symmetry::QuantumNumber;

/// Unique sub-label of an expression: conjugation flags plus the effective
/// delta quanta applied by the left and the right factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubLabel<S> {
    /// Bit 0: left factor transposed; bit 1: right factor transposed.
    pub conj: u8,
    /// Effective left delta.
    pub dl: S,
    /// Effective right delta.
    pub dr: S,
}

/// One contributing block triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEntry<S> {
    /// Output block position in the bra layout.
    pub bra_block: usize,
    /// Input block position in the ket layout.
    pub ket_block: usize,
    /// Left-basis sector pair `(bra, ket)` of the left operator block.
    pub lq: (S, S),
    /// Right-basis sector pair `(bra, ket)` of the right operator block.
    pub rq: (S, S),
}

/// Precomputed enumeration of compatible sector triples for one bra/ket pair.
#[derive(Debug, Clone)]
pub struct ConnectionIndex<S: QuantumNumber> {
    groups: Vec<(SubLabel<S>, Vec<ConnectionEntry<S>>)>,
}

/// Collect the unique sub-labels of an expression, sorted and deduplicated.
pub fn uniq_sub_labels<S: QuantumNumber>(expr: &OpExpr<S>) -> Vec<SubLabel<S>> {
    let mut labels: Vec<SubLabel<S>> = expr
        .expand()
        .iter()
        .map(|p| SubLabel {
            conj: p.conj,
            dl: p.left_delta(),
            dr: p.right_delta(),
        })
        .collect();
    labels.sort();
    labels.dedup();
    labels
}

impl<S: QuantumNumber> ConnectionIndex<S> {
    /// Connection index for the wavefunction transform `bra <- op * ket`.
    ///
    /// For each sub-label and each stored ket block `(lq, rq)`, the shifted
    /// pair `(lq + dl, rq + dr)` must be a stored bra block to contribute.
    pub fn initialize_wfn(
        ket_info: &SparseInfo<S>,
        bra_info: &SparseInfo<S>,
        sub_labels: &[SubLabel<S>],
    ) -> Self {
        let mut groups = Vec::with_capacity(sub_labels.len());
        for &sl in sub_labels {
            let mut entries = Vec::new();
            for (kb, kblk) in ket_info.blocks().enumerate() {
                let (lq, rq) = (kblk.bra, kblk.ket);
                let (lq_out, rq_out) = (lq + sl.dl, rq + sl.dr);
                if let Some(bb) = bra_info.find_block(lq_out, rq_out) {
                    entries.push(ConnectionEntry {
                        bra_block: bb,
                        ket_block: kb,
                        lq: (lq_out, lq),
                        rq: (rq_out, rq),
                    });
                }
            }
            groups.push((sl, entries));
        }
        Self { groups }
    }

    /// Connection index restricted to the diagonal.
    ///
    /// Only sub-labels with vanishing left and right deltas can reach the
    /// diagonal; every stored block maps onto itself.
    pub fn initialize_diag(ket_info: &SparseInfo<S>, sub_labels: &[SubLabel<S>]) -> Self {
        let zero = S::default();
        let mut groups = Vec::new();
        for &sl in sub_labels {
            if sl.dl != zero || sl.dr != zero {
                continue;
            }
            let entries = ket_info
                .blocks()
                .enumerate()
                .map(|(kb, kblk)| ConnectionEntry {
                    bra_block: kb,
                    ket_block: kb,
                    lq: (kblk.bra, kblk.bra),
                    rq: (kblk.ket, kblk.ket),
                })
                .collect();
            groups.push((sl, entries));
        }
        Self { groups }
    }

    /// Connection index for a one-sided (partial) contraction.
    ///
    /// With `trace_right` the right factor is replaced by the identity and
    /// only the left delta shifts the block; otherwise the roles swap. Used
    /// by the perturbative-noise path, one index per (sub-label, target
    /// sector) pair.
    pub fn initialize_partial(
        trace_right: bool,
        ket_info: &SparseInfo<S>,
        target_info: &SparseInfo<S>,
        sub_label: SubLabel<S>,
    ) -> Self {
        let mut entries = Vec::new();
        for (kb, kblk) in ket_info.blocks().enumerate() {
            let (lq, rq) = (kblk.bra, kblk.ket);
            let (lq_out, rq_out) = if trace_right {
                (lq + sub_label.dl, rq)
            } else {
                (lq, rq + sub_label.dr)
            };
            if let Some(bb) = target_info.find_block(lq_out, rq_out) {
                entries.push(ConnectionEntry {
                    bra_block: bb,
                    ket_block: kb,
                    lq: (lq_out, lq),
                    rq: (rq_out, rq),
                });
            }
        }
        Self {
            groups: vec![(sub_label, entries)],
        }
    }

    /// Iterate `(sub-label, entries)` groups.
    pub fn groups(&self) -> impl Iterator<Item = (&SubLabel<S>, &[ConnectionEntry<S>])> + '_ {
        self.groups.iter().map(|(sl, es)| (sl, es.as_slice()))
    }

    /// Entries for one sub-label, if present.
    pub fn entries_for(&self, sl: &SubLabel<S>) -> Option<&[ConnectionEntry<S>]> {
        self.groups
            .iter()
            .find(|(g, _)| g == sl)
            .map(|(_, es)| es.as_slice())
    }

    /// Total number of entries over all groups.
    pub fn n_entries(&self) -> usize {
        self.groups.iter().map(|(_, es)| es.len()).sum()
    }
}
