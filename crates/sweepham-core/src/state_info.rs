//! Per-sector dimension tables.
//!
//! A [`StateInfo`] lists, for one basis, the symmetry sectors present and the
//! number of states in each. Sectors are kept sorted by label so lookups are
//! binary searches and two tables over the same basis compare equal
//! structurally.

use crate::symmetry::QuantumNumber;

/// Sector table of a basis: sorted `(label, dimension)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo<S: QuantumNumber> {
    sectors: Vec<(S, usize)>,
}

impl<S: QuantumNumber> StateInfo<S> {
    /// Build a table from arbitrary `(label, dim)` pairs.
    ///
    /// Duplicate labels are merged by summing dimensions; zero-dimensional
    /// sectors are dropped.
    pub fn new(mut sectors: Vec<(S, usize)>) -> Self {
        sectors.sort_by_key(|&(q, _)| q);
        let mut merged: Vec<(S, usize)> = Vec::with_capacity(sectors.len());
        for (q, d) in sectors {
            if d == 0 {
                continue;
            }
            match merged.last_mut() {
                Some((lq, ld)) if *lq == q => *ld += d,
                _ => merged.push((q, d)),
            }
        }
        Self { sectors: merged }
    }

    /// Single-sector basis.
    pub fn single(q: S, dim: usize) -> Self {
        Self::new(vec![(q, dim)])
    }

    /// Number of sectors.
    pub fn n_sectors(&self) -> usize {
        self.sectors.len()
    }

    /// Total number of states over all sectors.
    pub fn total_states(&self) -> usize {
        self.sectors.iter().map(|&(_, d)| d).sum()
    }

    /// Index of the sector with label `q`, if present.
    pub fn find(&self, q: S) -> Option<usize> {
        self.sectors.binary_search_by_key(&q, |&(p, _)| p).ok()
    }

    /// Dimension of the sector with label `q`, zero if absent.
    pub fn dim_of(&self, q: S) -> usize {
        self.find(q).map_or(0, |i| self.sectors[i].1)
    }

    /// Sector at table position `i`.
    pub fn sector(&self, i: usize) -> (S, usize) {
        self.sectors[i]
    }

    /// Iterate `(label, dim)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (S, usize)> + '_ {
        self.sectors.iter().copied()
    }

    /// Fused basis of `self` (x) `other`.
    ///
    /// Every pair of sectors contributes its label sum; dimensions of equal
    /// fused labels accumulate. When `cap` is given, fused sectors absent
    /// from `cap` are discarded and dimensions are clamped to the cap's,
    /// which restricts the enlarged basis to what the full problem allows.
    pub fn tensor_product(&self, other: &Self, cap: Option<&Self>) -> Self {
        let mut fused: Vec<(S, usize)> = Vec::new();
        for (ql, dl) in self.iter() {
            for (qr, dr) in other.iter() {
                let q = ql + qr;
                for k in 0..q.count() {
                    fused.push((q.sub_label(k), dl * dr));
                }
            }
        }
        let mut out = Self::new(fused);
        if let Some(cap) = cap {
            out.sectors.retain(|&(q, _)| cap.find(q).is_some());
            for (q, d) in out.sectors.iter_mut() {
                *d = (*d).min(cap.dim_of(*q));
            }
        }
        out
    }
}

/// Basis metadata of a full matrix-product state.
///
/// Holds, for every cut of the chain, the renormalized left/right sector
/// tables plus the exact (uncut) tables used to cap fused bases, and the
/// physical basis of every site. This is what the noise path consults to
/// build enlarged bases for the side of the chain it does not touch.
#[derive(Debug, Clone)]
pub struct MpsInfo<S: QuantumNumber> {
    /// Physical basis per site.
    pub basis: Vec<StateInfo<S>>,
    /// Renormalized left-environment basis per cut; entry `i` is the basis
    /// left of site `i`.
    pub left_dims: Vec<StateInfo<S>>,
    /// Renormalized right-environment basis per cut; entry `i` is the basis
    /// right of and including site `i`.
    pub right_dims: Vec<StateInfo<S>>,
    /// Exact left tables (no truncation), same indexing as `left_dims`.
    pub left_dims_fci: Vec<StateInfo<S>>,
    /// Exact right tables (no truncation), same indexing as `right_dims`.
    pub right_dims_fci: Vec<StateInfo<S>>,
}

impl<S: QuantumNumber> MpsInfo<S> {
    /// Number of sites.
    pub fn n_sites(&self) -> usize {
        self.basis.len()
    }
}
