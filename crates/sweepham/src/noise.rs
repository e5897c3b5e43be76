//! Perturbative subspace expansion.
//!
//! During a sweep the local basis can get trapped in a poor subspace; the
//! noise path builds an approximate excited-subspace correction by applying
//! one side of every Hamiltonian product to the ket and collecting the
//! results per reachable target sector. The untouched side of the output is
//! optionally enlarged to the fused basis of the neighboring cut, capped by
//! the exact tables, so subsequent state enlargement has sectors to grow
//! into.

use std::ops::BitOr;
use std::sync::Arc;

use sweepham_core::{
    ConnectionIndex, MpsInfo, OpName, OpProduct, QuantumNumber, SparseInfo, SparseTensor,
    SparseTensorGroup, StateInfo, SubLabel,
};

use crate::effective::EffectiveHamiltonian;
use crate::parallel::ParallelRule;

/// Which side(s) of the noise output use the enlarged fused basis.
///
/// Only the side the contraction does not act on is ever enlarged; a flag
/// naming the acted side is a no-op for that call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseType {
    NoFuse,
    FuseL,
    FuseR,
    FuseLR,
}

impl FuseType {
    pub fn fuses_left(self) -> bool {
        matches!(self, FuseType::FuseL | FuseType::FuseLR)
    }

    pub fn fuses_right(self) -> bool {
        matches!(self, FuseType::FuseR | FuseType::FuseLR)
    }
}

/// Noise variant flags, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseType(u8);

impl NoiseType {
    pub const NONE: NoiseType = NoiseType(0);
    /// Base variant: one-sided Hamiltonian contraction per target sector.
    pub const PERTURBATIVE: NoiseType = NoiseType(1);
    /// Normalize each output sector to unit norm.
    pub const REDUCED: NoiseType = NoiseType(2);
    /// Sum-reduce the output across processes before returning.
    pub const COLLECTED: NoiseType = NoiseType(4);

    pub fn contains(self, other: NoiseType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NoiseType {
    type Output = NoiseType;

    fn bitor(self, rhs: NoiseType) -> NoiseType {
        NoiseType(self.0 | rhs.0)
    }
}

/// One-sided Hamiltonian contraction into a group of target-sector states.
///
/// With `trace_right` the left factor of every product acts on the ket and
/// the right side of the output is the untouched one; otherwise the roles
/// swap. With a rule, each product is evaluated only by the owner of its
/// acting factor, the reachable-sector set is unioned across processes
/// before allocation (so every process allocates the identical group), and
/// `COLLECTED` reduces the group buffer before returning; without
/// `COLLECTED` the caller reduces explicitly.
#[allow(clippy::too_many_arguments)]
pub(crate) fn perturbative_noise<S: QuantumNumber>(
    h: &mut EffectiveHamiltonian<'_, S>,
    trace_right: bool,
    i_l: usize,
    i_r: usize,
    fuse_type: FuseType,
    mps_info: &MpsInfo<S>,
    noise_type: NoiseType,
    rule: Option<&ParallelRule<S>>,
) -> SparseTensorGroup<S> {
    if !noise_type.contains(NoiseType::PERTURBATIVE) {
        return SparseTensorGroup::zeros(Vec::new());
    }

    let ket = h.ket.clone();
    let out_left: StateInfo<S> = if !trace_right && fuse_type.fuses_left() {
        mps_info.left_dims[i_l].tensor_product(
            &mps_info.basis[i_l],
            Some(&mps_info.left_dims_fci[i_l + 1]),
        )
    } else {
        h.left_basis.clone()
    };
    let out_right: StateInfo<S> = if trace_right && fuse_type.fuses_right() {
        mps_info.basis[i_r].tensor_product(
            &mps_info.right_dims[i_r + 1],
            Some(&mps_info.right_dims_fci[i_r]),
        )
    } else {
        h.right_basis.clone()
    };

    let products: Vec<OpProduct<S>> = h
        .op
        .hamiltonian()
        .expand()
        .into_iter()
        .filter(|p| p.factor != 0.0 && p.left.name != OpName::Zero && p.right.name != OpName::Zero)
        .collect();
    let owned = |p: &OpProduct<S>| -> bool {
        let acting = if trace_right { &p.left } else { &p.right };
        rule.map_or(true, |r| r.own_term(acting))
    };
    let target_of = |p: &OpProduct<S>| -> S {
        let dq = if trace_right {
            p.left_delta()
        } else {
            p.right_delta()
        };
        ket.info.delta_quantum + dq
    };

    // deterministic candidate list, identical on every process
    let mut candidates: Vec<S> = products.iter().map(&target_of).collect();
    candidates.sort();
    candidates.dedup();

    let infos: Vec<Arc<SparseInfo<S>>> = candidates
        .iter()
        .map(|&q| Arc::new(SparseInfo::wavefunction_info(&out_left, &out_right, q)))
        .collect();

    // union of locally reachable sectors, encoded as a membership mask
    let mut mask: Vec<f64> = candidates
        .iter()
        .zip(infos.iter())
        .map(|(&q, info)| {
            let reachable = info.n_blocks() > 0
                && products.iter().any(|p| owned(p) && target_of(p) == q);
            if reachable {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    if let Some(rule) = rule {
        rule.comm().all_reduce_sum(&mut mask);
    }

    let kept: Vec<(S, Arc<SparseInfo<S>>)> = candidates
        .iter()
        .zip(infos)
        .zip(mask.iter())
        .filter(|(_, &m)| m > 0.0)
        .map(|((&q, info), _)| (q, info))
        .collect();
    let mut group = SparseTensorGroup::zeros(kept.iter().map(|(_, i)| i.clone()).collect());

    let (engine, op, _) = h.split();
    for (m, (q, info)) in kept.iter().enumerate() {
        let mut acc = SparseTensor::zeros(info.clone());
        // one connection index per (sub-label, target sector) pair
        let mut sub_labels: Vec<SubLabel<S>> = products
            .iter()
            .filter(|p| owned(p) && target_of(p) == *q)
            .map(|p| SubLabel {
                conj: p.conj,
                dl: p.left_delta(),
                dr: p.right_delta(),
            })
            .collect();
        sub_labels.sort();
        sub_labels.dedup();
        for sl in sub_labels {
            let cinfo = ConnectionIndex::initialize_partial(trace_right, &ket.info, info, sl);
            for p in products.iter().filter(|p| {
                owned(p)
                    && p.conj == sl.conj
                    && p.left_delta() == sl.dl
                    && p.right_delta() == sl.dr
                    && target_of(p) == *q
            }) {
                engine.tensor_product_partial_multiply(
                    trace_right,
                    p.factor,
                    op.left.get(&p.left),
                    op.right.get(&p.right),
                    p.conj,
                    &cinfo,
                    &ket,
                    &mut acc,
                );
            }
        }
        group.member_mut(m).copy_from_slice(acc.data());
    }

    if noise_type.contains(NoiseType::COLLECTED) {
        if let Some(rule) = rule {
            rule.comm().all_reduce_sum(group.data_mut());
        }
    }
    if noise_type.contains(NoiseType::REDUCED) {
        for m in 0..group.n() {
            let buf = group.member_mut(m);
            let norm = buf.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in buf.iter_mut() {
                    *x /= norm;
                }
            }
        }
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effective::testutil::*;
    use crate::engine::{ContractionEngine, OperatorSlice, OperatorTensor, SeqMode};
    use sweepham_core::{OpElement, OpExpr, SzQ};

    fn flat_mps_info() -> MpsInfo<SzQ> {
        // two-site chain with trivial environments on both ends
        let vac = StateInfo::single(SzQ::default(), 1);
        MpsInfo {
            basis: vec![site_basis(), site_basis()],
            left_dims: vec![vac.clone(), site_basis(), site_basis()],
            right_dims: vec![site_basis(), site_basis(), vac.clone()],
            left_dims_fci: vec![
                vac.clone(),
                site_basis(),
                site_basis().tensor_product(&site_basis(), None),
            ],
            right_dims_fci: vec![
                site_basis().tensor_product(&site_basis(), None),
                site_basis(),
                vac,
            ],
        }
    }

    fn build_heff<'a>(
        op: &'a OperatorSlice<SzQ>,
        left: &'a StateInfo<SzQ>,
        right: &'a StateInfo<SzQ>,
    ) -> EffectiveHamiltonian<'a, SzQ> {
        let info = wfn_info(1);
        let mut ket = SparseTensor::zeros(info.clone());
        ket.data_mut().copy_from_slice(&[0.6, 0.8]);
        let bra = SparseTensor::zeros(info);
        EffectiveHamiltonian::new(
            left,
            right,
            op,
            bra,
            ket,
            SzQ::default(),
            ContractionEngine::new(SeqMode::None),
            false,
        )
    }

    #[test]
    fn test_noise_type_flags_combine() {
        let nt = NoiseType::PERTURBATIVE | NoiseType::REDUCED;
        assert!(nt.contains(NoiseType::PERTURBATIVE));
        assert!(nt.contains(NoiseType::REDUCED));
        assert!(!nt.contains(NoiseType::COLLECTED));
        assert!(NoiseType::NONE.contains(NoiseType::NONE));
    }

    #[test]
    fn test_fuse_type_sides() {
        assert!(FuseType::FuseLR.fuses_left() && FuseType::FuseLR.fuses_right());
        assert!(FuseType::FuseL.fuses_left() && !FuseType::FuseL.fuses_right());
        assert!(!FuseType::NoFuse.fuses_left() && !FuseType::NoFuse.fuses_right());
    }

    #[test]
    fn test_without_perturbative_flag_is_empty() {
        let op = number_op_slice(2.0, 3.0);
        let (l, r) = (site_basis(), site_basis());
        let mut h = build_heff(&op, &l, &r);
        let g = h.perturbative_noise(
            true,
            0,
            1,
            FuseType::NoFuse,
            &flat_mps_info(),
            NoiseType::NONE,
            None,
        );
        assert_eq!(g.n(), 0);
    }

    #[test]
    fn test_diagonal_terms_stay_in_ket_sector() {
        let op = number_op_slice(2.0, 3.0);
        let (l, r) = (site_basis(), site_basis());
        let mut h = build_heff(&op, &l, &r);
        let g = h.perturbative_noise(
            true,
            0,
            1,
            FuseType::NoFuse,
            &flat_mps_info(),
            NoiseType::PERTURBATIVE,
            None,
        );
        // both products keep the ket's sector; left factors only:
        // hl * nL + hr * I applied to (0.6, 0.8)
        assert_eq!(g.n(), 1);
        assert_eq!(g.info(0).delta_quantum, SzQ::new(1, 1));
        let member = g.member(0);
        assert!((member[0] - 3.0 * 0.6).abs() < 1e-14);
        assert!((member[1] - (2.0 * 0.8 + 3.0 * 0.8)).abs() < 1e-14);
    }

    #[test]
    fn test_raising_term_reaches_shifted_sector() {
        let mut left = OperatorTensor::new(site_basis());
        let mut right = OperatorTensor::new(site_basis());
        let c = OpElement::new(OpName::C, SzQ::new(1, 1));
        let d = OpElement::new(OpName::D, SzQ::new(-1, -1));
        // C block (1,1) <- (0,0)
        left.insert(c.clone()).data_mut()[0] = 0.5;
        right.insert(d.clone()).data_mut()[0] = 1.0;
        let h_expr = OpExpr::Prod(OpProduct {
            factor: 2.0,
            left: c,
            right: d,
            conj: 0,
        });
        let op = OperatorSlice::new(left, right, h_expr, SzQ::default());
        let (l, r) = (site_basis(), site_basis());
        let mut h = build_heff(&op, &l, &r);
        let g = h.perturbative_noise(
            true,
            0,
            1,
            FuseType::NoFuse,
            &flat_mps_info(),
            NoiseType::PERTURBATIVE,
            None,
        );
        // left C shifts the ket's (1,1) sector to (2,2)
        assert_eq!(g.n(), 1);
        assert_eq!(g.info(0).delta_quantum, SzQ::new(2, 2));
        // single block (1,1) x (1,1), fed from ket block (0,0) x (1,1)
        assert_eq!(g.member(0).len(), 1);
        assert!((g.member(0)[0] - 2.0 * 0.5 * 0.6).abs() < 1e-14);
    }

    #[test]
    fn test_reduced_noise_normalizes_members() {
        let op = number_op_slice(2.0, 3.0);
        let (l, r) = (site_basis(), site_basis());
        let mut h = build_heff(&op, &l, &r);
        let g = h.perturbative_noise(
            true,
            0,
            1,
            FuseType::NoFuse,
            &flat_mps_info(),
            NoiseType::PERTURBATIVE | NoiseType::REDUCED,
            None,
        );
        let norm = g.member(0).iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fused_side_enlarges_untouched_basis() {
        let op = number_op_slice(2.0, 3.0);
        let (l, r) = (site_basis(), site_basis());
        let mut h = build_heff(&op, &l, &r);
        let g = h.perturbative_noise(
            true,
            0,
            1,
            FuseType::FuseR,
            &flat_mps_info(),
            NoiseType::PERTURBATIVE,
            None,
        );
        assert_eq!(g.n(), 1);
        // fused right basis is site (x) vacuum capped by the exact table,
        // same sectors here, so the layout stays compatible
        assert!(g.member(0).iter().any(|&x| x != 0.0));
    }
}
