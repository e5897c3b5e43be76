//! Block contraction over a precomputed connection index.
//!
//! The engine walks the connection index of one bra/ket pair and performs the
//! dense block products `bra += factor * L * ket * R^T` selected by each
//! sub-label. It keeps a cumulative flop counter and, in the batched modes,
//! a recorded plan: a dry run resolves every block triple once and stores the
//! resulting gemm sequence, which later applies replay without touching the
//! symbolic expression or searching sectors again.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sweepham_core::{
    ConnectionIndex, OpElement, OpExpr, OpName, QuantumNumber, SparseInfo, SparseTensor, StateInfo,
    SubLabel,
};

use crate::parallel::Communicator;

/// Execution mode of the contraction engine.
///
/// `None` and `Simple` dispatch each block product directly; `Auto` and
/// `Tasked` run against a recorded plan when one is active. `Simple` is the
/// downgrade target for one-shot applies where recording a plan cannot pay
/// off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeqMode {
    #[default]
    None,
    Simple,
    Auto,
    Tasked,
}

impl SeqMode {
    /// Whether this mode executes through a recorded plan.
    pub fn is_batched(self) -> bool {
        matches!(self, SeqMode::Auto | SeqMode::Tasked)
    }
}

/// Environment operator tensors of one side of the chain, keyed by element.
#[derive(Debug, Clone)]
pub struct OperatorTensor<S: QuantumNumber> {
    basis: StateInfo<S>,
    ops: HashMap<OpElement<S>, SparseTensor<S>>,
}

impl<S: QuantumNumber> OperatorTensor<S> {
    pub fn new(basis: StateInfo<S>) -> Self {
        Self {
            basis,
            ops: HashMap::new(),
        }
    }

    pub fn basis(&self) -> &StateInfo<S> {
        &self.basis
    }

    /// Insert a zeroed operator for `elem` and return its tensor for filling.
    ///
    /// The block layout is derived from the element's delta quantum over this
    /// side's basis.
    pub fn insert(&mut self, elem: OpElement<S>) -> &mut SparseTensor<S> {
        let info = Arc::new(SparseInfo::operator_info(&self.basis, elem.q_label));
        self.ops
            .entry(elem)
            .or_insert_with(|| SparseTensor::zeros(info))
    }

    pub fn get(&self, elem: &OpElement<S>) -> Option<&SparseTensor<S>> {
        self.ops.get(elem)
    }
}

/// One bond's worth of the operator network: both environments plus the
/// column of symbolic terms. Term 0 is always the Hamiltonian.
#[derive(Debug, Clone)]
pub struct OperatorSlice<S: QuantumNumber> {
    pub left: OperatorTensor<S>,
    pub right: OperatorTensor<S>,
    terms: Vec<(OpElement<S>, OpExpr<S>)>,
}

impl<S: QuantumNumber> OperatorSlice<S> {
    /// Build a slice with the Hamiltonian as term 0.
    pub fn new(
        left: OperatorTensor<S>,
        right: OperatorTensor<S>,
        hamiltonian: OpExpr<S>,
        opdq: S,
    ) -> Self {
        Self {
            left,
            right,
            terms: vec![(OpElement::new(OpName::H, opdq), hamiltonian)],
        }
    }

    /// Append a labeled term (density-matrix elements and the like).
    pub fn push_term(&mut self, label: OpElement<S>, expr: OpExpr<S>) {
        self.terms.push((label, expr));
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, i: usize) -> &(OpElement<S>, OpExpr<S>) {
        &self.terms[i]
    }

    pub fn hamiltonian(&self) -> &OpExpr<S> {
        &self.terms[0].1
    }
}

/// One resolved block product of a recorded plan.
#[derive(Debug, Clone)]
struct GemmStep<S: QuantumNumber> {
    left: OpElement<S>,
    right: OpElement<S>,
    factor: f64,
    lconj: bool,
    rconj: bool,
    lblock: usize,
    rblock: usize,
    ket_block: usize,
    bra_block: usize,
}

#[derive(Debug, Clone)]
struct GemmPlan<S: QuantumNumber> {
    term_idx: usize,
    steps: Vec<GemmStep<S>>,
}

/// Executes block contraction and tracks flops; optionally holds a recorded
/// plan and a communicator for reducing partitioned applies.
pub struct ContractionEngine<S: QuantumNumber> {
    mode: SeqMode,
    nflop: u64,
    plan: Option<GemmPlan<S>>,
    comm: Option<Arc<dyn Communicator>>,
}

impl<S: QuantumNumber> ContractionEngine<S> {
    pub fn new(mode: SeqMode) -> Self {
        Self {
            mode,
            nflop: 0,
            plan: None,
            comm: None,
        }
    }

    pub fn with_comm(mode: SeqMode, comm: Arc<dyn Communicator>) -> Self {
        Self {
            mode,
            nflop: 0,
            plan: None,
            comm: Some(comm),
        }
    }

    pub fn mode(&self) -> SeqMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SeqMode) {
        self.mode = mode;
    }

    pub fn comm(&self) -> Option<&Arc<dyn Communicator>> {
        self.comm.as_ref()
    }

    /// Cumulative flop count since the last reset.
    pub fn nflop(&self) -> u64 {
        self.nflop
    }

    pub fn reset_nflop(&mut self) {
        self.nflop = 0;
    }

    /// Whether a recorded plan is active.
    pub fn has_plan(&self) -> bool {
        self.plan.is_some()
    }

    /// Dry-run `expr` against the connection index and record the resolved
    /// gemm sequence for `term_idx`. No data is touched.
    pub fn prepare(
        &mut self,
        term_idx: usize,
        expr: &OpExpr<S>,
        left: &OperatorTensor<S>,
        right: &OperatorTensor<S>,
        cinfo: &ConnectionIndex<S>,
    ) {
        let mut steps = Vec::new();
        for_each_block(expr, left, right, cinfo, |ctx| {
            steps.push(GemmStep {
                left: ctx.left_elem.clone(),
                right: ctx.right_elem.clone(),
                factor: ctx.factor,
                lconj: ctx.lconj,
                rconj: ctx.rconj,
                lblock: ctx.lblock,
                rblock: ctx.rblock,
                ket_block: ctx.ket_block,
                bra_block: ctx.bra_block,
            });
        });
        self.plan = Some(GemmPlan { term_idx, steps });
    }

    /// Drop the recorded plan.
    pub fn release_plan(&mut self) {
        self.plan = None;
    }

    /// `bra += factor * expr(ket)` over the connection index.
    ///
    /// When a plan recorded for the same term is active and the mode is
    /// batched, the stored gemm sequence replays with the real buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn tensor_product_multiply(
        &mut self,
        term_idx: usize,
        factor: f64,
        expr: &OpExpr<S>,
        left: &OperatorTensor<S>,
        right: &OperatorTensor<S>,
        cinfo: &ConnectionIndex<S>,
        ket: &SparseTensor<S>,
        bra: &mut SparseTensor<S>,
    ) {
        let batched = self.mode.is_batched();
        let mut nflop = 0u64;
        if let Some(plan) = self
            .plan
            .as_ref()
            .filter(|p| batched && p.term_idx == term_idx)
        {
            for step in &plan.steps {
                let lt = left.get(&step.left);
                let rt = right.get(&step.right);
                if let (Some(lt), Some(rt)) = (lt, rt) {
                    nflop += gemm_block(
                        factor * step.factor,
                        lt,
                        step.lblock,
                        step.lconj,
                        rt,
                        step.rblock,
                        step.rconj,
                        ket,
                        step.ket_block,
                        bra,
                        step.bra_block,
                    );
                }
            }
        } else {
            for_each_block(expr, left, right, cinfo, |ctx| {
                nflop += gemm_block(
                    factor * ctx.factor,
                    ctx.lten,
                    ctx.lblock,
                    ctx.lconj,
                    ctx.rten,
                    ctx.rblock,
                    ctx.rconj,
                    ket,
                    ctx.ket_block,
                    bra,
                    ctx.bra_block,
                );
            });
        }
        self.nflop += nflop;
    }

    /// `diag(l, r) += L(l, l) * R(r, r)` over the diagonal-only index.
    ///
    /// Exact only on the diagonal; consumed purely as a preconditioner.
    pub fn tensor_product_diagonal(
        &mut self,
        expr: &OpExpr<S>,
        left: &OperatorTensor<S>,
        right: &OperatorTensor<S>,
        diag_cinfo: &ConnectionIndex<S>,
        diag: &mut SparseTensor<S>,
    ) {
        let zero = S::default();
        let mut nflop = 0u64;
        for p in expr.expand() {
            if p.left_delta() != zero || p.right_delta() != zero {
                continue;
            }
            let sl = SubLabel {
                conj: p.conj,
                dl: zero,
                dr: zero,
            };
            let entries = match diag_cinfo.entries_for(&sl) {
                Some(es) => es,
                None => continue,
            };
            let (lt, rt) = match (left.get(&p.left), right.get(&p.right)) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            for e in entries {
                // zero delta means the operator blocks are the square
                // diagonal blocks of each side
                let lb = match lt.info.find_block(e.lq.0, e.lq.1) {
                    Some(b) => b,
                    None => continue,
                };
                let rb = match rt.info.find_block(e.rq.0, e.rq.1) {
                    Some(b) => b,
                    None => continue,
                };
                let lblk = lt.block(lb);
                let rblk = rt.block(rb);
                let out_entry = *diag.info.block(e.bra_block);
                let (rows, cols) = (out_entry.rows, out_entry.cols);
                let out = diag.block_mut(e.bra_block);
                for a in 0..rows {
                    let lv = lblk[a * rows + a];
                    for b in 0..cols {
                        out[a * cols + b] += p.factor * lv * rblk[b * cols + b];
                    }
                }
                nflop += 2 * (rows * cols) as u64;
            }
        }
        self.nflop += nflop;
    }

    /// One-sided contraction for the noise path: with `trace_right` only the
    /// left factor acts (`out(l+dl, r) += L * ket`), otherwise only the right
    /// factor acts (`out(l, r+dr) += ket * R^T`).
    #[allow(clippy::too_many_arguments)]
    pub fn tensor_product_partial_multiply(
        &mut self,
        trace_right: bool,
        factor: f64,
        lten: Option<&SparseTensor<S>>,
        rten: Option<&SparseTensor<S>>,
        conj: u8,
        cinfo: &ConnectionIndex<S>,
        ket: &SparseTensor<S>,
        out: &mut SparseTensor<S>,
    ) {
        let mut nflop = 0u64;
        for (_, entries) in cinfo.groups() {
            for e in entries {
                let kentry = *ket.info.block(e.ket_block);
                let oentry = *out.info.block(e.bra_block);
                if trace_right {
                    let lt = match lten {
                        Some(t) => t,
                        None => continue,
                    };
                    let lconj = conj & 1 != 0;
                    let lb = if lconj {
                        lt.info.find_block(e.lq.1, e.lq.0)
                    } else {
                        lt.info.find_block(e.lq.0, e.lq.1)
                    };
                    let lb = match lb {
                        Some(b) => b,
                        None => continue,
                    };
                    let lblk = lt.block(lb);
                    let kblk = ket.block(e.ket_block);
                    let oblk = out.block_mut(e.bra_block);
                    // out(i, c) += f * L(i, a) * ket(a, c)
                    for i in 0..oentry.rows {
                        for a in 0..kentry.rows {
                            let lv = if lconj {
                                lblk[a * oentry.rows + i]
                            } else {
                                lblk[i * kentry.rows + a]
                            };
                            if lv == 0.0 {
                                continue;
                            }
                            for c in 0..kentry.cols {
                                oblk[i * oentry.cols + c] +=
                                    factor * lv * kblk[a * kentry.cols + c];
                            }
                        }
                    }
                    nflop += 2 * (oentry.rows * kentry.rows * kentry.cols) as u64;
                } else {
                    let rt = match rten {
                        Some(t) => t,
                        None => continue,
                    };
                    let rconj = conj & 2 != 0;
                    let rb = if rconj {
                        rt.info.find_block(e.rq.1, e.rq.0)
                    } else {
                        rt.info.find_block(e.rq.0, e.rq.1)
                    };
                    let rb = match rb {
                        Some(b) => b,
                        None => continue,
                    };
                    let rblk = rt.block(rb);
                    let kblk = ket.block(e.ket_block);
                    let oblk = out.block_mut(e.bra_block);
                    // out(a, j) += f * ket(a, b) * R(j, b)
                    for a in 0..kentry.rows {
                        for j in 0..oentry.cols {
                            let mut acc = 0.0;
                            for b in 0..kentry.cols {
                                let rv = if rconj {
                                    rblk[b * oentry.cols + j]
                                } else {
                                    rblk[j * kentry.cols + b]
                                };
                                acc += kblk[a * kentry.cols + b] * rv;
                            }
                            oblk[a * oentry.cols + j] += factor * acc;
                        }
                    }
                    nflop += 2 * (kentry.rows * kentry.cols * oentry.cols) as u64;
                }
            }
        }
        self.nflop += nflop;
    }
}

/// Resolved context for one block product, handed to the traversal callback.
struct BlockCtx<'a, S: QuantumNumber> {
    left_elem: &'a OpElement<S>,
    right_elem: &'a OpElement<S>,
    lten: &'a SparseTensor<S>,
    rten: &'a SparseTensor<S>,
    factor: f64,
    lconj: bool,
    rconj: bool,
    lblock: usize,
    rblock: usize,
    ket_block: usize,
    bra_block: usize,
}

/// Walk every resolvable block product of `expr` over the connection index.
fn for_each_block<S: QuantumNumber>(
    expr: &OpExpr<S>,
    left: &OperatorTensor<S>,
    right: &OperatorTensor<S>,
    cinfo: &ConnectionIndex<S>,
    mut f: impl FnMut(BlockCtx<'_, S>),
) {
    for p in expr.expand() {
        if p.factor == 0.0 || p.left.name == OpName::Zero || p.right.name == OpName::Zero {
            continue;
        }
        let sl = SubLabel {
            conj: p.conj,
            dl: p.left_delta(),
            dr: p.right_delta(),
        };
        let entries = match cinfo.entries_for(&sl) {
            Some(es) => es,
            None => continue,
        };
        let (lt, rt) = match (left.get(&p.left), right.get(&p.right)) {
            (Some(l), Some(r)) => (l, r),
            _ => continue,
        };
        let lconj = p.conj & 1 != 0;
        let rconj = p.conj & 2 != 0;
        for e in entries {
            let lb = if lconj {
                lt.info.find_block(e.lq.1, e.lq.0)
            } else {
                lt.info.find_block(e.lq.0, e.lq.1)
            };
            let rb = if rconj {
                rt.info.find_block(e.rq.1, e.rq.0)
            } else {
                rt.info.find_block(e.rq.0, e.rq.1)
            };
            if let (Some(lb), Some(rb)) = (lb, rb) {
                f(BlockCtx {
                    left_elem: &p.left,
                    right_elem: &p.right,
                    lten: lt,
                    rten: rt,
                    factor: p.factor,
                    lconj,
                    rconj,
                    lblock: lb,
                    rblock: rb,
                    ket_block: e.ket_block,
                    bra_block: e.bra_block,
                });
            }
        }
    }
}

/// `bra_block += f * Llog * ket_block * Rlog^T` where `Llog` is the left
/// operator block (transposed when `lconj`) and `Rlog` the right one
/// (transposed when `rconj`). Returns the flop count of the two products.
#[allow(clippy::too_many_arguments)]
fn gemm_block<S: QuantumNumber>(
    f: f64,
    lt: &SparseTensor<S>,
    lblock: usize,
    lconj: bool,
    rt: &SparseTensor<S>,
    rblock: usize,
    rconj: bool,
    ket: &SparseTensor<S>,
    ket_block: usize,
    bra: &mut SparseTensor<S>,
    bra_block: usize,
) -> u64 {
    let kentry = *ket.info.block(ket_block);
    let bentry = *bra.info.block(bra_block);
    let (in_rows, in_cols) = (kentry.rows, kentry.cols);
    let (out_rows, out_cols) = (bentry.rows, bentry.cols);

    let lblk = lt.block(lblock);
    let rblk = rt.block(rblock);
    let kblk = ket.block(ket_block);

    // tmp(a, j) = sum_b ket(a, b) * Rlog(j, b)
    let mut tmp = vec![0.0; in_rows * out_cols];
    for a in 0..in_rows {
        for j in 0..out_cols {
            let mut acc = 0.0;
            for b in 0..in_cols {
                let rv = if rconj {
                    // stored (in_cols x out_cols), logical value R(j, b)
                    rblk[b * out_cols + j]
                } else {
                    // stored (out_cols x in_cols)
                    rblk[j * in_cols + b]
                };
                acc += kblk[a * in_cols + b] * rv;
            }
            tmp[a * out_cols + j] = acc;
        }
    }

    // bra(i, j) += f * Llog(i, a) * tmp(a, j)
    let bblk = bra.block_mut(bra_block);
    for i in 0..out_rows {
        for a in 0..in_rows {
            let lv = if lconj {
                // stored (in_rows x out_rows), logical value L(i, a)
                lblk[a * out_rows + i]
            } else {
                // stored (out_rows x in_rows)
                lblk[i * in_rows + a]
            };
            if lv == 0.0 {
                continue;
            }
            let flv = f * lv;
            for j in 0..out_cols {
                bblk[i * out_cols + j] += flv * tmp[a * out_cols + j];
            }
        }
    }

    2 * (in_rows * in_cols * out_cols) as u64 + 2 * (out_rows * in_rows * out_cols) as u64
}

/// Scoped execution-mode override: sets the mode on construction and restores
/// the previous one when dropped, on every exit path.
pub struct ModeGuard<'a, S: QuantumNumber> {
    engine: &'a mut ContractionEngine<S>,
    saved: SeqMode,
}

impl<'a, S: QuantumNumber> ModeGuard<'a, S> {
    pub fn new(engine: &'a mut ContractionEngine<S>, mode: SeqMode) -> Self {
        let saved = engine.mode();
        engine.set_mode(mode);
        Self { engine, saved }
    }
}

impl<S: QuantumNumber> Deref for ModeGuard<'_, S> {
    type Target = ContractionEngine<S>;

    fn deref(&self) -> &Self::Target {
        self.engine
    }
}

impl<S: QuantumNumber> DerefMut for ModeGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine
    }
}

impl<S: QuantumNumber> Drop for ModeGuard<'_, S> {
    fn drop(&mut self) {
        self.engine.set_mode(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweepham_core::connection::uniq_sub_labels;
    use sweepham_core::{OpProduct, SzQ};

    fn basis() -> StateInfo<SzQ> {
        StateInfo::new(vec![(SzQ::new(0, 0), 1), (SzQ::new(1, 1), 1)])
    }

    /// Identity (x) identity over a 2-sector basis pair.
    fn identity_slice() -> OperatorSlice<SzQ> {
        let mut left = OperatorTensor::new(basis());
        let mut right = OperatorTensor::new(basis());
        let ident = OpElement::new(OpName::I, SzQ::default());
        {
            let t = left.insert(ident.clone());
            for i in 0..t.info.n_blocks() {
                t.block_mut(i)[0] = 1.0;
            }
        }
        {
            let t = right.insert(ident.clone());
            for i in 0..t.info.n_blocks() {
                t.block_mut(i)[0] = 1.0;
            }
        }
        let h = OpExpr::Prod(OpProduct {
            factor: 1.0,
            left: ident.clone(),
            right: ident,
            conj: 0,
        });
        OperatorSlice::new(left, right, h, SzQ::default())
    }

    #[test]
    fn test_identity_multiply_is_identity() {
        let slice = identity_slice();
        let wfn_info = Arc::new(SparseInfo::wavefunction_info(
            &basis(),
            &basis(),
            SzQ::new(1, 1),
        ));
        let labels = uniq_sub_labels(slice.hamiltonian());
        let cinfo = ConnectionIndex::initialize_wfn(&wfn_info, &wfn_info, &labels);
        let mut ket = SparseTensor::zeros(wfn_info.clone());
        ket.data_mut().copy_from_slice(&[0.3, -1.2]);
        let mut bra = SparseTensor::zeros(wfn_info);
        let mut engine = ContractionEngine::new(SeqMode::None);
        engine.tensor_product_multiply(
            0,
            2.0,
            slice.hamiltonian(),
            &slice.left,
            &slice.right,
            &cinfo,
            &ket,
            &mut bra,
        );
        assert_eq!(bra.data(), &[0.6, -2.4]);
        assert!(engine.nflop() > 0);
    }

    #[test]
    fn test_plan_replay_matches_direct() {
        let slice = identity_slice();
        let wfn_info = Arc::new(SparseInfo::wavefunction_info(
            &basis(),
            &basis(),
            SzQ::new(1, 1),
        ));
        let labels = uniq_sub_labels(slice.hamiltonian());
        let cinfo = ConnectionIndex::initialize_wfn(&wfn_info, &wfn_info, &labels);
        let mut ket = SparseTensor::zeros(wfn_info.clone());
        ket.data_mut().copy_from_slice(&[1.0, 2.0]);

        let mut direct = SparseTensor::zeros(wfn_info.clone());
        let mut engine = ContractionEngine::new(SeqMode::Auto);
        engine.tensor_product_multiply(
            0,
            1.0,
            slice.hamiltonian(),
            &slice.left,
            &slice.right,
            &cinfo,
            &ket,
            &mut direct,
        );

        engine.prepare(0, slice.hamiltonian(), &slice.left, &slice.right, &cinfo);
        assert!(engine.has_plan());
        let mut replayed = SparseTensor::zeros(wfn_info);
        engine.tensor_product_multiply(
            0,
            1.0,
            slice.hamiltonian(),
            &slice.left,
            &slice.right,
            &cinfo,
            &ket,
            &mut replayed,
        );
        assert_eq!(direct.data(), replayed.data());
        engine.release_plan();
        assert!(!engine.has_plan());
    }

    #[test]
    fn test_diagonal_matches_full_apply_on_basis_vectors() {
        let slice = identity_slice();
        let wfn_info = Arc::new(SparseInfo::wavefunction_info(
            &basis(),
            &basis(),
            SzQ::new(1, 1),
        ));
        let labels = uniq_sub_labels(slice.hamiltonian());
        let dinfo = ConnectionIndex::initialize_diag(&wfn_info, &labels);
        let mut diag = SparseTensor::zeros(wfn_info);
        let mut engine = ContractionEngine::new(SeqMode::None);
        engine.tensor_product_diagonal(
            slice.hamiltonian(),
            &slice.left,
            &slice.right,
            &dinfo,
            &mut diag,
        );
        assert_eq!(diag.data(), &[1.0, 1.0]);
    }

    #[test]
    fn test_mode_guard_restores_on_drop() {
        let mut engine: ContractionEngine<SzQ> = ContractionEngine::new(SeqMode::Auto);
        {
            let guard = ModeGuard::new(&mut engine, SeqMode::Simple);
            assert_eq!(guard.mode(), SeqMode::Simple);
        }
        assert_eq!(engine.mode(), SeqMode::Auto);
    }
}
