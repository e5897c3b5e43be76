//! The effective Hamiltonian of one sweep step.
//!
//! Construction builds the connection index (and optionally the diagonal
//! preconditioner) for one bra/ket pair; every solve entry point is then a
//! sequence of matrix-free applies driven through that index. The sector
//! tables and the operator slice are borrowed from the caller and must
//! outlive the instance; the connection index and diagonal are owned and
//! released exactly once, in reverse order of construction, by
//! [`EffectiveHamiltonian::deallocate`].

use std::time::Instant;

use anyhow::Result;
use sweepham_core::connection::uniq_sub_labels;
use sweepham_core::{
    ArenaSlot, ConnectionIndex, OpElement, OpName, QuantumNumber, SparseTensor, StackArena,
    StateInfo, SubLabel,
};
use sweepham_krylov::{
    davidson, expo_apply, minres, DavidsonOptions, ExpoOptions, MinresOptions,
};

use crate::engine::{ContractionEngine, ModeGuard, OperatorSlice, SeqMode};
use crate::parallel::ParallelRule;

/// Fixed stage offsets of the 4-stage Runge-Kutta scheme.
const RK4_KS: [f64; 4] = [0.0, 0.5, 0.5, 1.0];
/// Combination weights of the three output stages (at 1/3, 2/3 and 1 of the
/// step).
const RK4_CS: [[f64; 4]; 3] = [
    [31.0 / 162.0, 14.0 / 162.0, 14.0 / 162.0, -5.0 / 162.0],
    [16.0 / 81.0, 20.0 / 81.0, 20.0 / 81.0, -2.0 / 81.0],
    [1.0 / 6.0, 2.0 / 6.0, 2.0 / 6.0, 1.0 / 6.0],
];

/// The local Hamiltonian restricted to the active sites, applied matrix-free.
pub struct EffectiveHamiltonian<'a, S: QuantumNumber> {
    pub(crate) left_basis: &'a StateInfo<S>,
    pub(crate) right_basis: &'a StateInfo<S>,
    pub(crate) op: &'a OperatorSlice<S>,
    /// Output-side state.
    pub bra: SparseTensor<S>,
    /// Input-side state; eigensolves and propagators update it in place.
    pub ket: SparseTensor<S>,
    pub(crate) opdq: S,
    pub(crate) engine: ContractionEngine<S>,
    pub(crate) cinfo: ConnectionIndex<S>,
    diag: Option<SparseTensor<S>>,
    arena: StackArena,
    cinfo_slot: Option<ArenaSlot>,
    diag_slot: Option<ArenaSlot>,
    deallocated: bool,
}

impl<'a, S: QuantumNumber> EffectiveHamiltonian<'a, S> {
    /// Build the operator for one bra/ket pair.
    ///
    /// The connection index covers the sub-labels of every term in the slice
    /// so expectation terms can reuse it. With `compute_diag` the diagonal is
    /// filled through a diagonal-only contraction pass.
    ///
    /// # Panics
    ///
    /// Panics if `compute_diag` is set and bra and ket do not share the same
    /// sector structure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left_basis: &'a StateInfo<S>,
        right_basis: &'a StateInfo<S>,
        op: &'a OperatorSlice<S>,
        bra: SparseTensor<S>,
        ket: SparseTensor<S>,
        opdq: S,
        mut engine: ContractionEngine<S>,
        compute_diag: bool,
    ) -> Self {
        if compute_diag {
            assert!(
                bra.info == ket.info,
                "bra and ket must share sector structure when a diagonal is requested"
            );
        }
        let mut sub_labels: Vec<SubLabel<S>> = Vec::new();
        for i in 0..op.n_terms() {
            sub_labels.extend(uniq_sub_labels(&op.term(i).1));
        }
        sub_labels.sort();
        sub_labels.dedup();

        let mut arena = StackArena::new();
        let cinfo = ConnectionIndex::initialize_wfn(&ket.info, &bra.info, &sub_labels);
        let cinfo_slot = Some(arena.alloc(cinfo.n_entries()));

        let (diag, diag_slot) = if compute_diag {
            let diag_cinfo = ConnectionIndex::initialize_diag(&ket.info, &sub_labels);
            let mut diag = SparseTensor::zeros(ket.info.clone());
            engine.tensor_product_diagonal(
                op.hamiltonian(),
                &op.left,
                &op.right,
                &diag_cinfo,
                &mut diag,
            );
            let slot = arena.alloc(diag.data().len());
            (Some(diag), Some(slot))
        } else {
            (None, None)
        };

        Self {
            left_basis,
            right_basis,
            op,
            bra,
            ket,
            opdq,
            engine,
            cinfo,
            diag,
            arena,
            cinfo_slot,
            diag_slot,
            deallocated: false,
        }
    }

    pub fn engine(&self) -> &ContractionEngine<S> {
        &self.engine
    }

    pub fn diag(&self) -> Option<&SparseTensor<S>> {
        self.diag.as_ref()
    }

    /// Number of operator strings the Hamiltonian carries across the bond.
    pub fn get_mpo_bond_dimension(&self) -> usize {
        self.op.hamiltonian().bond_dimension()
    }

    /// `output += factor * Term[term_idx] * input`.
    ///
    /// With `reduce` the output buffer is summed across processes; pass
    /// `false` to batch several terms before reducing once.
    ///
    /// # Panics
    ///
    /// Panics if the buffers do not match the connection index's layouts.
    pub fn apply(
        &mut self,
        input: &SparseTensor<S>,
        output: &mut SparseTensor<S>,
        term_idx: usize,
        factor: f64,
        reduce: bool,
    ) {
        assert_eq!(
            input.data().len(),
            self.ket.data().len(),
            "input buffer does not match the ket layout"
        );
        assert_eq!(
            output.data().len(),
            self.bra.data().len(),
            "output buffer does not match the bra layout"
        );
        Self::apply_impl(
            &mut self.engine,
            self.op,
            &self.cinfo,
            input,
            output,
            term_idx,
            factor,
            reduce,
        );
    }

    /// Apply against explicitly split borrows, so solves can hold the engine
    /// through a mode guard while reading other fields.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_impl(
        engine: &mut ContractionEngine<S>,
        op: &OperatorSlice<S>,
        cinfo: &ConnectionIndex<S>,
        input: &SparseTensor<S>,
        output: &mut SparseTensor<S>,
        term_idx: usize,
        factor: f64,
        reduce: bool,
    ) {
        let (_, expr) = op.term(term_idx);
        if !expr.is_zero() {
            engine.tensor_product_multiply(
                term_idx, factor, expr, &op.left, &op.right, cinfo, input, output,
            );
        }
        if reduce {
            if let Some(comm) = engine.comm().cloned() {
                comm.all_reduce_sum(output.data_mut());
            }
        }
    }

    /// Record the batched plan for the Hamiltonian term.
    ///
    /// In the batched modes a dry run resolves the block-gemm sequence once;
    /// every apply until [`Self::post_precompute`] replays it.
    pub fn precompute(&mut self) {
        if self.engine.mode().is_batched() {
            self.engine.prepare(
                0,
                self.op.hamiltonian(),
                &self.op.left,
                &self.op.right,
                &self.cinfo,
            );
        }
    }

    /// Drop the batched plan recorded by [`Self::precompute`].
    pub fn post_precompute(&mut self) {
        self.engine.release_plan();
    }

    /// Lowest eigenpair by Davidson iteration; the ket becomes the
    /// eigenvector. Returns `(energy, ndav, nflop, time)`.
    ///
    /// # Panics
    ///
    /// Panics if no diagonal was requested at construction.
    pub fn eigs(&mut self, options: &DavidsonOptions) -> Result<(f64, usize, u64, f64)> {
        let diag_data = match &self.diag {
            Some(d) => d.data().to_vec(),
            None => panic!("eigs requires a diagonal built at construction"),
        };
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();

        let mut vectors = vec![self.ket.data().to_vec()];
        let res = {
            let engine = &mut self.engine;
            let op = self.op;
            let cinfo = &self.cinfo;
            let mut inp = SparseTensor::zeros(self.ket.info.clone());
            let mut out = SparseTensor::zeros(self.bra.info.clone());
            let op_fn = |x: &[f64], y: &mut [f64]| {
                inp.data_mut().copy_from_slice(x);
                out.clear();
                Self::apply_impl(engine, op, cinfo, &inp, &mut out, 0, 1.0, true);
                for (yi, oi) in y.iter_mut().zip(out.data().iter()) {
                    *yi += *oi;
                }
            };
            davidson(op_fn, &diag_data, &mut vectors, options)?
        };
        self.ket.data_mut().copy_from_slice(&vectors[0]);
        self.post_precompute();
        let nflop = self.reduced_nflop();
        Ok((
            res.eigenvalues[0],
            res.iterations,
            nflop,
            start.elapsed().as_secs_f64(),
        ))
    }

    /// One forward application `bra = (H + const_e) * ket`. Returns
    /// `(norm, nmult, nflop, time)`.
    ///
    /// A single apply cannot amortize a recorded plan, so `Auto` mode is
    /// downgraded to `Simple` for the duration of the call.
    pub fn multiply(&mut self, const_e: f64) -> (f64, usize, u64, f64) {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.bra.clear();
        {
            let downgrade = match self.engine.mode() {
                SeqMode::Auto => SeqMode::Simple,
                other => other,
            };
            let mut guard = ModeGuard::new(&mut self.engine, downgrade);
            Self::apply_impl(
                &mut guard,
                self.op,
                &self.cinfo,
                &self.ket,
                &mut self.bra,
                0,
                1.0,
                true,
            );
        }
        if const_e != 0.0 {
            self.bra.iadd(&self.ket, const_e);
        }
        let norm = self.bra.norm();
        let nflop = self.reduced_nflop();
        (norm, 1, nflop, start.elapsed().as_secs_f64())
    }

    /// Per-term expectation values `<bra|Term[i]|ket>`.
    ///
    /// Zero terms are omitted from the returned list; terms whose delta
    /// quantum differs from the operator's cannot contribute and appear as an
    /// explicit `0.0` without an apply. With a rule, each term is evaluated
    /// only by its owner and the per-term results are merged through one sum
    /// reduction, preserving term order. Returns `(expectations, nflop,
    /// time)`.
    pub fn expect(
        &mut self,
        const_e: f64,
        rule: Option<&ParallelRule<S>>,
    ) -> (Vec<(OpElement<S>, f64)>, u64, f64) {
        let start = Instant::now();
        self.engine.reset_nflop();
        let mut values = vec![0.0; self.op.n_terms()];
        {
            let downgrade = match self.engine.mode() {
                SeqMode::Auto => SeqMode::Simple,
                other => other,
            };
            let mut guard = ModeGuard::new(&mut self.engine, downgrade);
            let mut btmp = SparseTensor::zeros(self.bra.info.clone());
            for i in 0..self.op.n_terms() {
                let (label, expr) = self.op.term(i);
                if expr.is_zero() {
                    continue;
                }
                if label.q_label != self.opdq {
                    continue;
                }
                if let Some(rule) = rule {
                    if !rule.own_term(label) {
                        continue;
                    }
                }
                btmp.clear();
                Self::apply_impl(
                    &mut guard,
                    self.op,
                    &self.cinfo,
                    &self.ket,
                    &mut btmp,
                    i,
                    1.0,
                    false,
                );
                let mut v = btmp.dot(&self.bra);
                if label.name == OpName::H {
                    v += const_e * self.bra.dot(&self.ket);
                }
                values[i] = v;
            }
        }
        if let Some(rule) = rule {
            rule.comm().all_reduce_sum(&mut values);
        }
        let nflop = self.reduced_nflop();
        let expectations = (0..self.op.n_terms())
            .filter(|&i| !self.op.term(i).1.is_zero())
            .map(|i| (self.op.term(i).0.clone(), values[i]))
            .collect();
        (expectations, nflop, start.elapsed().as_secs_f64())
    }

    /// Green's function `<ket| (H + const_e + omega + i*eta)^{-1} |ket>` for
    /// a real operator, via conjugate gradient on the squared resolvent
    /// `(H + const_e + omega)^2 + eta^2`. The bra receives the real part of
    /// the solution; the imaginary part comes back as its own tensor.
    /// Returns `((re, im), imag_wfn, nmult, nflop, time)`.
    pub fn greens_function(
        &mut self,
        const_e: f64,
        omega: f64,
        eta: f64,
        options: &sweepham_krylov::CgOptions,
    ) -> Result<((f64, f64), SparseTensor<S>, usize, u64, f64)> {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let shift = const_e + omega;
        let b = self.ket.data().to_vec();
        let mut y = self.bra.data().to_vec();
        // Jacobi preconditioner of the squared shifted operator
        let precond: Option<Vec<f64>> = self.diag.as_ref().map(|d| {
            d.data()
                .iter()
                .map(|&x| (x + shift) * (x + shift) + eta * eta)
                .collect()
        });

        let res = {
            let engine = &mut self.engine;
            let op = self.op;
            let cinfo = &self.cinfo;
            let mut t0 = SparseTensor::zeros(self.ket.info.clone());
            let mut t1 = SparseTensor::zeros(self.ket.info.clone());
            let mut t2 = SparseTensor::zeros(self.ket.info.clone());
            let eta2 = eta * eta;
            let op_fn = |x: &[f64], out: &mut [f64]| {
                t0.data_mut().copy_from_slice(x);
                t1.clear();
                Self::apply_impl(engine, op, cinfo, &t0, &mut t1, 0, 1.0, true);
                t1.iadd(&t0, shift);
                t2.clear();
                Self::apply_impl(engine, op, cinfo, &t1, &mut t2, 0, 1.0, true);
                t2.iadd(&t1, shift);
                for i in 0..out.len() {
                    out[i] += t2.data()[i] + eta2 * t0.data()[i];
                }
            };
            sweepham_krylov::conjugate_gradient(op_fn, precond.as_deref(), &mut y, &b, options)?
        };

        // real part of the solution: (H + shift) y
        let yt = SparseTensor::from_data(self.ket.info.clone(), y)?;
        self.bra.clear();
        Self::apply_impl(
            &mut self.engine,
            self.op,
            &self.cinfo,
            &yt,
            &mut self.bra,
            0,
            1.0,
            true,
        );
        self.bra.iadd(&yt, shift);

        // imaginary part of the solution: -eta y
        let mut imag = yt;
        imag.iscale(-eta);

        let igf = imag.dot(&self.ket);
        let rgf = self.bra.dot(&self.ket);
        self.post_precompute();
        let nflop = self.reduced_nflop();
        Ok((
            (rgf, igf),
            imag,
            2 * res.n_ops + 1,
            nflop,
            start.elapsed().as_secs_f64(),
        ))
    }

    /// Solve `(H + const_e) x = ket` by MINRES; the bra receives the
    /// solution. Returns `(energy, nmult, nflop, time)` with
    /// `energy = <x, ket> / <x, x>`.
    pub fn inverse_multiply(
        &mut self,
        const_e: f64,
        options: &MinresOptions,
    ) -> Result<(f64, usize, u64, f64)> {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let opts = options.clone().with_shift(const_e);
        let b = self.ket.data().to_vec();
        let mut x = self.bra.data().to_vec();
        let res = {
            let engine = &mut self.engine;
            let op = self.op;
            let cinfo = &self.cinfo;
            let mut inp = SparseTensor::zeros(self.ket.info.clone());
            let mut out = SparseTensor::zeros(self.bra.info.clone());
            let op_fn = |v: &[f64], y: &mut [f64]| {
                inp.data_mut().copy_from_slice(v);
                out.clear();
                Self::apply_impl(engine, op, cinfo, &inp, &mut out, 0, 1.0, true);
                for (yi, oi) in y.iter_mut().zip(out.data().iter()) {
                    *yi += *oi;
                }
            };
            minres(op_fn, &mut x, &b, &opts)?
        };
        self.bra.data_mut().copy_from_slice(&x);
        let xx = self.bra.dot(&self.bra);
        let energy = if xx > 0.0 { self.bra.dot(&self.ket) / xx } else { 0.0 };
        self.post_precompute();
        let nflop = self.reduced_nflop();
        Ok((energy, res.n_ops, nflop, start.elapsed().as_secs_f64()))
    }

    /// `ket <- exp(beta * (H + const_e)) ket` via the Krylov exponential.
    /// Returns `((norm, energy), nmult, nflop, time)` with the Rayleigh
    /// quotient of the propagated ket as the energy estimate.
    ///
    /// When a diagonal was built at construction, its shifted norm bounds
    /// the substep size of the Krylov propagation.
    pub fn expo_apply(
        &mut self,
        beta: f64,
        const_e: f64,
        options: &ExpoOptions,
    ) -> Result<((f64, f64), usize, u64, f64)> {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let mut opts = options.clone().with_shift(const_e);
        if let Some(d) = &self.diag {
            let anorm = d
                .data()
                .iter()
                .map(|&x| (x + const_e) * (x + const_e))
                .sum::<f64>()
                .sqrt();
            opts = opts.with_anorm(anorm);
        }
        let mut v = self.ket.data().to_vec();
        let res = {
            let engine = &mut self.engine;
            let op = self.op;
            let cinfo = &self.cinfo;
            let mut inp = SparseTensor::zeros(self.ket.info.clone());
            let mut out = SparseTensor::zeros(self.bra.info.clone());
            let op_fn = |x: &[f64], y: &mut [f64]| {
                inp.data_mut().copy_from_slice(x);
                out.clear();
                Self::apply_impl(engine, op, cinfo, &inp, &mut out, 0, 1.0, true);
                for (yi, oi) in y.iter_mut().zip(out.data().iter()) {
                    *yi += *oi;
                }
            };
            expo_apply(op_fn, beta, &mut v, &opts)?
        };
        self.ket.data_mut().copy_from_slice(&v);
        let energy = self.rayleigh_quotient();
        self.post_precompute();
        let nflop = self.reduced_nflop();
        Ok((
            (res.norm, energy),
            res.n_ops + 1,
            nflop,
            start.elapsed().as_secs_f64(),
        ))
    }

    /// Fourth-order Runge-Kutta step `ket <- ~exp(beta * (H + const_e)) ket`.
    ///
    /// Returns the three combined stage states (at 1/3, 2/3 and 1 of the
    /// step, each rescaled by `exp(beta * (i+1)/3 * const_e)`), the final
    /// norm, the optional energy estimate, and the usual counters:
    /// `(stages, norm, energy, nmult, nflop, time)`.
    pub fn rk4_apply(
        &mut self,
        beta: f64,
        const_e: f64,
        eval_energy: bool,
    ) -> (Vec<SparseTensor<S>>, f64, f64, usize, u64, f64) {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let mut k0 = SparseTensor::zeros(self.ket.info.clone());
        Self::apply_impl(
            &mut self.engine,
            self.op,
            &self.cinfo,
            &self.ket,
            &mut k0,
            0,
            beta,
            true,
        );
        let (stages, norm, energy, nmult) = self.rk4_stages(beta, const_e, &k0, eval_energy);
        self.post_precompute();
        let nflop = self.reduced_nflop();
        (
            stages,
            norm,
            energy,
            nmult + 1,
            nflop,
            start.elapsed().as_secs_f64(),
        )
    }

    /// First Runge-Kutta stage `beta * H * ket`, kept separate so a
    /// time-step-targeting sweep can reuse it. Returns
    /// `(hket, norm, nmult, nflop, time)`.
    pub fn first_rk4_apply(&mut self, beta: f64) -> (SparseTensor<S>, f64, usize, u64, f64) {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let mut hket = SparseTensor::zeros(self.ket.info.clone());
        Self::apply_impl(
            &mut self.engine,
            self.op,
            &self.cinfo,
            &self.ket,
            &mut hket,
            0,
            beta,
            true,
        );
        self.post_precompute();
        let norm = hket.norm();
        let nflop = self.reduced_nflop();
        (hket, norm, 1, nflop, start.elapsed().as_secs_f64())
    }

    /// Complete a Runge-Kutta step from a previously computed first stage.
    /// Same outputs as [`Self::rk4_apply`].
    pub fn second_rk4_apply(
        &mut self,
        beta: f64,
        const_e: f64,
        hket: &SparseTensor<S>,
        eval_energy: bool,
    ) -> (Vec<SparseTensor<S>>, f64, f64, usize, u64, f64) {
        let start = Instant::now();
        self.engine.reset_nflop();
        self.precompute();
        let (stages, norm, energy, nmult) = self.rk4_stages(beta, const_e, hket, eval_energy);
        self.post_precompute();
        let nflop = self.reduced_nflop();
        (
            stages,
            norm,
            energy,
            nmult,
            nflop,
            start.elapsed().as_secs_f64(),
        )
    }

    /// Stages 2..4 plus the combined outputs; `k0` already carries `beta`.
    fn rk4_stages(
        &mut self,
        beta: f64,
        const_e: f64,
        k0: &SparseTensor<S>,
        eval_energy: bool,
    ) -> (Vec<SparseTensor<S>>, f64, f64, usize) {
        let v = self.ket.clone();
        let mut k: Vec<SparseTensor<S>> = vec![k0.clone()];
        let mut nmult = 0usize;
        for i in 1..4 {
            let mut arg = v.clone();
            arg.iadd(&k[i - 1], RK4_KS[i]);
            let mut ki = SparseTensor::zeros(self.ket.info.clone());
            Self::apply_impl(
                &mut self.engine,
                self.op,
                &self.cinfo,
                &arg,
                &mut ki,
                0,
                beta,
                true,
            );
            k.push(ki);
            nmult += 1;
        }
        let mut stages = Vec::with_capacity(3);
        for (i, cs) in RK4_CS.iter().enumerate() {
            let mut r = v.clone();
            for (j, &c) in cs.iter().enumerate() {
                r.iadd(&k[j], c);
            }
            r.iscale((beta * (i as f64 + 1.0) / 3.0 * const_e).exp());
            stages.push(r);
        }
        self.ket.copy_from(&stages[2]);
        let norm = self.ket.norm();
        let energy = if eval_energy {
            nmult += 1;
            self.rayleigh_quotient()
        } else {
            0.0
        };
        (stages, norm, energy, nmult)
    }

    /// `<ket|H|ket> / <ket|ket>` through one reduced apply.
    fn rayleigh_quotient(&mut self) -> f64 {
        let mut hk = SparseTensor::zeros(self.ket.info.clone());
        Self::apply_impl(
            &mut self.engine,
            self.op,
            &self.cinfo,
            &self.ket,
            &mut hk,
            0,
            1.0,
            true,
        );
        let kk = self.ket.dot(&self.ket);
        if kk > 0.0 {
            hk.dot(&self.ket) / kk
        } else {
            0.0
        }
    }

    /// Flop counter, summed across processes when a communicator is present.
    pub(crate) fn reduced_nflop(&self) -> u64 {
        let nflop = self.engine.nflop();
        match self.engine.comm() {
            Some(comm) => comm.all_reduce_sum_u64(nflop),
            None => nflop,
        }
    }

    /// One-sided Hamiltonian contraction into a group of target-sector
    /// states, used to enlarge the local basis between sweep steps. See
    /// [`crate::noise`] for the fuse and reduction semantics.
    #[allow(clippy::too_many_arguments)]
    pub fn perturbative_noise(
        &mut self,
        trace_right: bool,
        i_l: usize,
        i_r: usize,
        fuse_type: crate::noise::FuseType,
        mps_info: &sweepham_core::MpsInfo<S>,
        noise_type: crate::noise::NoiseType,
        rule: Option<&ParallelRule<S>>,
    ) -> sweepham_core::SparseTensorGroup<S> {
        crate::noise::perturbative_noise(
            self, trace_right, i_l, i_r, fuse_type, mps_info, noise_type, rule,
        )
    }

    /// Split borrows for the specialized solves in other modules.
    pub(crate) fn split(
        &mut self,
    ) -> (
        &mut ContractionEngine<S>,
        &'a OperatorSlice<S>,
        &ConnectionIndex<S>,
    ) {
        (&mut self.engine, self.op, &self.cinfo)
    }

    /// Release the diagonal and the connection index, in reverse order of
    /// construction.
    ///
    /// # Panics
    ///
    /// Panics when called twice.
    pub fn deallocate(&mut self) {
        assert!(!self.deallocated, "deallocate called twice");
        if let Some(slot) = self.diag_slot.take() {
            self.arena.release(slot);
            self.diag = None;
        }
        if let Some(slot) = self.cinfo_slot.take() {
            self.arena.release(slot);
        }
        self.deallocated = true;
    }
}
