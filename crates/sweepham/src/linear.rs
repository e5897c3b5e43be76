//! Scalar linear combinations of effective Hamiltonians.
//!
//! A wrapper over an ordered list of `(operator, coefficient)` pairs exposing
//! the same apply/eigs contract as a single operator. Composition goes
//! through the named builders [`LinearEffectiveHamiltonian::scale`],
//! [`LinearEffectiveHamiltonian::negate`], [`LinearEffectiveHamiltonian::add`]
//! and [`LinearEffectiveHamiltonian::sub`]; each returns a new wrapper and no
//! base operator is ever mutated, only its exclusive borrow moves.

use std::time::Instant;

use anyhow::Result;
use sweepham_core::{QuantumNumber, SparseTensor};
use sweepham_krylov::{davidson, DavidsonOptions};

use crate::effective::EffectiveHamiltonian;

/// Ordered `sum_i c_i * H_i` over borrowed effective Hamiltonians.
pub struct LinearEffectiveHamiltonian<'h, 'a, S: QuantumNumber> {
    terms: Vec<(&'h mut EffectiveHamiltonian<'a, S>, f64)>,
}

impl<'h, 'a, S: QuantumNumber> LinearEffectiveHamiltonian<'h, 'a, S> {
    /// Wrap `(operator, coefficient)` pairs.
    ///
    /// # Panics
    ///
    /// Panics on an empty list or when the operators do not share one state
    /// buffer layout.
    pub fn new(terms: Vec<(&'h mut EffectiveHamiltonian<'a, S>, f64)>) -> Self {
        assert!(!terms.is_empty(), "linear combination must have terms");
        let n = terms[0].0.ket.data().len();
        for (h, _) in &terms {
            assert_eq!(
                h.ket.data().len(),
                n,
                "all terms must share the state buffer layout"
            );
        }
        Self { terms }
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn coefficient(&self, i: usize) -> f64 {
        self.terms[i].1
    }

    /// New combination with every coefficient multiplied by `factor`.
    pub fn scale(mut self, factor: f64) -> Self {
        for (_, c) in self.terms.iter_mut() {
            *c *= factor;
        }
        self
    }

    /// New combination with every coefficient negated.
    pub fn negate(self) -> Self {
        self.scale(-1.0)
    }

    /// Concatenation of two combinations.
    pub fn add(mut self, other: Self) -> Self {
        self.terms.extend(other.terms);
        self
    }

    /// Concatenation with the second combination negated.
    pub fn sub(self, other: Self) -> Self {
        self.add(other.negate())
    }

    /// `output += sum_i c_i * H_i * input`, with one reduction at the end
    /// when a communicator is present.
    pub fn apply(&mut self, input: &SparseTensor<S>, output: &mut SparseTensor<S>) {
        assert_eq!(
            input.data().len(),
            self.terms[0].0.ket.data().len(),
            "input buffer does not match the ket layout"
        );
        for (h, c) in self.terms.iter_mut() {
            EffectiveHamiltonian::apply_impl(
                &mut h.engine,
                h.op,
                &h.cinfo,
                input,
                output,
                0,
                *c,
                false,
            );
        }
        if let Some(comm) = self.terms[0].0.engine.comm().cloned() {
            comm.all_reduce_sum(output.data_mut());
        }
    }

    /// Lowest eigenpair of the combination by one Davidson solve.
    ///
    /// The diagonal is the coefficient-weighted sum of every term's diagonal
    /// and every term's batched plan is precomputed around the solve. The
    /// first term's ket provides the starting vector and receives the
    /// eigenvector. Returns `(energy, ndav, nflop, time)`.
    ///
    /// # Panics
    ///
    /// Panics if any term was built without a diagonal.
    pub fn eigs(&mut self, options: &DavidsonOptions) -> Result<(f64, usize, u64, f64)> {
        let start = Instant::now();
        let n = self.terms[0].0.ket.data().len();
        let mut diag = vec![0.0; n];
        for (h, c) in self.terms.iter() {
            let d = match h.diag() {
                Some(d) => d,
                None => panic!("eigs requires a diagonal on every term"),
            };
            for (di, x) in diag.iter_mut().zip(d.data().iter()) {
                *di += c * x;
            }
        }
        for (h, _) in self.terms.iter_mut() {
            h.engine.reset_nflop();
            h.precompute();
        }

        let mut vectors = vec![self.terms[0].0.ket.data().to_vec()];
        let res = {
            let ket_info = self.terms[0].0.ket.info.clone();
            let bra_info = self.terms[0].0.bra.info.clone();
            let mut inp = SparseTensor::zeros(ket_info);
            let mut out = SparseTensor::zeros(bra_info);
            let terms = &mut self.terms;
            let op_fn = |x: &[f64], y: &mut [f64]| {
                inp.data_mut().copy_from_slice(x);
                out.clear();
                for (h, c) in terms.iter_mut() {
                    EffectiveHamiltonian::apply_impl(
                        &mut h.engine,
                        h.op,
                        &h.cinfo,
                        &inp,
                        &mut out,
                        0,
                        *c,
                        false,
                    );
                }
                if let Some(comm) = terms[0].0.engine.comm().cloned() {
                    comm.all_reduce_sum(out.data_mut());
                }
                for (yi, oi) in y.iter_mut().zip(out.data().iter()) {
                    *yi += *oi;
                }
            };
            davidson(op_fn, &diag, &mut vectors, options)?
        };

        self.terms[0].0.ket.data_mut().copy_from_slice(&vectors[0]);
        for (h, _) in self.terms.iter_mut() {
            h.post_precompute();
        }
        let mut nflop: u64 = self.terms.iter().map(|(h, _)| h.engine.nflop()).sum();
        if let Some(comm) = self.terms[0].0.engine.comm() {
            nflop = comm.all_reduce_sum_u64(nflop);
        }
        Ok((
            res.eigenvalues[0],
            res.iterations,
            nflop,
            start.elapsed().as_secs_f64(),
        ))
    }
}
