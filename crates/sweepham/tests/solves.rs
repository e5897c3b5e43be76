use std::sync::Arc;
use std::thread;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use sweepham::{
    greens_function_complex, Communicator, ContractionEngine, EffectiveHamiltonian,
    LinearEffectiveHamiltonian, OperatorSlice, OperatorTensor, ParallelRule, SeqMode, ThreadComm,
};
use sweepham_core::{
    OpElement, OpExpr, OpName, OpProduct, SparseInfo, SparseTensor, StateInfo, SzQ,
};
use sweepham_krylov::{CgOptions, DavidsonOptions, ExpoOptions, GcrotOptions};

/// Three-sector basis with a two-dimensional middle sector.
fn site() -> StateInfo<SzQ> {
    StateInfo::new(vec![
        (SzQ::new(0, 0), 1),
        (SzQ::new(1, 1), 2),
        (SzQ::new(2, 2), 1),
    ])
}

fn wfn_info() -> Arc<SparseInfo<SzQ>> {
    Arc::new(SparseInfo::wavefunction_info(&site(), &site(), SzQ::new(2, 2)))
}

fn fill_identity(t: &mut SparseTensor<SzQ>) {
    for i in 0..t.info.n_blocks() {
        let e = *t.info.block(i);
        let blk = t.block_mut(i);
        for a in 0..e.rows.min(e.cols) {
            blk[a * e.cols + a] = 1.0;
        }
    }
}

fn fill_random(t: &mut SparseTensor<SzQ>, rng: &mut ChaCha8Rng, symmetric: bool) {
    for i in 0..t.info.n_blocks() {
        let e = *t.info.block(i);
        let blk = t.block_mut(i);
        for v in blk.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        if symmetric && e.rows == e.cols {
            for a in 0..e.rows {
                for b in 0..a {
                    let m = 0.5 * (blk[a * e.cols + b] + blk[b * e.cols + a]);
                    blk[a * e.cols + b] = m;
                    blk[b * e.cols + a] = m;
                }
            }
        }
    }
}

fn prod(factor: f64, left: &OpElement<SzQ>, right: &OpElement<SzQ>, conj: u8) -> OpExpr<SzQ> {
    OpExpr::Prod(OpProduct {
        factor,
        left: left.clone(),
        right: right.clone(),
        conj,
    })
}

/// Number terms plus a transpose-paired hop, so the dense matrix is
/// symmetric by construction.
fn hamiltonian_products() -> Vec<OpExpr<SzQ>> {
    let ident = OpElement::new(OpName::I, SzQ::default());
    let num = OpElement::new(OpName::R, SzQ::default());
    let c = OpElement::new(OpName::C, SzQ::new(1, 1));
    let d = OpElement::new(OpName::D, SzQ::new(-1, -1));
    vec![
        prod(0.8, &num, &ident, 0),
        prod(0.5, &ident, &num, 0),
        prod(0.3, &c, &d, 0),
        prod(0.3, &c, &d, 3),
    ]
}

fn hamiltonian_slice(products: Vec<OpExpr<SzQ>>) -> OperatorSlice<SzQ> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut left = OperatorTensor::new(site());
    let mut right = OperatorTensor::new(site());
    let ident = OpElement::new(OpName::I, SzQ::default());
    let num = OpElement::new(OpName::R, SzQ::default());
    let c = OpElement::new(OpName::C, SzQ::new(1, 1));
    let d = OpElement::new(OpName::D, SzQ::new(-1, -1));
    fill_identity(left.insert(ident.clone()));
    fill_identity(right.insert(ident));
    fill_random(left.insert(num.clone()), &mut rng, true);
    fill_random(right.insert(num), &mut rng, true);
    fill_random(left.insert(c), &mut rng, false);
    fill_random(right.insert(d), &mut rng, false);
    OperatorSlice::new(left, right, OpExpr::sum(products), SzQ::default())
}

fn random_ket(seed: u64) -> SparseTensor<SzQ> {
    let info = wfn_info();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ket = SparseTensor::zeros(info);
    for v in ket.data_mut().iter_mut() {
        *v = rng.gen_range(-1.0..1.0);
    }
    let norm = ket.norm();
    ket.iscale(1.0 / norm);
    ket
}

fn build<'a>(
    op: &'a OperatorSlice<SzQ>,
    left: &'a StateInfo<SzQ>,
    right: &'a StateInfo<SzQ>,
    engine: ContractionEngine<SzQ>,
    seed: u64,
) -> EffectiveHamiltonian<'a, SzQ> {
    let ket = random_ket(seed);
    let bra = SparseTensor::zeros(ket.info.clone());
    EffectiveHamiltonian::new(left, right, op, bra, ket, SzQ::default(), engine, true)
}

/// Dense matrix assembled column by column through `apply`.
fn dense_matrix(h: &mut EffectiveHamiltonian<'_, SzQ>, n: usize) -> Vec<f64> {
    let info = h.ket.info.clone();
    let mut a = vec![0.0; n * n];
    for j in 0..n {
        let mut e = SparseTensor::zeros(info.clone());
        e.data_mut()[j] = 1.0;
        let mut out = SparseTensor::zeros(info.clone());
        h.apply(&e, &mut out, 0, 1.0, true);
        for i in 0..n {
            a[i * n + j] = out.data()[i];
        }
    }
    a
}

/// Lowest eigenvalue of a symmetric matrix by cyclic Jacobi sweeps.
fn dense_lowest(mut a: Vec<f64>, n: usize) -> f64 {
    for _ in 0..60 {
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() < 1e-14 {
                    continue;
                }
                let theta = 0.5 * (a[q * n + q] - a[p * n + p]) / apq;
                let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
            }
        }
    }
    (0..n).map(|i| a[i * n + i]).fold(f64::INFINITY, f64::min)
}

#[test]
fn eigs_agrees_across_seeds_and_matches_dense_reference() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let n = wfn_info().total_memory();

    let mut h0 = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let dense = dense_matrix(&mut h0, n);
    // apply builds a symmetric operator
    for i in 0..n {
        for j in 0..i {
            assert!((dense[i * n + j] - dense[j * n + i]).abs() < 1e-12);
        }
    }
    let reference = dense_lowest(dense, n);

    let (e0, _, _, _) = h0.eigs(&DavidsonOptions::default()).unwrap();
    let mut h1 = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 23);
    let (e1, _, _, _) = h1.eigs(&DavidsonOptions::default()).unwrap();

    assert!((e0 - e1).abs() < 1e-8, "seeds disagree: {e0} vs {e1}");
    assert!((e0 - reference).abs() < 1e-8, "{e0} vs dense {reference}");
}

#[test]
fn partitioned_apply_is_additive() {
    let products = hamiltonian_products();
    let op_full = hamiltonian_slice(products.clone());
    let (l, r) = (site(), site());
    let mut serial = build(
        &op_full,
        &l,
        &r,
        ContractionEngine::new(SeqMode::None),
        11,
    );
    let input = serial.ket.clone();
    let mut expected = SparseTensor::zeros(input.info.clone());
    serial.apply(&input, &mut expected, 0, 1.0, true);
    let expected = expected.data().to_vec();

    let comms = ThreadComm::group(2);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let expected = expected.clone();
            let products = products.clone();
            thread::spawn(move || {
                let rank = comm.rank();
                // each process keeps a disjoint subset of the products
                let mine: Vec<OpExpr<SzQ>> = products
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % 2 == rank)
                    .map(|(_, p)| p)
                    .collect();
                let op = hamiltonian_slice(mine);
                let (l, r) = (site(), site());
                let engine = ContractionEngine::with_comm(SeqMode::None, Arc::new(comm));
                let mut h = build(&op, &l, &r, engine, 11);
                let input = h.ket.clone();
                let mut out = SparseTensor::zeros(input.info.clone());
                h.apply(&input, &mut out, 0, 1.0, true);
                for (o, e) in out.data().iter().zip(expected.iter()) {
                    assert!((o - e).abs() < 1e-12, "partitioned {o} vs serial {e}");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn partitioned_expect_matches_serial() {
    let with_pdm_terms = |op: &mut OperatorSlice<SzQ>| {
        let ident = OpElement::new(OpName::I, SzQ::default());
        let num = OpElement::new(OpName::R, SzQ::default());
        for i in 0..3u16 {
            op.push_term(
                OpElement::with_sites(OpName::Pdm1, vec![i, i], SzQ::default()),
                prod(0.4 + 0.1 * f64::from(i), &num, &ident, 0),
            );
        }
    };

    let mut op_serial = hamiltonian_slice(hamiltonian_products());
    with_pdm_terms(&mut op_serial);
    let (l, r) = (site(), site());
    let mut serial = build(
        &op_serial,
        &l,
        &r,
        ContractionEngine::new(SeqMode::None),
        11,
    );
    let state = serial.ket.clone();
    serial.bra.copy_from(&state);
    let (reference, _, _) = serial.expect(0.5, None);

    let comms = ThreadComm::group(2);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let reference = reference.clone();
            thread::spawn(move || {
                let rule: ParallelRule<SzQ> = ParallelRule::new(Arc::new(comm));
                let mut op = hamiltonian_slice(hamiltonian_products());
                with_pdm_terms(&mut op);
                let (l, r) = (site(), site());
                let mut h = build(&op, &l, &r, ContractionEngine::new(SeqMode::None), 11);
                let state = h.ket.clone();
                h.bra.copy_from(&state);
                let (values, _, _) = h.expect(0.5, Some(&rule));
                assert_eq!(values.len(), reference.len());
                for ((le, ve), (lr, vr)) in values.iter().zip(reference.iter()) {
                    assert_eq!(le, lr);
                    assert!((ve - vr).abs() < 1e-12, "term {le:?}: {ve} vs {vr}");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn precompute_bracket_does_not_change_results() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let mut h = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let input = h.ket.clone();

    let mut before = SparseTensor::zeros(input.info.clone());
    h.apply(&input, &mut before, 0, 1.0, true);
    h.precompute();
    h.post_precompute();
    let mut after = SparseTensor::zeros(input.info.clone());
    h.apply(&input, &mut after, 0, 1.0, true);
    assert_eq!(before.data(), after.data());
}

#[test]
fn expo_with_zero_beta_reports_rayleigh_quotient() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let mut h = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let ket = h.ket.clone();
    let mut hket = SparseTensor::zeros(ket.info.clone());
    h.apply(&ket, &mut hket, 0, 1.0, true);
    let expected = hket.dot(&ket) / ket.dot(&ket);

    let ((norm, energy), _, _, _) = h.expo_apply(0.0, 0.0, &ExpoOptions::default()).unwrap();
    assert_eq!(h.ket.data(), ket.data());
    assert!((norm - 1.0).abs() < 1e-12);
    assert!((energy - expected).abs() < 1e-12);
}

#[test]
fn real_and_complex_resolvents_agree() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let (const_e, omega, eta) = (0.3, 0.4, 0.1);

    let mut ha = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let ((ra, ia), imag_a, _, _, _) = ha
        .greens_function(const_e, omega, eta, &CgOptions::default())
        .unwrap();

    let mut hb = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let ((rb, ib), imag_b, _, _, _) =
        greens_function_complex(&mut hb, const_e, omega, eta, &GcrotOptions::default()).unwrap();

    assert!((ra - rb).abs() < 1e-6, "re {ra} vs {rb}");
    assert!((ia - ib).abs() < 1e-6, "im {ia} vs {ib}");
    for (a, b) in imag_a.data().iter().zip(imag_b.data().iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn linear_combination_scales_the_spectrum() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let mut plain = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let (e_plain, _, _, _) = plain.eigs(&DavidsonOptions::default()).unwrap();

    let mut h = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 23);
    let mut lc = LinearEffectiveHamiltonian::new(vec![(&mut h, 2.0)]);
    let (e_scaled, _, _, _) = lc.eigs(&DavidsonOptions::default()).unwrap();
    assert!((e_scaled - 2.0 * e_plain).abs() < 1e-7);
}

#[test]
fn deallocate_runs_once_after_solves() {
    let op = hamiltonian_slice(hamiltonian_products());
    let (l, r) = (site(), site());
    let mut h = build(&op, &l, &r, ContractionEngine::new(SeqMode::Auto), 11);
    let _ = h.eigs(&DavidsonOptions::default()).unwrap();
    h.deallocate();
    assert!(h.diag().is_none());
}
