//! Work distribution across cooperating processes.
//!
//! Ownership of a term is a pure function of its site indices, so every
//! process decides locally which terms to evaluate; the only synchronization
//! points are the sum reductions. Collectives block until all participants
//! have posted the matching call, and mismatched collective order across
//! processes deadlocks rather than silently diverging.

use std::sync::{Arc, Condvar, Mutex};

use sweepham_core::{OpElement, QuantumNumber};

/// Collective communication between cooperating processes.
///
/// The only payloads are flat `f64` buffers; everything distributed in this
/// core (state buffers, expectation values, label membership masks, flop
/// counters) is encoded as one.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Rank of the designated root process.
    fn root(&self) -> usize {
        0
    }

    fn is_root(&self) -> bool {
        self.rank() == self.root()
    }

    /// Element-wise sum into `buf` on `root`; other ranks' buffers are left
    /// unchanged. Blocks until all ranks have posted the call.
    fn reduce_sum(&self, buf: &mut [f64], root: usize);

    /// Element-wise sum into `buf` on every rank. Blocks until all ranks have
    /// posted the call.
    fn all_reduce_sum(&self, buf: &mut [f64]);

    /// Sum a scalar counter across ranks.
    fn all_reduce_sum_u64(&self, value: u64) -> u64 {
        let mut buf = [value as f64];
        self.all_reduce_sum(&mut buf);
        buf[0] as u64
    }
}

/// Single-process communicator; every collective is a no-op.
#[derive(Debug, Default, Clone)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn reduce_sum(&self, _buf: &mut [f64], _root: usize) {}

    fn all_reduce_sum(&self, _buf: &mut [f64]) {}
}

struct ThreadRound {
    count_in: usize,
    count_out: usize,
    generation: u64,
    acc: Vec<f64>,
}

struct ThreadShared {
    size: usize,
    round: Mutex<ThreadRound>,
    cond: Condvar,
}

/// Shared-memory communicator: `size` cooperating threads standing in for
/// processes.
///
/// Exists so distributed-reduction semantics (term ownership, additivity of
/// partial results) are testable in a single test binary. Handles are created
/// together through [`ThreadComm::group`] and moved one per thread.
pub struct ThreadComm {
    rank: usize,
    shared: Arc<ThreadShared>,
}

impl ThreadComm {
    /// Create one communicator handle per cooperating thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "communicator group must not be empty");
        let shared = Arc::new(ThreadShared {
            size,
            round: Mutex::new(ThreadRound {
                count_in: 0,
                count_out: 0,
                generation: 0,
                acc: Vec::new(),
            }),
            cond: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }

    fn collective(&self, buf: &mut [f64], keep: bool) {
        let shared = &self.shared;
        let mut round = shared.round.lock().unwrap();
        // wait for the previous round to fully drain
        while round.count_out != 0 {
            round = shared.cond.wait(round).unwrap();
        }
        if round.count_in == 0 {
            round.acc.clear();
            round.acc.extend_from_slice(buf);
        } else {
            assert_eq!(
                round.acc.len(),
                buf.len(),
                "mismatched collective buffer lengths"
            );
            for (a, &b) in round.acc.iter_mut().zip(buf.iter()) {
                *a += b;
            }
        }
        round.count_in += 1;
        if round.count_in == shared.size {
            round.generation += 1;
            round.count_out = shared.size;
            shared.cond.notify_all();
        } else {
            let gen = round.generation;
            while round.generation == gen {
                round = shared.cond.wait(round).unwrap();
            }
        }
        if keep {
            buf.copy_from_slice(&round.acc);
        }
        round.count_out -= 1;
        if round.count_out == 0 {
            round.count_in = 0;
            shared.cond.notify_all();
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn reduce_sum(&self, buf: &mut [f64], root: usize) {
        let keep = self.rank == root;
        self.collective(buf, keep);
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        self.collective(buf, true);
    }
}

/// Deterministic site-index ownership: index `i` belongs to rank `i % size`.
///
/// A multi-index term belongs to the owner of its first index. The tie-break
/// is deliberately asymmetric; a balanced choice would change the reduction
/// order and hence the floating-point rounding of distributed results.
pub struct ParallelRule<S: QuantumNumber> {
    comm: Arc<dyn Communicator>,
    _marker: std::marker::PhantomData<S>,
}

impl<S: QuantumNumber> ParallelRule<S> {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Rank owning site index `i`.
    pub fn owner(&self, i: usize) -> usize {
        i % self.comm.size()
    }

    pub fn is_local(&self, i: usize) -> bool {
        self.owner(i) == self.comm.rank()
    }

    pub fn is_local2(&self, i: usize, _j: usize) -> bool {
        self.is_local(i)
    }

    pub fn is_local4(&self, i: usize, _j: usize, _k: usize, _l: usize) -> bool {
        self.is_local(i)
    }

    pub fn is_root(&self) -> bool {
        self.comm.is_root()
    }

    /// Whether this rank evaluates the given term. Index-free terms fall to
    /// the root so every term has exactly one owner.
    pub fn own_term(&self, elem: &OpElement<S>) -> bool {
        match elem.site_index.first() {
            Some(&i) => self.is_local(i as usize),
            None => self.is_root(),
        }
    }
}

/// Ownership filter for a distributed sum-of-MPOs Hamiltonian.
///
/// The one-body integrals `t(i, j)` and two-body integrals `v(i, j, k, l)`
/// are stored only on the owner of their first index, so operator terms built
/// from them are available only there.
pub struct SumMpoRule<S: QuantumNumber> {
    rule: ParallelRule<S>,
}

impl<S: QuantumNumber> SumMpoRule<S> {
    pub fn new(rule: ParallelRule<S>) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &ParallelRule<S> {
        &self.rule
    }

    /// Whether the one-body integral `t(i, j)` is available on this rank.
    pub fn has_one_body(&self, i: usize, j: usize) -> bool {
        self.rule.is_local2(i, j)
    }

    /// Whether the two-body integral `v(i, j, k, l)` is available on this
    /// rank.
    pub fn has_two_body(&self, i: usize, j: usize, k: usize, l: usize) -> bool {
        self.rule.is_local4(i, j, k, l)
    }

    /// Whether an operator element built from stored integrals is available.
    pub fn available(&self, elem: &OpElement<S>) -> bool {
        match elem.site_index.as_slice() {
            [] => true,
            [i] => self.rule.is_local(*i as usize),
            [i, j] => self.has_one_body(*i as usize, *j as usize),
            [i, j, k, l] => self.has_two_body(*i as usize, *j as usize, *k as usize, *l as usize),
            other => self.rule.is_local(other[0] as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweepham_core::{OpName, SzQ};

    #[test]
    fn test_serial_rule_owns_everything() {
        let rule: ParallelRule<SzQ> = ParallelRule::new(Arc::new(SerialComm));
        for i in 0..7 {
            assert!(rule.is_local(i));
        }
        assert!(rule.is_root());
    }

    #[test]
    fn test_owner_is_modular_and_first_index_breaks_ties() {
        let comms = ThreadComm::group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let rank = comm.rank();
                    let rule: ParallelRule<SzQ> = ParallelRule::new(Arc::new(comm));
                    assert_eq!(rule.owner(4), 1);
                    assert_eq!(rule.is_local(4), rank == 1);
                    // two-index ownership follows the first index only
                    assert_eq!(rule.is_local2(4, 0), rank == 1);
                    assert_eq!(rule.is_local4(2, 0, 1, 4), rank == 2);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_every_term_has_one_owner() {
        let comms = ThreadComm::group(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let rule: ParallelRule<SzQ> = ParallelRule::new(Arc::new(comm));
                    let mut owned = vec![0.0f64; 5];
                    for i in 0..4 {
                        let e = OpElement::with_sites(OpName::C, vec![i as u16], SzQ::default());
                        if rule.own_term(&e) {
                            owned[i] = 1.0;
                        }
                    }
                    let h = OpElement::new(OpName::H, SzQ::default());
                    if rule.own_term(&h) {
                        owned[4] = 1.0;
                    }
                    rule.comm().all_reduce_sum(&mut owned);
                    for o in owned {
                        assert_eq!(o, 1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_all_reduce_sums_across_threads() {
        let comms = ThreadComm::group(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let mut buf = vec![comm.rank() as f64, 1.0];
                    comm.all_reduce_sum(&mut buf);
                    assert_eq!(buf, vec![6.0, 4.0]);
                    // a second round reuses the same shared state
                    let mut buf2 = vec![1.0];
                    comm.all_reduce_sum(&mut buf2);
                    assert_eq!(buf2, vec![4.0]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_reduce_keeps_only_root() {
        let comms = ThreadComm::group(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let rank = comm.rank();
                    let mut buf = vec![2.0];
                    comm.reduce_sum(&mut buf, 0);
                    if rank == 0 {
                        assert_eq!(buf, vec![4.0]);
                    } else {
                        assert_eq!(buf, vec![2.0]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_sum_mpo_integral_availability() {
        let rule: SumMpoRule<SzQ> = SumMpoRule::new(ParallelRule::new(Arc::new(SerialComm)));
        let v = OpElement::with_sites(OpName::R, vec![0, 1, 2, 3], SzQ::default());
        assert!(rule.available(&v));
        assert!(rule.has_one_body(3, 0));
    }
}
