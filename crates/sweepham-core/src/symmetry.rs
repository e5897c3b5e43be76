//! Conserved quantum-number labels.
//!
//! A symmetry label is an opaque, totally ordered, additively combinable
//! value. Applying an operator shifts the label of a state by the operator's
//! delta quantum, so labels must support addition and negation. Some symmetry
//! groups (non-abelian ones) expand a formal sum of two labels into several
//! internal sub-sectors; [`QuantumNumber::count`] and
//! [`QuantumNumber::sub_label`] expose that expansion. For abelian labels the
//! expansion is trivial.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::ops::{Add, Neg, Sub};

/// A conserved quantum number attached to a symmetry sector.
///
/// Implementors must define addition so that `a + b` is the label of the
/// (formal) tensor product of sectors `a` and `b`, and negation so that
/// `-a` labels the dual sector.
pub trait QuantumNumber:
    Copy
    + Clone
    + Debug
    + Display
    + Default
    + Eq
    + Ord
    + Hash
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Number of internal sub-sectors this (possibly formal) label expands to.
    fn count(&self) -> usize {
        1
    }

    /// Retrieve the `i`-th internal sub-sector.
    fn sub_label(&self, i: usize) -> Self {
        debug_assert!(i < self.count());
        *self
    }
}

/// Particle number and twice the z-projection of spin.
///
/// The workhorse abelian label for fermionic chains: both components combine
/// additively and every formal sum is a single sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SzQ {
    /// Particle number.
    pub n: i32,
    /// Twice the total Sz (integer for both integer and half-integer spin).
    pub twos: i32,
}

impl SzQ {
    /// Create a label from particle number and 2*Sz.
    pub const fn new(n: i32, twos: i32) -> Self {
        Self { n, twos }
    }
}

impl Add for SzQ {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            n: self.n + rhs.n,
            twos: self.twos + rhs.twos,
        }
    }
}

impl Sub for SzQ {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            n: self.n - rhs.n,
            twos: self.twos - rhs.twos,
        }
    }
}

impl Neg for SzQ {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            n: -self.n,
            twos: -self.twos,
        }
    }
}

impl Display for SzQ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "< N={} SZ={} >", self.n, self.twos as f64 / 2.0)
    }
}

impl QuantumNumber for SzQ {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_szq_algebra() {
        let a = SzQ::new(1, 1);
        let b = SzQ::new(2, -1);
        assert_eq!(a + b, SzQ::new(3, 0));
        assert_eq!(a - b, SzQ::new(-1, 2));
        assert_eq!(-a, SzQ::new(-1, -1));
        assert_eq!(a + (-a), SzQ::default());
    }

    #[test]
    fn test_szq_ordering_is_total() {
        let mut labels = vec![SzQ::new(2, 0), SzQ::new(0, 0), SzQ::new(1, -1), SzQ::new(1, 1)];
        labels.sort();
        assert_eq!(
            labels,
            vec![SzQ::new(0, 0), SzQ::new(1, -1), SzQ::new(1, 1), SzQ::new(2, 0)]
        );
    }

    #[test]
    fn test_abelian_sub_labels() {
        let q = SzQ::new(3, 1);
        assert_eq!(q.count(), 1);
        assert_eq!(q.sub_label(0), q);
    }
}
