//! Symbolic operator expressions.
//!
//! The operator network hands each bond a column of symbolic expressions;
//! every expression is a sum of products of one left-environment and one
//! right-environment elementary operator. The kind set is closed, so the
//! expression type is a tagged variant and every traversal is an exhaustive
//! match.
//!
//! Expressions are immutable values; composition goes through the named
//! builders ([`OpExpr::scaled`], [`OpExpr::sum`]) and always returns a new
//! expression.

use crate::symmetry::QuantumNumber;

/// Name tag of an elementary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpName {
    /// Zero operator.
    Zero,
    /// Identity.
    I,
    /// Hamiltonian.
    H,
    /// Creation.
    C,
    /// Destruction.
    D,
    /// Complementary one-index operator.
    R,
    /// One-particle density-matrix operator.
    Pdm1,
    /// Two-particle density-matrix operator.
    Pdm2,
}

/// An elementary operator: name, site indices and delta quantum.
///
/// The element identifies a stored environment tensor; numeric prefactors
/// live on the products that reference it, so elements can serve as map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpElement<S: QuantumNumber> {
    /// Name tag.
    pub name: OpName,
    /// Orbital/site indices the operator carries, possibly empty.
    pub site_index: Vec<u16>,
    /// Change of conserved quantum number induced by this operator.
    pub q_label: S,
}

impl<S: QuantumNumber> OpElement<S> {
    /// Element with no site indices.
    pub fn new(name: OpName, q_label: S) -> Self {
        Self {
            name,
            site_index: Vec::new(),
            q_label,
        }
    }

    /// Element with site indices.
    pub fn with_sites(name: OpName, site_index: Vec<u16>, q_label: S) -> Self {
        Self {
            name,
            site_index,
            q_label,
        }
    }
}

/// Product of one left and one right elementary operator.
///
/// `conj` bit 0 transposes the left factor, bit 1 the right factor; a
/// transposed factor's stored delta quantum acts negated.
#[derive(Debug, Clone, PartialEq)]
pub struct OpProduct<S: QuantumNumber> {
    pub factor: f64,
    pub left: OpElement<S>,
    pub right: OpElement<S>,
    pub conj: u8,
}

impl<S: QuantumNumber> OpProduct<S> {
    /// Delta quantum the left factor effectively applies.
    pub fn left_delta(&self) -> S {
        if self.conj & 1 != 0 {
            -self.left.q_label
        } else {
            self.left.q_label
        }
    }

    /// Delta quantum the right factor effectively applies.
    pub fn right_delta(&self) -> S {
        if self.conj & 2 != 0 {
            -self.right.q_label
        } else {
            self.right.q_label
        }
    }
}

/// Collapsed product of one fixed left factor and a sum of right factors.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSumProd<S: QuantumNumber> {
    pub factor: f64,
    pub left: OpElement<S>,
    pub rights: Vec<OpElement<S>>,
    pub conj: u8,
}

/// A symbolic operator expression.
#[derive(Debug, Clone, PartialEq)]
pub enum OpExpr<S: QuantumNumber> {
    /// Identically zero.
    Zero,
    /// A single elementary operator (acting on the fused active basis).
    Elem(OpElement<S>),
    /// Left (x) right product.
    Prod(OpProduct<S>),
    /// Sum of expressions.
    Sum(Vec<OpExpr<S>>),
    /// Collapsed left (x) sum-of-rights product.
    SumProd(OpSumProd<S>),
}

impl<S: QuantumNumber> OpExpr<S> {
    /// Whether the expression is identically zero.
    pub fn is_zero(&self) -> bool {
        match self {
            OpExpr::Zero => true,
            OpExpr::Sum(terms) => terms.iter().all(OpExpr::is_zero),
            _ => false,
        }
    }

    /// New expression scaled by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        if factor == 0.0 {
            return OpExpr::Zero;
        }
        match self {
            OpExpr::Zero => OpExpr::Zero,
            OpExpr::Elem(e) => OpExpr::Prod(OpProduct {
                factor,
                left: e.clone(),
                right: e.clone(),
                conj: 0,
            }),
            OpExpr::Prod(p) => OpExpr::Prod(OpProduct {
                factor: p.factor * factor,
                ..p.clone()
            }),
            OpExpr::Sum(terms) => OpExpr::Sum(terms.iter().map(|t| t.scaled(factor)).collect()),
            OpExpr::SumProd(p) => OpExpr::SumProd(OpSumProd {
                factor: p.factor * factor,
                ..p.clone()
            }),
        }
    }

    /// Sum of expressions with zeros dropped.
    pub fn sum(terms: Vec<OpExpr<S>>) -> Self {
        let mut kept: Vec<OpExpr<S>> = Vec::with_capacity(terms.len());
        for t in terms {
            match t {
                OpExpr::Zero => {}
                OpExpr::Sum(inner) => kept.extend(inner.into_iter().filter(|x| !x.is_zero())),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => OpExpr::Zero,
            1 => kept.pop().unwrap(),
            _ => OpExpr::Sum(kept),
        }
    }

    /// Expand into plain products (SumProd terms are unfolded).
    pub fn expand(&self) -> Vec<OpProduct<S>> {
        let mut out = Vec::new();
        self.expand_into(&mut out);
        out
    }

    fn expand_into(&self, out: &mut Vec<OpProduct<S>>) {
        match self {
            OpExpr::Zero => {}
            OpExpr::Elem(e) => out.push(OpProduct {
                factor: 1.0,
                left: e.clone(),
                right: e.clone(),
                conj: 0,
            }),
            OpExpr::Prod(p) => out.push(p.clone()),
            OpExpr::Sum(terms) => {
                for t in terms {
                    t.expand_into(out);
                }
            }
            OpExpr::SumProd(sp) => {
                for r in &sp.rights {
                    out.push(OpProduct {
                        factor: sp.factor,
                        left: sp.left.clone(),
                        right: r.clone(),
                        conj: sp.conj,
                    });
                }
            }
        }
    }

    /// Number of operator strings this expression carries across the bond.
    pub fn bond_dimension(&self) -> usize {
        match self {
            OpExpr::Zero => 0,
            OpExpr::Elem(_) | OpExpr::Prod(_) => 1,
            OpExpr::Sum(terms) => terms.iter().map(OpExpr::bond_dimension).sum(),
            OpExpr::SumProd(sp) => sp.rights.len(),
        }
    }
}
