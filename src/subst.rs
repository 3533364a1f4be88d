use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::Mul;

use thiserror::Error;

use crate::term::{Term, Variable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstError {
    #[error("{var} is already bound to {existing}, cannot bind it to {term}")]
    DomainConflict {
        var: Variable,
        existing: Term,
        term: Term,
    },
    #[error("sort mismatch: cannot bind {var} to {term}")]
    SortMismatch { var: Variable, term: Term },
}

/// A finite map from variables to terms.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Substitution {
    map: BTreeMap<Variable, Term>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(var: Variable, term: Term) -> Result<Self, SubstError> {
        let mut sigma = Self::new();
        sigma.add(var, term)?;
        Ok(sigma)
    }

    pub fn add(&mut self, var: Variable, term: Term) -> Result<(), SubstError> {
        if !var.accepts(&term) {
            return Err(SubstError::SortMismatch { var, term });
        }
        if let Some(existing) = self.map.get(&var) {
            if *existing != term {
                return Err(SubstError::DomainConflict {
                    existing: existing.clone(),
                    var,
                    term,
                });
            }
            return Ok(());
        }
        self.map.insert(var, term);
        Ok(())
    }

    pub fn remove(&mut self, var: &Variable) -> Option<Term> {
        self.map.remove(var)
    }

    /// Rebinds `var`, returning its previous target.
    pub fn replace(&mut self, var: Variable, term: Term) -> Result<Option<Term>, SubstError> {
        if !var.accepts(&term) {
            return Err(SubstError::SortMismatch { var, term });
        }
        Ok(self.map.insert(var, term))
    }

    pub fn get(&self, var: &Variable) -> Option<&Term> {
        self.map.get(var)
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.map.contains_key(var)
    }

    pub fn domain(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.map.keys()
    }

    pub fn range(&self) -> impl Iterator<Item = &Term> + '_ {
        self.map.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> + '_ {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn apply(&self, term: &Term) -> Term {
        if self.is_empty() {
            return term.clone();
        }
        match term {
            Term::Var(v) => self.map.get(v).cloned().unwrap_or_else(|| term.clone()),
            Term::Const(_) => term.clone(),
            Term::App(_) | Term::Xor(_) => {
                term.with_args(term.args().iter().map(|t| self.apply(t)).collect())
            }
        }
    }

    /// `self * theta`: first `self`, then `theta`.
    pub fn compose(&self, theta: &Substitution) -> Substitution {
        let mut map = BTreeMap::new();
        for (x, t) in &self.map {
            let t = theta.apply(t);
            if t.as_var() != Some(x) {
                map.insert(x.clone(), t);
            }
        }
        for (y, u) in &theta.map {
            if !self.map.contains_key(y) && u.as_var() != Some(y) {
                map.insert(y.clone(), u.clone());
            }
        }
        Substitution { map }
    }

    pub fn restrict<'a>(&self, vars: impl IntoIterator<Item = &'a Variable>) -> Substitution {
        let map = vars
            .into_iter()
            .filter_map(|v| self.map.get(v).map(|t| (v.clone(), t.clone())))
            .collect();
        Substitution { map }
    }

    /// No variable of the domain occurs in the range.
    pub fn is_idempotent(&self) -> bool {
        self.range()
            .all(|t| t.vars().all(|v| !self.map.contains_key(v)))
    }
}

/// Applies `sigma` until `term` stops changing.
///
/// An acyclic `sigma` reaches the fixpoint within `sigma.len()` rounds; a
/// cyclic one is cut off there.
pub fn unravel(term: &Term, sigma: &Substitution) -> Term {
    let mut current = term.clone();
    for _ in 0..=sigma.len() {
        let next = sigma.apply(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

impl Mul<&Substitution> for &Term {
    type Output = Term;

    fn mul(self, rhs: &Substitution) -> Term {
        rhs.apply(self)
    }
}

impl Mul<&Substitution> for &Substitution {
    type Output = Substitution;

    fn mul(self, rhs: &Substitution) -> Substitution {
        self.compose(rhs)
    }
}

impl<'a> IntoIterator for &'a Substitution {
    type Item = (&'a Variable, &'a Term);
    type IntoIter = std::collections::btree_map::Iter<'a, Variable, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

impl Display for Substitution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (x, t)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{x} ↦ {t}")?;
        }
        write!(f, "}}")
    }
}
