//! Syntactic unification.

use thiserror::Error;

use crate::subst::Substitution;
use crate::term::{Equation, Term, Variable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnifyError {
    #[error("occurs check failed: {var} occurs in {term}")]
    OccursCheck { var: Variable, term: Term },
    #[error("function clash: {left} and {right}")]
    FunctionClash { left: Term, right: Term },
    #[error("ill-sorted binding: {var} to {term}")]
    SortMismatch { var: Variable, term: Term },
    #[error("{var} is bound to {term}, which its constraints do not allow")]
    ConstraintViolation { var: Variable, term: Term },
    /// Deciding the pair needs unification modulo XOR.
    #[error("{left} and {right} only unify modulo XOR")]
    OutsideTheory { left: Term, right: Term },
}

pub fn unify_terms(left: &Term, right: &Term) -> Result<Substitution, UnifyError> {
    unify([Equation::new(left.clone(), right.clone())])
}

/// Most general unifier of `equations`.
///
/// Rules run round-robin until no equation is left: delete, occurs check,
/// function clash, eliminate, orient, decompose. A ground sum is rigid; a sum
/// with variables is left to [`crate::xor_unif`] and reported as
/// [`UnifyError::OutsideTheory`].
pub fn unify(equations: impl IntoIterator<Item = Equation>) -> Result<Substitution, UnifyError> {
    let mut equations: Vec<Equation> = equations.into_iter().collect();
    let mut sigma = Substitution::new();
    while !equations.is_empty() {
        if log::log_enabled!(log::Level::Trace) {
            let eqs: Vec<String> = equations.iter().map(|e| e.to_string()).collect();
            log::trace!("unify: [{}] with {sigma}", eqs.join(", "));
        }
        equations.retain(|e| e.left != e.right);
        occurs_check(&equations)?;
        function_clash(&equations)?;
        if let Some(i) = equations.iter().position(|e| e.left.is_var()) {
            let Equation { left, right } = equations.remove(i);
            if let Term::Var(x) = left {
                let binding = eliminate(x, right)?;
                equations = equations
                    .into_iter()
                    .map(|e| Equation::new(binding.apply(&e.left), binding.apply(&e.right)))
                    .collect();
                sigma = sigma.compose(&binding);
            }
        }
        orient(&mut equations);
        decompose(&mut equations);
    }
    log::debug!("unify: mgu {sigma}");
    Ok(sigma)
}

fn occurs_check(equations: &[Equation]) -> Result<(), UnifyError> {
    for eq in equations {
        for (side, other) in [(&eq.left, &eq.right), (&eq.right, &eq.left)] {
            if let Term::Var(v) = side {
                if side != other && other.occurs(v) {
                    if has_open_sum(other) {
                        return Err(UnifyError::OutsideTheory {
                            left: side.clone(),
                            right: other.clone(),
                        });
                    }
                    return Err(UnifyError::OccursCheck {
                        var: v.clone(),
                        term: other.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn clashes(left: &Term, right: &Term) -> bool {
    match (left, right) {
        (Term::Var(_), _) | (_, Term::Var(_)) => false,
        (Term::Const(c1), Term::Const(c2)) => c1 != c2,
        (Term::App(a1), Term::App(a2)) => a1.function() != a2.function(),
        _ => true,
    }
}

/// Some sum inside `t` has a variable, so instances of `t` may cancel.
fn has_open_sum(t: &Term) -> bool {
    t.subterms()
        .any(|s| matches!(s, Term::Xor(_)) && s.vars().next().is_some())
}

fn outside_theory(left: &Term, right: &Term) -> bool {
    !left.is_var()
        && !right.is_var()
        && (matches!(left, Term::Xor(_)) || matches!(right, Term::Xor(_)))
        && (has_open_sum(left) || has_open_sum(right))
}

fn function_clash(equations: &[Equation]) -> Result<(), UnifyError> {
    if let Some(eq) = equations.iter().find(|e| outside_theory(&e.left, &e.right)) {
        return Err(UnifyError::OutsideTheory {
            left: eq.left.clone(),
            right: eq.right.clone(),
        });
    }
    match equations.iter().find(|e| clashes(&e.left, &e.right)) {
        Some(eq) => Err(UnifyError::FunctionClash {
            left: eq.left.clone(),
            right: eq.right.clone(),
        }),
        None => Ok(()),
    }
}

/// Turns `x = t` into the binding `x ↦ t`, or `t ↦ x` when only that direction is well-sorted.
fn eliminate(x: Variable, right: Term) -> Result<Substitution, UnifyError> {
    if let Ok(binding) = Substitution::singleton(x.clone(), right.clone()) {
        return Ok(binding);
    }
    if let Term::Var(y) = &right {
        if let Ok(binding) = Substitution::singleton(y.clone(), Term::Var(x.clone())) {
            return Ok(binding);
        }
    }
    Err(UnifyError::SortMismatch { var: x, term: right })
}

fn orient(equations: &mut [Equation]) {
    for eq in equations.iter_mut() {
        if !eq.left.is_var() && eq.right.is_var() {
            std::mem::swap(&mut eq.left, &mut eq.right);
        }
    }
}

/// Replaces the first decomposable equation by its argument equations.
fn decompose(equations: &mut Vec<Equation>) {
    let found = equations.iter().position(|e| {
        matches!((&e.left, &e.right), (Term::App(_), Term::App(_)))
    });
    let Some(i) = found else {
        return;
    };
    let eq = equations.remove(i);
    let args = eq
        .left
        .args()
        .iter()
        .zip(eq.right.args())
        .map(|(s, t)| Equation::new(s.clone(), t.clone()));
    equations.splice(i..i, args);
}
