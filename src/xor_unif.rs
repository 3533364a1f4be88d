//! Unification modulo XOR.
//!
//! The problem is purified so that no sum occurs under a free symbol, then
//! every equation is normalized to `sum = 0` and a proof-state search applies
//! Trivial, Decompose, Subst and N-Decompose. N-Decompose branches, so the
//! result is a list of unifiers.

use std::collections::BTreeSet;
use std::iter::repeat_n;

use easy_ext::ext;

use crate::fresh::FreshNames;
use crate::search::{push_unique, Budget, Outcome, SearchConfig};
use crate::subst::Substitution;
use crate::term::{mk_app, Disequation, Equation, Term, Variable};
use crate::unif::unify_terms;
use crate::xor::{is_zero, xor, xor_to_list, zero};

pub fn xor_unify(equations: &[Equation], config: &SearchConfig) -> Outcome {
    let mut fresh = FreshNames::new("N");
    fresh.avoid_equations(equations);
    let mut budget = Budget::new(config);
    xor_unify_with(equations, &mut fresh, &mut budget)
}

/// [`xor_unify`] sharing a name generator and budget with an enclosing search.
pub fn xor_unify_with(equations: &[Equation], fresh: &mut FreshNames, budget: &mut Budget) -> Outcome {
    let purified = purify(equations, fresh);
    let mut stack = vec![ProofState::new(purified)];
    let mut found = Vec::new();
    while let Some(mut state) = stack.pop() {
        if budget.spend().is_err() {
            log::debug!("xor_unify: search bound exceeded after {} steps", budget.spent());
            return Outcome::SearchBoundExceeded { found };
        }
        state.normalize();
        if log::log_enabled!(log::Level::Trace) {
            let sp = repeat_n(' ', stack.len()).collect::<String>();
            log::trace!("{sp}{state}");
        }
        if state.equations.is_empty() {
            log::debug!("xor_unify: solved with {}", state.substitution);
            push_unique(&mut found, state.substitution);
            continue;
        }
        match state.step() {
            Step::Continue(next) => stack.push(next),
            Step::Branch(unified, refused) => {
                stack.push(refused);
                if let Some(unified) = unified {
                    stack.push(unified);
                }
            }
            Step::Dead => log::trace!("xor_unify: dead end"),
        }
    }
    Outcome::from_solutions(found)
}

/// Names every sum that occurs under a free symbol with a fresh variable.
///
/// Returns the purified equations followed by one `N = sum` equation per name.
pub fn purify(equations: &[Equation], fresh: &mut FreshNames) -> Vec<Equation> {
    let mut purifier = Purifier {
        fresh,
        named: vec![],
    };
    let mut purified: Vec<Equation> = equations
        .iter()
        .map(|eq| Equation::new(purifier.purify(&eq.left), purifier.purify(&eq.right)))
        .collect();
    purified.extend(
        purifier
            .named
            .into_iter()
            .map(|(v, t)| Equation::new(Term::Var(v), t)),
    );
    purified
}

struct Purifier<'a> {
    fresh: &'a mut FreshNames,
    named: Vec<(Variable, Term)>,
}

impl Purifier<'_> {
    fn purify(&mut self, t: &Term) -> Term {
        match t {
            Term::Var(_) | Term::Const(_) => t.clone(),
            Term::App(app) => mk_app(
                app.function().clone(),
                app.args().iter().map(|arg| self.name_sums(arg)).collect(),
            ),
            Term::Xor(_) => xor(t.args().iter().map(|s| self.purify(s))),
        }
    }

    /// `t` occurs directly under a free symbol.
    fn name_sums(&mut self, t: &Term) -> Term {
        if !matches!(t, Term::Xor(_)) {
            return self.purify(t);
        }
        let sum = self.purify(t);
        if !matches!(sum, Term::Xor(_)) {
            return sum;
        }
        if let Some((v, _)) = self.named.iter().find(|(_, named)| *named == sum) {
            return Term::Var(v.clone());
        }
        let v = self.fresh.fresh_variable();
        log::trace!("purify: {v} names {sum}");
        self.named.push((v.clone(), sum));
        Term::Var(v)
    }
}

#[ext(EquationsExt)]
impl [Equation] {
    /// Variables occurring under a free function symbol.
    fn constrained_vars(&self) -> BTreeSet<Variable> {
        self.iter()
            .flat_map(|eq| [&eq.left, &eq.right])
            .flat_map(|t| t.subterms())
            .filter(|t| matches!(t, Term::App(_)))
            .flat_map(|t| t.vars().cloned())
            .collect()
    }
}

#[derive(Clone, Debug)]
struct ProofState {
    equations: Vec<Equation>,
    disequations: Vec<Disequation>,
    substitution: Substitution,
}

enum Step {
    Continue(ProofState),
    /// N-Decompose: the unified branch, absent when the pair does not unify, and the refused branch.
    Branch(Option<ProofState>, ProofState),
    Dead,
}

impl std::fmt::Display for ProofState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let eqs: Vec<String> = self.equations.iter().map(|e| e.to_string()).collect();
        let diseqs: Vec<String> = self.disequations.iter().map(|d| d.to_string()).collect();
        write!(
            f,
            "[{}] | [{}] | {}",
            eqs.join(", "),
            diseqs.join(", "),
            self.substitution
        )
    }
}

impl ProofState {
    fn new(equations: Vec<Equation>) -> Self {
        ProofState {
            equations,
            disequations: vec![],
            substitution: Substitution::new(),
        }
    }

    fn normalize(&mut self) {
        for eq in &mut self.equations {
            if !is_zero(&eq.right) {
                let sum = xor([eq.left.clone(), eq.right.clone()]);
                *eq = Equation::new(sum, zero());
            }
        }
    }

    fn apply(mut self, theta: &Substitution) -> ProofState {
        self.equations = self
            .equations
            .iter()
            .map(|e| Equation::new(theta.apply(&e.left), theta.apply(&e.right)))
            .collect();
        self.disequations = self
            .disequations
            .iter()
            .map(|d| Disequation::new(theta.apply(&d.left), theta.apply(&d.right)))
            .collect();
        self.substitution = self.substitution.compose(theta);
        self
    }

    fn step(self) -> Step {
        if let Some(i) = self.equations.iter().position(|e| is_zero(&e.left)) {
            log::trace!("trivial: {}", self.equations[i]);
            let mut next = self;
            next.equations.remove(i);
            return Step::Continue(next);
        }
        if let Some(step) = self.decompose() {
            return step;
        }
        if let Some(theta) = self.subst() {
            log::trace!("subst: {theta}");
            return Step::Continue(self.apply(&theta));
        }
        if let Some(step) = self.n_decompose() {
            return step;
        }
        Step::Dead
    }

    /// `f(s) ⊕ f(t) = 0`.
    fn decompose(&self) -> Option<Step> {
        let (s, t) = self.equations.iter().find_map(|eq| match eq.left.args() {
            [s, t] if matches!(eq.left, Term::Xor(_)) && same_head(s, t) => Some((s, t)),
            _ => None,
        })?;
        match unify_terms(s, t) {
            Ok(theta) => {
                log::trace!("decompose: {s} =? {t} by {theta}");
                Some(Step::Continue(self.clone().apply(&theta)))
            }
            Err(err) => {
                log::trace!("decompose: {err}");
                Some(Step::Dead)
            }
        }
    }

    /// Solves for the first variable that occurs under no free symbol.
    fn subst(&self) -> Option<Substitution> {
        let constrained = self.equations.constrained_vars();
        for eq in &self.equations {
            let summands = xor_to_list(&eq.left);
            for (i, summand) in summands.iter().enumerate() {
                let Term::Var(v) = summand else {
                    continue;
                };
                if constrained.contains(v) {
                    continue;
                }
                let rest = summands
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, t)| t.clone());
                if let Ok(theta) = Substitution::singleton(v.clone(), xor(rest)) {
                    return Some(theta);
                }
            }
        }
        None
    }

    fn refused(&self, s: &Term, t: &Term) -> bool {
        self.disequations
            .iter()
            .any(|d| (d.left == *s && d.right == *t) || (d.left == *t && d.right == *s))
    }

    /// Two summands with the same head either unify or are recorded as distinct.
    fn n_decompose(&self) -> Option<Step> {
        for (i, eq) in self.equations.iter().enumerate() {
            let summands = xor_to_list(&eq.left);
            for j in 0..summands.len() {
                for k in j + 1..summands.len() {
                    let (s, t) = (&summands[j], &summands[k]);
                    if !same_head(s, t) || self.refused(s, t) {
                        continue;
                    }
                    log::trace!("n-decompose: {s} and {t}");
                    let mut refused = self.clone();
                    refused.disequations.push(Disequation::new(s.clone(), t.clone()));
                    let unified = unify_terms(s, t).ok().map(|theta| {
                        let mut next = self.clone();
                        let rest = summands
                            .iter()
                            .enumerate()
                            .filter(|(l, _)| *l != j && *l != k)
                            .map(|(_, u)| u.clone());
                        next.equations[i] = Equation::new(xor(rest), zero());
                        next.apply(&theta)
                    });
                    return Some(Step::Branch(unified, refused));
                }
            }
        }
        None
    }
}

fn same_head(s: &Term, t: &Term) -> bool {
    match (s, t) {
        (Term::App(a1), Term::App(a2)) => a1.function() == a2.function(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::Sig;

    fn solve(equations: &[Equation]) -> Vec<Substitution> {
        match xor_unify(equations, &SearchConfig::default()) {
            Outcome::Unified(found) => found,
            Outcome::NoUnifier => vec![],
            Outcome::SearchBoundExceeded { .. } => panic!("search bound exceeded"),
        }
    }

    fn assert_sound(equations: &[Equation], unifiers: &[Substitution]) {
        for sigma in unifiers {
            for eq in equations {
                assert_eq!(
                    sigma.apply(&eq.left),
                    sigma.apply(&eq.right),
                    "{sigma} does not solve {eq}"
                );
            }
        }
    }

    #[test]
    fn solves_for_unconstrained_variable() {
        let s = Sig::new();
        let eqs = [Equation::new(
            xor([s.x.clone(), s.a.clone()]),
            xor([s.y.clone(), s.b.clone()]),
        )];
        let unifiers = solve(&eqs);
        assert_eq!(unifiers.len(), 1);
        insta::assert_snapshot!(unifiers[0], @"{x ↦ xor(y, a, b)}");
        assert_sound(&eqs, &unifiers);
    }

    #[test]
    fn decomposes_two_applications() {
        let s = Sig::new();
        let eqs = [Equation::new(xor([s.f(&s.x), s.f(&s.a)]), zero())];
        let unifiers = solve(&eqs);
        assert_eq!(unifiers.len(), 1);
        insta::assert_snapshot!(unifiers[0], @"{x ↦ a}");
    }

    #[test]
    fn decompose_failure_has_no_unifier() {
        let s = Sig::new();
        let eqs = [Equation::new(s.f(&s.a), s.f(&s.b))];
        assert_eq!(
            xor_unify(&eqs, &SearchConfig::default()),
            Outcome::NoUnifier
        );
    }

    #[test]
    fn rigid_against_zero_has_no_unifier() {
        let s = Sig::new();
        let eqs = [Equation::new(s.f(&s.x), zero())];
        assert_eq!(
            xor_unify(&eqs, &SearchConfig::default()),
            Outcome::NoUnifier
        );
    }

    #[test]
    fn purification_names_nested_sums_once() {
        let s = Sig::new();
        let sum = xor([s.c.clone(), s.x.clone()]);
        let eqs = [Equation::new(s.f(&sum), s.h(&s.f(&sum)))];
        let mut fresh = FreshNames::new("N");
        fresh.avoid_equations(&eqs);
        let purified: Vec<String> = purify(&eqs, &mut fresh).iter().map(|e| e.to_string()).collect();
        assert_eq!(purified, ["f(N1) = h(f(N1))", "N1 = xor(x, c)"]);
    }

    #[test]
    fn free_summand_absorbs_the_rest() {
        let s = Sig::new();
        let eqs = [Equation::new(
            xor([s.f(&s.x), s.f(&s.y), s.f(&s.a), s.z.clone()]),
            zero(),
        )];
        let unifiers = solve(&eqs);
        assert_eq!(unifiers.len(), 1);
        insta::assert_snapshot!(unifiers[0], @"{z ↦ xor(f(x), f(y), f(a))}");
    }

    #[test]
    fn n_decompose_explores_both_branches() {
        let s = Sig::new();
        let eqs = [Equation::new(
            xor([s.f(&s.x), s.f(&s.y), s.f(&s.a), s.f(&s.b)]),
            zero(),
        )];
        let unifiers = solve(&eqs);
        let shown: Vec<String> = unifiers.iter().map(|u| u.to_string()).collect();
        assert_eq!(shown, ["{x ↦ a, y ↦ b}", "{x ↦ b, y ↦ a}"]);
        assert_sound(&eqs, &unifiers);
        for sigma in &unifiers {
            assert!(sigma.is_idempotent());
        }
    }

    #[test]
    fn constrained_variables_are_not_eliminated() {
        let s = Sig::new();
        // x ⊕ f(x) = 0 has no solution without infinite terms
        let eqs = [Equation::new(s.x.clone(), s.f(&s.x))];
        assert_eq!(
            xor_unify(&eqs, &SearchConfig::default()),
            Outcome::NoUnifier
        );
    }

    #[test]
    fn cyclic_system_with_three_equations() {
        let s = Sig::new();
        let x1: Term = Variable::new("x1").unwrap().into();
        let x2: Term = Variable::new("x2").unwrap().into();
        let x3: Term = Variable::new("x3").unwrap().into();
        let eqs = [
            Equation::new(zero(), xor([s.x.clone(), s.f(&s.y), s.f(&x1)])),
            Equation::new(zero(), xor([s.y.clone(), s.f(&s.z), s.f(&x2)])),
            Equation::new(zero(), xor([s.z.clone(), s.f(&s.x), s.f(&x3)])),
        ];
        let unifiers = solve(&eqs);
        assert!(!unifiers.is_empty());
        assert_sound(&eqs, &unifiers);
    }

    #[test]
    fn tiny_budget_is_reported() {
        let s = Sig::new();
        let eqs = [Equation::new(
            xor([s.x.clone(), s.a.clone()]),
            xor([s.y.clone(), s.b.clone()]),
        )];
        let outcome = xor_unify(&eqs, &SearchConfig::with_max_steps(1));
        assert_eq!(outcome, Outcome::SearchBoundExceeded { found: vec![] });
    }
}
