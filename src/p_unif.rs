//! Unification restricted to what an adversary can compute.
//!
//! Every XOR unifier is checked against per-variable constraints: the terms
//! the adversary knew when it chose the variable. A unifier that maps a
//! variable outside its constraints is repaired by deciding an extra XOR
//! equation, or by refusing that decision and trying the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::repeat_n;

use crate::fresh::FreshNames;
use crate::search::{push_unique, Budget, Outcome, SearchConfig};
use crate::subst::Substitution;
use crate::term::{Disequation, Equation, Function, Term, Theory, Variable};
use crate::unif::{unify_terms, UnifyError};
use crate::xor::{is_zero, xor, xor_to_list, zero};
use crate::xor_unif::xor_unify_with;

/// For each variable, the terms known to the adversary when it chose the variable.
pub type Constraints = BTreeMap<Variable, Vec<Term>>;

/// Which function symbols the adversary can evaluate on its own.
#[derive(Debug, Clone, Default)]
pub struct AdversaryModel {
    public: BTreeSet<Function>,
}

impl AdversaryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public(mut self, function: &Function) -> Self {
        self.public.insert(function.clone());
        self
    }

    /// XOR is always computable.
    pub fn computable(&self, function: &Function) -> bool {
        function.theory() == Theory::Xor || self.public.contains(function)
    }
}

#[derive(Debug, Clone)]
struct Problem {
    constraints: Constraints,
    /// Left sides of refused decisions, each meaning `lhs ≠ 0`.
    disequations: Vec<Disequation>,
}

impl Problem {
    fn instantiate(&self, theta: &Substitution) -> Problem {
        let constraints = self
            .constraints
            .iter()
            .map(|(v, terms)| (v.clone(), terms.iter().map(|t| theta.apply(t)).collect()))
            .collect();
        let disequations = self
            .disequations
            .iter()
            .map(|d| Disequation::new(theta.apply(&d.left), theta.apply(&d.right)))
            .collect();
        Problem {
            constraints,
            disequations,
        }
    }

    fn refuse(&self, lhs: Term) -> Problem {
        let mut next = self.clone();
        next.disequations.push(Disequation::new(lhs, zero()));
        next
    }

    fn refused(&self, lhs: &Term) -> bool {
        self.disequations.iter().any(|d| d.left == *lhs)
    }
}

/// P-unifiers of `equations`.
///
/// Every returned substitution is an XOR unifier of `equations` that maps each
/// constrained variable to a term built from its constraint terms with
/// computable symbols.
pub fn p_unify(
    equations: &[Equation],
    constraints: &Constraints,
    model: &AdversaryModel,
    config: &SearchConfig,
) -> Outcome {
    let mut fresh = FreshNames::new("N");
    fresh.avoid_equations(equations);
    for (v, terms) in constraints {
        fresh.avoid([v.symbol()]);
        for t in terms {
            fresh.avoid_term(t);
        }
    }
    let mut budget = Budget::new(config);

    let unifiers = match xor_unify_with(equations, &mut fresh, &mut budget).into_result() {
        Ok(unifiers) => unifiers,
        Err(_) => return Outcome::SearchBoundExceeded { found: vec![] },
    };
    log::debug!("p_unify: {} xor unifiers to check", unifiers.len());

    let problem = Problem {
        constraints: constraints.clone(),
        disequations: vec![],
    };
    let mut stack: Vec<(Substitution, Problem)> = unifiers
        .into_iter()
        .rev()
        .map(|sigma| (sigma, problem.clone()))
        .collect();
    let mut found = Vec::new();

    while let Some((sigma, problem)) = stack.pop() {
        if budget.spend().is_err() {
            log::debug!("p_unify: search bound exceeded after {} steps", budget.spent());
            return Outcome::SearchBoundExceeded { found };
        }
        let bad = bad_subterms(&sigma, &problem, model);
        if bad.is_empty() {
            log::debug!("p_unify: p-unifier {sigma}");
            push_unique(&mut found, sigma);
            continue;
        }
        if log::log_enabled!(log::Level::Trace) {
            let sp = repeat_n(' ', stack.len()).collect::<String>();
            let shown: Vec<String> = bad.iter().map(|(v, t)| format!("{v}: {t}")).collect();
            log::trace!("{sp}{sigma} has bad subterms [{}]", shown.join(", "));
        }
        let Some(lhs) = decide(&bad, &problem, model) else {
            log::trace!("p_unify: no decision left for {sigma}");
            continue;
        };
        log::debug!("p_unify: decide {lhs} = 0");
        let refused = problem.refuse(lhs.clone());
        match xor_unify_with(&[Equation::new(lhs, zero())], &mut fresh, &mut budget) {
            Outcome::SearchBoundExceeded { .. } => {
                return Outcome::SearchBoundExceeded { found };
            }
            Outcome::NoUnifier => stack.push((sigma, refused)),
            Outcome::Unified(thetas) => {
                stack.push((sigma.clone(), refused));
                for theta in thetas.iter().rev() {
                    stack.push((sigma.compose(theta), problem.instantiate(theta)));
                }
            }
        }
    }
    Outcome::from_solutions(found)
}

/// Every `(v, t)` where `t` is a subterm of `vσ` the adversary could not have built.
///
/// A bad subterm of a computable application or sum makes the whole term bad;
/// children come before their parent.
fn bad_subterms(
    sigma: &Substitution,
    problem: &Problem,
    model: &AdversaryModel,
) -> Vec<(Variable, Term)> {
    let mut bad = Vec::new();
    for (v, t) in sigma {
        let Some(terms) = problem.constraints.get(v) else {
            continue;
        };
        let earlier = sigma.restrict(sigma.domain().filter(|w| w.symbol() < v.symbol()));
        let allowed: Vec<Term> = terms.iter().map(|c| earlier.apply(c)).collect();
        collect_bad(v, t, &allowed, model, &mut bad);
    }
    bad
}

fn collect_bad(
    v: &Variable,
    t: &Term,
    allowed: &[Term],
    model: &AdversaryModel,
    bad: &mut Vec<(Variable, Term)>,
) -> bool {
    if is_zero(t) || allowed.contains(t) {
        return false;
    }
    let recurse = match t {
        Term::Var(_) | Term::Const(_) => false,
        Term::App(app) => model.computable(app.function()),
        Term::Xor(_) => true,
    };
    if !recurse {
        bad.push((v.clone(), t.clone()));
        return true;
    }
    let mut any = false;
    for arg in t.args() {
        any |= collect_bad(v, arg, allowed, model, bad);
    }
    if any {
        bad.push((v.clone(), t.clone()));
    }
    any
}

/// Left side of the next equation `lhs = 0` to try, if any is not yet refused.
fn decide(bad: &[(Variable, Term)], problem: &Problem, model: &AdversaryModel) -> Option<Term> {
    for (v, t) in bad {
        let candidates = match t {
            Term::Const(_) => continue,
            Term::App(app) if model.computable(app.function()) => continue,
            Term::Var(_) => vec![t.clone()],
            Term::App(_) => problem
                .constraints
                .get(v)
                .into_iter()
                .flatten()
                .filter(|p| !p.is_var())
                .map(|p| xor([t.clone(), p.clone()]))
                .collect(),
            Term::Xor(_) => sum_candidates(&xor_to_list(t)),
        };
        let decision = candidates
            .into_iter()
            .find(|lhs| !is_zero(lhs) && !problem.refused(lhs));
        if decision.is_some() {
            return decision;
        }
    }
    None
}

/// Cancel two summands, or solve a variable summand for a subset of the others.
fn sum_candidates(summands: &[Term]) -> Vec<Term> {
    let vars: Vec<&Term> = summands.iter().filter(|s| s.is_var()).collect();
    if vars.is_empty() {
        return combinations(summands.len(), 2)
            .into_iter()
            .map(|pair| xor(pair.iter().map(|&i| summands[i].clone())))
            .collect();
    }
    let mut candidates = Vec::new();
    for var in vars {
        for k in 0..=summands.len() {
            for subset in combinations(summands.len(), k) {
                let mut chosen: Vec<Term> = subset.iter().map(|&i| summands[i].clone()).collect();
                if !chosen.contains(var) {
                    chosen.push(var.clone());
                }
                candidates.push(xor(chosen));
            }
        }
    }
    candidates
}

/// `k`-element index subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k > n {
        return vec![];
    }
    let mut result = Vec::new();
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        result.push(indices.clone());
        let Some(i) = (0..k).rev().find(|&i| indices[i] != i + n - k) else {
            return result;
        };
        indices[i] += 1;
        for j in i + 1..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

/// Syntactic unification whose non-variable bindings must appear in the constraints.
pub fn p_syntactic(
    left: &Term,
    right: &Term,
    constraints: &Constraints,
) -> Result<Substitution, UnifyError> {
    let sigma = unify_terms(left, right)?;
    for (x, t) in &sigma {
        if t.is_var() {
            continue;
        }
        if let Some(allowed) = constraints.get(x) {
            if !allowed.contains(t) {
                return Err(UnifyError::ConstraintViolation {
                    var: x.clone(),
                    term: t.clone(),
                });
            }
        }
    }
    Ok(sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::Sig;

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    #[test]
    fn xor_is_always_computable() {
        let s = Sig::new();
        let model = AdversaryModel::new().with_public(&s.h);
        assert!(model.computable(&crate::xor::xor_function()));
        assert!(model.computable(&s.h));
        assert!(!model.computable(&s.f));
    }

    #[test]
    fn lexicographic_combinations() {
        assert_eq!(combinations(3, 0), vec![Vec::<usize>::new()]);
        assert_eq!(
            combinations(3, 2),
            vec![vec![0, 1], vec![0, 2], vec![1, 2]]
        );
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(2, 3).is_empty());
    }

    #[test]
    fn unreachable_secret_has_no_p_unifier() {
        let s = Sig::new();
        let eqs = [Equation::new(s.x.clone(), s.f(&s.b))];
        let constraints = Constraints::from([(s.var(&s.x), vec![s.a.clone(), zero()])]);
        let outcome = p_unify(&eqs, &constraints, &AdversaryModel::new(), &SearchConfig::default());
        assert_eq!(outcome, Outcome::NoUnifier);
    }

    #[test]
    fn public_function_of_known_terms_is_accepted() {
        let s = Sig::new();
        let eqs = [Equation::new(s.x.clone(), s.h(&s.a))];
        let constraints = Constraints::from([(s.var(&s.x), vec![s.a.clone()])]);
        let model = AdversaryModel::new().with_public(&s.h);
        let outcome = p_unify(&eqs, &constraints, &model, &SearchConfig::default());
        let unifiers = outcome.into_solutions();
        assert_eq!(unifiers.len(), 1);
        insta::assert_snapshot!(unifiers[0], @"{x ↦ h(a)}");
    }

    #[test]
    fn unconstrained_unifier_passes_through() {
        let s = Sig::new();
        let eqs = [Equation::new(s.x.clone(), s.f(&s.b))];
        let outcome = p_unify(&eqs, &Constraints::new(), &AdversaryModel::new(), &SearchConfig::default());
        assert_eq!(outcome.into_solutions().len(), 1);
    }

    #[test]
    fn cbc_collision_is_found() {
        let s = Sig::new();
        let (x1, x2) = (var("x1"), var("x2"));
        let sum = xor([s.c.clone(), x1.clone().into()]);
        let eqs = [Equation::new(
            s.f(&sum),
            s.f(&xor([x2.clone().into(), s.f(&sum)])),
        )];
        let constraints = Constraints::from([
            (x1.clone(), vec![s.c.clone(), zero()]),
            (
                x2.clone(),
                vec![s.c.clone(), zero(), x1.clone().into(), s.f(&sum)],
            ),
        ]);
        let outcome = p_unify(&eqs, &constraints, &AdversaryModel::new(), &SearchConfig::default());
        let unifiers = outcome.into_solutions();
        assert_eq!(unifiers.len(), 2);
        insta::assert_snapshot!(unifiers[0].restrict([&x1, &x2]), @"{x1 ↦ c, x2 ↦ f(0)}");
        insta::assert_snapshot!(unifiers[1].restrict([&x1, &x2]), @"{x1 ↦ 0, x2 ↦ xor(c, f(c))}");
        for sigma in &unifiers {
            assert_eq!(sigma.apply(&eqs[0].left), sigma.apply(&eqs[0].right));
        }
    }

    #[test]
    fn budget_overrun_is_not_secure() {
        let s = Sig::new();
        let eqs = [Equation::new(s.x.clone(), s.f(&s.b))];
        let constraints = Constraints::from([(s.var(&s.x), vec![s.a.clone(), zero()])]);
        let outcome = p_unify(
            &eqs,
            &constraints,
            &AdversaryModel::new(),
            &SearchConfig::with_max_steps(2),
        );
        assert!(!outcome.is_exhaustive());
        assert_ne!(outcome.verdict(), crate::search::Verdict::Secure);
    }

    #[test]
    fn p_syntactic_checks_rigid_bindings() {
        let s = Sig::new();
        let constraints = Constraints::from([(s.var(&s.x), vec![s.a.clone()])]);
        let sigma = p_syntactic(&s.f(&s.x), &s.f(&s.a), &constraints).unwrap();
        insta::assert_snapshot!(sigma, @"{x ↦ a}");

        let err = p_syntactic(&s.f(&s.x), &s.f(&s.b), &constraints).unwrap_err();
        insta::assert_snapshot!(err, @"x is bound to b, which its constraints do not allow");

        assert!(p_syntactic(&s.x, &s.y, &constraints).is_ok());
        assert!(matches!(
            p_syntactic(&s.f(&s.x), &s.h(&s.a), &constraints),
            Err(UnifyError::FunctionClash { .. })
        ));
    }
}
