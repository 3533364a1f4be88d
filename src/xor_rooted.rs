//! Collision search for XOR-rooted protocol outputs.
//!
//! Each protocol variable may be any XOR combination of its constraint
//! terms, so it is replaced by `b1 * t1 ⊕ … ⊕ bn * tn` with fresh boolean
//! coefficients. The attacker then saturates the outputs under cancel and
//! combine; an output combination that reaches `0` is a collision.

use std::collections::{BTreeMap, BTreeSet};

use crate::bool_unif::{boolean_unify_with, is_maximal, mk_mul, overlapping, to_bterm, to_term, BSubstitution, BTerm};
use crate::fresh::FreshNames;
use crate::p_unif::Constraints;
use crate::search::{push_unique, Budget, Exhausted, Outcome, SearchConfig};
use crate::subst::Substitution;
use crate::term::{Term, Variable};
use crate::xor::xor;

pub struct XorRootedSecurity {
    terms: Vec<Term>,
    constraints: Constraints,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct AttackerTerm {
    term: BTerm,
    /// Indices of the protocol outputs summed into this term.
    outputs: BTreeSet<usize>,
    bsub: BSubstitution,
}

#[derive(Default)]
struct Saturation {
    cancel_done: Vec<AttackerTerm>,
    raw: Vec<AttackerTerm>,
    generated: Vec<AttackerTerm>,
}

impl XorRootedSecurity {
    pub fn new(terms: Vec<Term>, constraints: Constraints) -> Self {
        XorRootedSecurity { terms, constraints }
    }

    /// Substitutions under which some XOR of the outputs is `0`.
    pub fn solve(&self, config: &SearchConfig) -> Outcome {
        let mut budget = Budget::new(config);
        let coefficients = self.coefficients();
        let mut sat = Saturation::default();
        for (i, t) in self.terms.iter().enumerate() {
            let term = to_bterm(t).substitute(&bindings(&coefficients)).simplify();
            let attacker = AttackerTerm {
                term,
                outputs: BTreeSet::from([i]),
                bsub: BSubstitution::new(),
            };
            sat.generated.push(attacker.clone());
            sat.raw.push(attacker);
        }

        let exhausted = sat.saturate(&mut budget).is_err();
        let mut found = Vec::new();
        for attacker in sat.cancel_done.iter().filter(|a| a.term == BTerm::Zero) {
            log::debug!("xor_rooted: outputs {:?} cancel with {}", attacker.outputs, attacker.bsub);
            if let Some(sigma) = instantiate(&coefficients, &attacker.bsub) {
                push_unique(&mut found, sigma);
            }
        }
        if exhausted {
            log::debug!("xor_rooted: search bound exceeded after {} steps", budget.spent());
            return Outcome::SearchBoundExceeded { found };
        }
        Outcome::from_solutions(found)
    }

    /// Binds each constrained variable, in symbol order, to a coefficient sum over its constraint terms.
    fn coefficients(&self) -> Vec<(Variable, BTerm)> {
        let mut fresh = FreshNames::new("b");
        for t in &self.terms {
            fresh.avoid_term(t);
        }
        let mut pending: BTreeMap<Variable, Vec<BTerm>> = BTreeMap::new();
        for (v, terms) in &self.constraints {
            fresh.avoid([v.symbol()]);
            for t in terms {
                fresh.avoid_term(t);
            }
            pending.insert(v.clone(), terms.iter().map(|t| to_bterm(&drop_top_vars(t))).collect());
        }

        let mut bound: Vec<(Variable, BTerm)> = Vec::new();
        while let Some((v, terms)) = pending.pop_first() {
            let known = bindings(&bound);
            let mut summands = Vec::new();
            for t in terms {
                let b = BTerm::BoolVar(fresh.fresh_name());
                for s in t.substitute(&known).summands() {
                    summands.push(mk_mul(b.clone(), s));
                }
            }
            let range = BTerm::Xor(summands).simplify();
            log::debug!("xor_rooted: {v} ↦ {range}");
            bound.push((v, range));
        }
        bound
    }
}

fn bindings(bound: &[(Variable, BTerm)]) -> BTreeMap<Variable, BTerm> {
    bound.iter().cloned().collect()
}

/// Variables that occur as summands of a known sum are known themselves.
fn drop_top_vars(t: &Term) -> Term {
    match t {
        Term::Xor(x) => xor(x.summands().iter().filter(|s| !s.is_var()).cloned()),
        _ => t.clone(),
    }
}

fn instantiate(coefficients: &[(Variable, BTerm)], bsub: &BSubstitution) -> Option<Substitution> {
    let mut sigma = Substitution::new();
    for (v, range) in coefficients {
        let t = to_term(&bsub.apply(range).simplify());
        if let Err(err) = sigma.add(v.clone(), t) {
            log::debug!("xor_rooted: dropping collision: {err}");
            return None;
        }
    }
    Some(sigma)
}

impl Saturation {
    fn saturate(&mut self, budget: &mut Budget) -> Result<(), Exhausted> {
        loop {
            budget.spend()?;
            if self.cancel(budget)? {
                continue;
            }
            if !self.combine(budget)? {
                return Ok(());
            }
        }
    }

    fn record(&mut self, candidate: AttackerTerm, new: &mut Vec<AttackerTerm>) {
        if !self.generated.contains(&candidate) {
            self.generated.push(candidate.clone());
            new.push(candidate);
        }
    }

    /// Cancels two summands of the first raw term against each other.
    fn cancel(&mut self, budget: &mut Budget) -> Result<bool, Exhausted> {
        let Some(first) = self.raw.first().cloned() else {
            return Ok(false);
        };
        match &first.term {
            BTerm::Mul(..) => {
                self.raw.remove(0);
                let theta = match first.term.coefficient() {
                    Some(b) => BSubstitution::singleton(b.clone(), false),
                    None => BSubstitution::new(),
                };
                if let Some(bsub) = theta.compose(&first.bsub) {
                    let zeroed = AttackerTerm {
                        term: BTerm::Zero,
                        bsub,
                        ..first
                    };
                    self.generated.push(zeroed.clone());
                    self.cancel_done.push(zeroed);
                }
                return Ok(true);
            }
            BTerm::Xor(args) => {
                for i in 0..args.len() {
                    if !is_maximal(&args[i], args) {
                        continue;
                    }
                    for j in i + 1..args.len() {
                        if !is_maximal(&args[j], args) || !overlapping(&args[i], &args[j]) {
                            continue;
                        }
                        let subs = boolean_unify_with(&args[i], &args[j], budget).into_result()?;
                        let mut new = Vec::new();
                        for sub in subs {
                            let Some(bsub) = sub.compose(&first.bsub) else {
                                continue;
                            };
                            let candidate = AttackerTerm {
                                term: sub.apply(&first.term).simplify(),
                                outputs: first.outputs.clone(),
                                bsub,
                            };
                            self.record(candidate, &mut new);
                        }
                        if !new.is_empty() {
                            log::trace!("cancel: {} with {}", args[i], args[j]);
                            self.raw.extend(new);
                            return Ok(true);
                        }
                    }
                }
            }
            _ => {}
        }
        let first = self.raw.remove(0);
        self.cancel_done.push(first);
        Ok(true)
    }

    /// Sums two finished terms from disjoint outputs so that a summand of each cancels.
    fn combine(&mut self, budget: &mut Budget) -> Result<bool, Exhausted> {
        for k in 0..self.cancel_done.len() {
            for l in k + 1..self.cancel_done.len() {
                let (first, second) = (self.cancel_done[k].clone(), self.cancel_done[l].clone());
                if !first.outputs.is_disjoint(&second.outputs) {
                    continue;
                }
                let (list1, list2) = (first.term.summands(), second.term.summands());
                for s in list1.iter().filter(|s| is_maximal(s, &list1)) {
                    for t in list2.iter().filter(|t| is_maximal(t, &list2)) {
                        if !overlapping(s, t) {
                            continue;
                        }
                        let subs = boolean_unify_with(s, t, budget).into_result()?;
                        let mut new = Vec::new();
                        for sub in subs {
                            let Some(bsub) = sub
                                .compose(&first.bsub)
                                .and_then(|b| b.compose(&second.bsub))
                            else {
                                continue;
                            };
                            let sum = BTerm::Xor(list1.iter().chain(&list2).cloned().collect());
                            let candidate = AttackerTerm {
                                term: sub.apply(&sum).simplify(),
                                outputs: first.outputs.union(&second.outputs).copied().collect(),
                                bsub,
                            };
                            self.record(candidate, &mut new);
                        }
                        if !new.is_empty() {
                            log::trace!("combine: {s} with {t}");
                            self.raw.extend(new);
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Verdict;
    use crate::term::tests::Sig;

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    #[test]
    fn reused_input_collides() {
        let s = Sig::new();
        let x1 = var("x1");
        let terms = vec![s.c.clone(), xor([s.c.clone(), x1.clone().into()])];
        let constraints = Constraints::from([(x1.clone(), vec![s.c.clone()])]);
        let outcome = XorRootedSecurity::new(terms, constraints).solve(&SearchConfig::default());
        let expected = Substitution::singleton(x1, s.c.clone()).unwrap();
        assert!(outcome.solutions().contains(&expected));
    }

    #[test]
    fn ofb_outputs_do_not_collide() {
        let s = Sig::new();
        let (x1, x2) = (var("x1"), var("x2"));
        let fc = s.f(&s.c);
        let terms = vec![
            s.c.clone(),
            xor([fc.clone(), x1.clone().into()]),
            xor([s.f(&fc), x2.clone().into()]),
        ];
        let constraints = Constraints::from([
            (x1.clone(), vec![s.c.clone()]),
            (x2, vec![s.c.clone(), xor([fc, x1.into()])]),
        ]);
        let outcome = XorRootedSecurity::new(terms, constraints).solve(&SearchConfig::default());
        assert_eq!(outcome.verdict(), Verdict::Secure);
    }

    #[test]
    fn coefficients_follow_variable_order() {
        let s = Sig::new();
        let (x1, x2) = (var("x1"), var("x2"));
        let fc = s.f(&s.c);
        let constraints = Constraints::from([
            (x2, vec![s.c.clone(), xor([fc.clone(), x1.clone().into()])]),
            (x1, vec![s.c.clone()]),
        ]);
        let security = XorRootedSecurity::new(vec![], constraints);
        let shown: Vec<String> = security
            .coefficients()
            .iter()
            .map(|(v, t)| format!("{v} ↦ {t}"))
            .collect();
        assert_eq!(shown, ["x1 ↦ b1*c", "x2 ↦ xor(b2*c, b3*f(c))"]);
    }

    #[test]
    fn tiny_budget_is_inconclusive() {
        let s = Sig::new();
        let x1 = var("x1");
        let terms = vec![s.c.clone(), xor([s.c.clone(), x1.clone().into()])];
        let constraints = Constraints::from([(x1, vec![s.c.clone()])]);
        let outcome = XorRootedSecurity::new(terms, constraints).solve(&SearchConfig::with_max_steps(1));
        assert!(!outcome.is_exhaustive());
        assert_eq!(outcome.verdict(), Verdict::Inconclusive);
    }
}
