//! Rewrite rules applied through syntactic unification.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, ensure, Context};

use crate::search::SearchConfig;
use crate::subst::Substitution;
use crate::term::{Constant, Equation, Name, Term, Variable};
use crate::unif::{unify_terms, UnifyError};
use crate::xor_unif::xor_unify;

/// Path from the root of a term: 1-based argument indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position(Vec<usize>);

impl Position {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(indices: Vec<usize>) -> Self {
        Position(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, index: usize) -> Position {
        let mut indices = self.0.clone();
        indices.push(index);
        Position(indices)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "ε");
        }
        let indices: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", indices.join("."))
    }
}

impl FromStr for Position {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "ε" {
            return Ok(Position::root());
        }
        let mut indices = Vec::new();
        for part in s.split('.') {
            let index: usize = part
                .parse()
                .with_context(|| format!("invalid position {s:?}"))?;
            ensure!(index >= 1, "positions are 1-based: {s:?}");
            indices.push(index);
        }
        Ok(Position(indices))
    }
}

pub fn subterm_at<'a>(term: &'a Term, pos: &Position) -> anyhow::Result<&'a Term> {
    let mut current = term;
    for &i in pos.indices() {
        match current.args().get(i.wrapping_sub(1)) {
            Some(arg) => current = arg,
            None => bail!("position {pos} does not exist in {term}"),
        }
    }
    Ok(current)
}

/// `term` with the subterm at `pos` replaced by `new`.
pub fn replace_at(term: &Term, pos: &Position, new: Term) -> anyhow::Result<Term> {
    subterm_at(term, pos)?;
    Ok(replace_valid(term, pos.indices(), new))
}

fn replace_valid(term: &Term, indices: &[usize], new: Term) -> Term {
    let Some((&i, rest)) = indices.split_first() else {
        return new;
    };
    let mut args = term.args().to_vec();
    args[i - 1] = replace_valid(&args[i - 1], rest, new);
    term.with_args(args)
}

/// Every position of `term` in pre-order.
pub fn positions(term: &Term) -> Vec<Position> {
    let mut result = Vec::new();
    let mut stack = vec![(Position::root(), term)];
    while let Some((pos, t)) = stack.pop() {
        for (i, arg) in t.args().iter().enumerate().rev() {
            stack.push((pos.child(i + 1), arg));
        }
        result.push(pos);
    }
    result
}

/// Turns every variable into a constant with the same symbol and sort.
pub fn freeze(term: &Term) -> Term {
    match term {
        Term::Var(v) => Term::Const(Constant::from_name(v.symbol().clone(), v.sort().cloned())),
        Term::Const(_) => term.clone(),
        Term::App(_) | Term::Xor(_) => term.with_args(term.args().iter().map(freeze).collect()),
    }
}

/// Freezes `term` with constants that clash with none of `taken`, and returns the way back.
fn freeze_apart(term: &Term, taken: &BTreeSet<Name>) -> anyhow::Result<(Term, BTreeMap<Constant, Variable>)> {
    let mut sigma = Substitution::new();
    let mut thawing = BTreeMap::new();
    let mut used = taken.clone();
    for v in term.unique_vars() {
        let name = suffix_until(v.symbol(), |n| used.contains(n));
        used.insert(name.clone());
        let c = Constant::from_name(name, v.sort().cloned());
        sigma.add(v.clone(), Term::Const(c.clone()))?;
        thawing.insert(c, v);
    }
    Ok((sigma.apply(term), thawing))
}

fn thaw(term: &Term, thawing: &BTreeMap<Constant, Variable>) -> Term {
    match term {
        Term::Const(c) => thawing
            .get(c)
            .map_or_else(|| term.clone(), |v| Term::Var(v.clone())),
        Term::Var(_) => term.clone(),
        Term::App(_) | Term::Xor(_) => {
            term.with_args(term.args().iter().map(|t| thaw(t, thawing)).collect())
        }
    }
}

/// Appends `_1` to `name` until `taken` rejects it no more.
fn suffix_until(name: &Name, taken: impl Fn(&Name) -> bool) -> Name {
    let mut name = name.clone();
    while taken(&name) {
        name = Name::intern_unchecked(&format!("{name}_1"));
    }
    name
}

/// First unifier of `pattern` and the ground `frozen` modulo XOR.
fn match_modulo_xor(pattern: &Term, frozen: &Term) -> Option<Substitution> {
    let equations = [Equation::new(pattern.clone(), frozen.clone())];
    let sigma = xor_unify(&equations, &SearchConfig::default())
        .into_solutions()
        .into_iter()
        .next();
    if sigma.is_none() {
        log::trace!("rewrite: {pattern} does not match {frozen} modulo XOR");
    }
    sigma
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RewriteRule {
    hypothesis: Term,
    conclusion: Term,
}

impl Display for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.hypothesis, self.conclusion)
    }
}

impl RewriteRule {
    pub fn new(hypothesis: Term, conclusion: Term) -> Self {
        RewriteRule {
            hypothesis,
            conclusion,
        }
    }

    pub fn hypothesis(&self) -> &Term {
        &self.hypothesis
    }

    pub fn conclusion(&self) -> &Term {
        &self.conclusion
    }

    pub fn converse(&self) -> RewriteRule {
        RewriteRule::new(self.conclusion.clone(), self.hypothesis.clone())
    }

    /// The rule with its variables renamed away from those of `term`.
    fn renamed_apart(&self, term: &Term) -> anyhow::Result<RewriteRule> {
        let term_vars = term.unique_vars();
        let mut rule_vars = self.hypothesis.unique_vars();
        rule_vars.extend(self.conclusion.unique_vars());
        let mut used: BTreeSet<Name> = term_vars
            .iter()
            .chain(&rule_vars)
            .map(|v| v.symbol().clone())
            .collect();
        let mut renaming = Substitution::new();
        for v in rule_vars.intersection(&term_vars) {
            let name = suffix_until(v.symbol(), |n| used.contains(n));
            used.insert(name.clone());
            renaming.add(v.clone(), Term::Var(Variable::from_name(name, v.sort().cloned())))?;
        }
        Ok(RewriteRule::new(
            renaming.apply(&self.hypothesis),
            renaming.apply(&self.conclusion),
        ))
    }

    fn rewrite_root(&self, term: &Term) -> anyhow::Result<Option<Term>> {
        let rule = self.renamed_apart(term)?;
        let mut taken: BTreeSet<Name> = term.unique_constants().iter().map(|c| c.symbol().clone()).collect();
        for side in [&rule.hypothesis, &rule.conclusion] {
            taken.extend(side.unique_constants().iter().map(|c| c.symbol().clone()));
        }
        let (frozen, thawing) = freeze_apart(term, &taken)?;
        let matched = match unify_terms(&rule.hypothesis, &frozen) {
            Ok(sigma) => Some(sigma),
            Err(UnifyError::OutsideTheory { .. }) => match_modulo_xor(&rule.hypothesis, &frozen),
            Err(err) => {
                log::trace!("rewrite: {rule} does not match {term}: {err}");
                None
            }
        };
        Ok(matched.map(|sigma| thaw(&sigma.apply(&rule.conclusion), &thawing)))
    }

    /// Rewrites `term` at `pos`, or `None` when the hypothesis does not match there.
    pub fn apply_at(&self, term: &Term, pos: &Position) -> anyhow::Result<Option<Term>> {
        let sub = subterm_at(term, pos)?;
        let Some(rewritten) = self.rewrite_root(sub)? else {
            return Ok(None);
        };
        log::debug!("rewrite: {self} at {pos} gives {rewritten}");
        Ok(Some(replace_at(term, pos, rewritten)?))
    }

    /// Every position where the rule applies, with the rewritten term.
    pub fn apply(&self, term: &Term) -> BTreeMap<Position, Term> {
        let mut result = BTreeMap::new();
        for pos in positions(term) {
            match self.apply_at(term, &pos) {
                Ok(Some(t)) => {
                    result.insert(pos, t);
                }
                Ok(None) => {}
                Err(err) => log::debug!("rewrite: skipping {pos}: {err}"),
            }
        }
        result
    }
}
