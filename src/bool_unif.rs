//! Terms with boolean coefficients and their unification.
//!
//! A coefficient `b * t` stands for `t` when `b = 1` and for `0` when
//! `b = 0`. Unifying two such terms means finding values for the
//! coefficients that make their sum vanish.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::iter::repeat_n;

use crate::search::{push_unique, Budget, Outcome, SearchConfig};
use crate::term::{mk_app, Constant, Function, Name, Term, Variable};
use crate::xor::{is_zero, xor, zero};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BTerm {
    Zero,
    One,
    Const(Constant),
    /// A boolean coefficient.
    BoolVar(Name),
    /// A protocol variable.
    Var(Variable),
    App(Function, Vec<BTerm>),
    /// Summands in order; not necessarily simplified.
    Xor(Vec<BTerm>),
    Mul(Box<BTerm>, Box<BTerm>),
}

pub fn mk_mul(left: BTerm, right: BTerm) -> BTerm {
    BTerm::Mul(Box::new(left), Box::new(right))
}

impl Display for BTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BTerm::Zero => write!(f, "0"),
            BTerm::One => write!(f, "1"),
            BTerm::Const(c) => write!(f, "{c}"),
            BTerm::BoolVar(name) => write!(f, "{name}"),
            BTerm::Var(v) => write!(f, "{v}"),
            BTerm::App(function, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{function}({})", args.join(", "))
            }
            BTerm::Xor(args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "xor({})", args.join(", "))
            }
            BTerm::Mul(left, right) => write!(f, "{left}*{right}"),
        }
    }
}

impl BTerm {
    pub fn simplify(&self) -> BTerm {
        match self {
            BTerm::Zero | BTerm::One | BTerm::Const(_) | BTerm::BoolVar(_) | BTerm::Var(_) => {
                self.clone()
            }
            BTerm::App(function, args) => {
                BTerm::App(function.clone(), args.iter().map(BTerm::simplify).collect())
            }
            BTerm::Xor(args) => {
                let mut result: Vec<BTerm> = Vec::new();
                for arg in args.iter().map(BTerm::simplify) {
                    let flat = match arg {
                        BTerm::Xor(inner) => inner,
                        other => vec![other],
                    };
                    for t in flat {
                        if t == BTerm::Zero {
                            continue;
                        }
                        match result.iter().position(|r| *r == t) {
                            Some(i) => {
                                result.remove(i);
                            }
                            None => result.push(t),
                        }
                    }
                }
                match result.len() {
                    0 => BTerm::Zero,
                    1 => result.remove(0),
                    _ => BTerm::Xor(result),
                }
            }
            BTerm::Mul(left, right) => {
                let (left, right) = (left.simplify(), right.simplify());
                if left == BTerm::Zero || right == BTerm::Zero {
                    BTerm::Zero
                } else if left == BTerm::One {
                    right
                } else if right == BTerm::One {
                    left
                } else {
                    mk_mul(left, right)
                }
            }
        }
    }

    /// Replaces protocol variables bound in `map`.
    pub fn substitute(&self, map: &BTreeMap<Variable, BTerm>) -> BTerm {
        match self {
            BTerm::Var(v) => map.get(v).cloned().unwrap_or_else(|| self.clone()),
            BTerm::Zero | BTerm::One | BTerm::Const(_) | BTerm::BoolVar(_) => self.clone(),
            BTerm::App(function, args) => {
                BTerm::App(function.clone(), args.iter().map(|a| a.substitute(map)).collect())
            }
            BTerm::Xor(args) => BTerm::Xor(args.iter().map(|a| a.substitute(map)).collect()),
            BTerm::Mul(left, right) => mk_mul(left.substitute(map), right.substitute(map)),
        }
    }

    /// Summands of a sum; any other term is its own single summand.
    pub fn summands(&self) -> Vec<BTerm> {
        match self {
            BTerm::Xor(args) => args.clone(),
            t => vec![t.clone()],
        }
    }

    /// The coefficient of `b * t`.
    pub fn coefficient(&self) -> Option<&Name> {
        match self {
            BTerm::Mul(left, right) => match (left.as_ref(), right.as_ref()) {
                (BTerm::BoolVar(b), _) | (_, BTerm::BoolVar(b)) => Some(b),
                _ => None,
            },
            _ => None,
        }
    }

    /// `t` for `b * t`, the term itself otherwise.
    pub fn real_term(&self) -> &BTerm {
        match self {
            BTerm::Mul(left, right) => match left.as_ref() {
                BTerm::BoolVar(_) => right,
                _ => left,
            },
            t => t,
        }
    }
}

/// Lowest and highest nesting depth of free symbols at which the term can be nonzero.
pub fn f_depth(t: &BTerm) -> (usize, usize) {
    match t {
        BTerm::Zero | BTerm::One | BTerm::Const(_) | BTerm::BoolVar(_) | BTerm::Var(_) => (0, 0),
        BTerm::App(_, args) => {
            let (low, high) = args
                .iter()
                .map(f_depth)
                .fold((0, 0), |(l, h), (l2, h2)| (l.max(l2), h.max(h2)));
            (low + 1, high + 1)
        }
        BTerm::Xor(args) => {
            let (mut range_low, mut range_high, mut best_low) = (0, 0, 0);
            let mut overlapping = false;
            for (low, high) in args.iter().map(f_depth) {
                if high > range_low && low < range_high {
                    overlapping = true;
                }
                range_high = range_high.max(high);
                range_low = range_low.min(low);
                best_low = best_low.max(low);
            }
            if overlapping {
                (0, range_high)
            } else {
                (best_low, range_high)
            }
        }
        BTerm::Mul(left, right) => match (left.as_ref(), right.as_ref()) {
            (BTerm::BoolVar(_), other) | (other, BTerm::BoolVar(_)) => (0, f_depth(other).1),
            (left, right) => (0, f_depth(left).1.max(f_depth(right).1)),
        },
    }
}

/// No term of `terms` lies entirely deeper than `t` reaches.
pub fn is_maximal(t: &BTerm, terms: &[BTerm]) -> bool {
    let (_, high) = f_depth(t);
    terms.iter().all(|u| f_depth(u).0 <= high)
}

pub fn overlapping(t1: &BTerm, t2: &BTerm) -> bool {
    let (low1, high1) = f_depth(t1);
    let (low2, high2) = f_depth(t2);
    low2 <= high1 && low1 <= high2
}

pub fn to_bterm(t: &Term) -> BTerm {
    match t {
        Term::Var(v) => BTerm::Var(v.clone()),
        Term::Const(_) if is_zero(t) => BTerm::Zero,
        Term::Const(c) => BTerm::Const(c.clone()),
        Term::App(app) => BTerm::App(
            app.function().clone(),
            app.args().iter().map(to_bterm).collect(),
        ),
        Term::Xor(x) => BTerm::Xor(x.summands().iter().map(to_bterm).collect()),
    }
}

pub fn to_term(t: &BTerm) -> Term {
    match t {
        BTerm::Zero => zero(),
        BTerm::One => Term::Const(Constant::from_name(Name::intern_unchecked("1"), None)),
        BTerm::Const(c) => Term::Const(c.clone()),
        BTerm::BoolVar(name) => Term::Var(Variable::from_name(name.clone(), None)),
        BTerm::Var(v) => Term::Var(v.clone()),
        BTerm::App(function, args) => mk_app(function.clone(), args.iter().map(to_term).collect()),
        BTerm::Xor(args) => xor(args.iter().map(to_term)),
        BTerm::Mul(left, right) => mk_app(
            Function::from_name(Name::intern_unchecked("Mul"), 2),
            vec![to_term(left), to_term(right)],
        ),
    }
}

/// An assignment of boolean coefficients.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BSubstitution {
    map: BTreeMap<Name, bool>,
}

impl BSubstitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(var: Name, value: bool) -> Self {
        BSubstitution {
            map: BTreeMap::from([(var, value)]),
        }
    }

    pub fn get(&self, var: &Name) -> Option<bool> {
        self.map.get(var).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, bool)> + '_ {
        self.map.iter().map(|(name, value)| (name, *value))
    }

    /// Union of both assignments, or `None` when they disagree on a coefficient.
    pub fn compose(&self, other: &BSubstitution) -> Option<BSubstitution> {
        let mut map = self.map.clone();
        for (var, value) in &other.map {
            match map.get(var) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    map.insert(var.clone(), *value);
                }
            }
        }
        Some(BSubstitution { map })
    }

    pub fn apply(&self, t: &BTerm) -> BTerm {
        match t {
            BTerm::BoolVar(name) => match self.map.get(name) {
                Some(true) => BTerm::One,
                Some(false) => BTerm::Zero,
                None => t.clone(),
            },
            BTerm::Zero | BTerm::One | BTerm::Const(_) | BTerm::Var(_) => t.clone(),
            BTerm::App(function, args) => {
                BTerm::App(function.clone(), args.iter().map(|a| self.apply(a)).collect())
            }
            BTerm::Xor(args) => BTerm::Xor(args.iter().map(|a| self.apply(a)).collect()),
            BTerm::Mul(left, right) => mk_mul(self.apply(left), self.apply(right)),
        }
    }
}

impl Display for BSubstitution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings: Vec<String> = self
            .map
            .iter()
            .map(|(var, value)| format!("{var} ↦ {}", u8::from(*value)))
            .collect();
        write!(f, "{{{}}}", bindings.join(", "))
    }
}

#[derive(Clone, Debug)]
struct ConstrainedTerm {
    term: BTerm,
    /// Summands already kept by the disappear rule.
    disappeared: Vec<BTerm>,
    /// Summand pairs already refused by the duplicate rule.
    dup_pairs: Vec<(BTerm, BTerm)>,
}

impl ConstrainedTerm {
    fn new(term: BTerm) -> Self {
        ConstrainedTerm {
            term,
            disappeared: vec![],
            dup_pairs: vec![],
        }
    }
}

#[derive(Clone, Debug)]
struct State {
    terms: Vec<ConstrainedTerm>,
    subst: BSubstitution,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms: Vec<String> = self.terms.iter().map(|t| t.term.to_string()).collect();
        write!(f, "[{}] | {}", terms.join(", "), self.subst)
    }
}

impl State {
    fn simplify(&mut self) {
        for t in &mut self.terms {
            t.term = t.term.simplify();
        }
        self.terms.retain(|t| t.term != BTerm::Zero);
    }

    /// Records `theta` and applies it to every term; `None` if it conflicts with the current assignment.
    fn assign(mut self, theta: &BSubstitution) -> Option<State> {
        self.subst = self.subst.compose(theta)?;
        for t in &mut self.terms {
            t.term = theta.apply(&t.term);
        }
        self.simplify();
        Some(self)
    }

    /// Moves the first term to the back after updating its history.
    fn rotate(&self, update: impl FnOnce(&mut ConstrainedTerm)) -> State {
        let mut next = self.clone();
        let mut first = next.terms.remove(0);
        update(&mut first);
        next.terms.push(first);
        next
    }

    /// Either the coefficient of a summand is 0, or the summand is kept.
    fn disappear(&self) -> Option<(Option<State>, State)> {
        let first = &self.terms[0];
        let (mul, rest) = match &first.term {
            BTerm::Mul(..) => (first.term.clone(), None),
            BTerm::Xor(args) => {
                let i = args
                    .iter()
                    .position(|a| a.coefficient().is_some() && !first.disappeared.contains(a))?;
                let mut rest = args.clone();
                let mul = rest.remove(i);
                (mul, Some(rest))
            }
            _ => return None,
        };
        if first.disappeared.contains(&mul) {
            return None;
        }
        let b = mul.coefficient()?.clone();
        log::trace!("disappear: {mul}");

        let mut next = self.clone();
        let first = next.terms.remove(0);
        if let Some(rest) = rest {
            next.terms.push(ConstrainedTerm {
                term: BTerm::Xor(rest),
                ..first
            });
        }
        let gone = next.assign(&BSubstitution::singleton(b, false));
        let kept = self.rotate(|t| t.disappeared.push(mul));
        Some((gone, kept))
    }

    /// The first summand and a later one with the same head are both present and equal.
    fn duplicate(&self) -> Option<(Option<State>, State)> {
        let first = &self.terms[0];
        let BTerm::Xor(args) = &first.term else {
            return None;
        };
        let s = args.first()?;
        let i = (1..args.len()).find(|&i| {
            let t = &args[i];
            same_head(s.real_term(), t.real_term())
                && !first
                    .dup_pairs
                    .iter()
                    .any(|(l, r)| (l == s && r == t) || (l == t && r == s))
        })?;
        let t = &args[i];
        log::trace!("duplicate: {s} and {t}");

        let mut theta = BSubstitution::new();
        for b in [s.coefficient(), t.coefficient()].into_iter().flatten() {
            theta = theta.compose(&BSubstitution::singleton(b.clone(), true))?;
        }
        let mut next = self.clone();
        let head = next.terms.remove(0);
        let rest: Vec<BTerm> = args
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != 0 && *k != i)
            .map(|(_, a)| a.clone())
            .collect();
        next.terms.push(ConstrainedTerm {
            term: BTerm::Xor(rest),
            ..head
        });
        if let (BTerm::App(_, xs), BTerm::App(_, ys)) = (s.real_term(), t.real_term()) {
            for (x, y) in xs.iter().zip(ys) {
                next.terms
                    .push(ConstrainedTerm::new(BTerm::Xor(vec![x.clone(), y.clone()]).simplify()));
            }
        }
        let equal = next.assign(&theta);
        let (s, t) = (s.clone(), t.clone());
        let distinct = self.rotate(|c| c.dup_pairs.push((s, t)));
        Some((equal, distinct))
    }
}

/// Equal constants, or applications of the same symbol with the same arity.
fn same_head(s: &BTerm, t: &BTerm) -> bool {
    match (s, t) {
        (BTerm::Const(c1), BTerm::Const(c2)) => c1 == c2,
        (BTerm::App(f1, xs), BTerm::App(f2, ys)) => f1 == f2 && xs.len() == ys.len(),
        _ => false,
    }
}

/// Coefficient assignments under which `t1 ⊕ t2` vanishes.
pub fn boolean_unify(t1: &BTerm, t2: &BTerm, config: &SearchConfig) -> Outcome<BSubstitution> {
    let mut budget = Budget::new(config);
    boolean_unify_with(t1, t2, &mut budget)
}

pub fn boolean_unify_with(t1: &BTerm, t2: &BTerm, budget: &mut Budget) -> Outcome<BSubstitution> {
    let term = BTerm::Xor(vec![t1.clone(), t2.clone()]).simplify();
    let mut stack = vec![State {
        terms: vec![ConstrainedTerm::new(term)],
        subst: BSubstitution::new(),
    }];
    let mut found = Vec::new();
    while let Some(mut state) = stack.pop() {
        if budget.spend().is_err() {
            return Outcome::SearchBoundExceeded { found };
        }
        state.simplify();
        if log::log_enabled!(log::Level::Trace) {
            let sp = repeat_n(' ', stack.len()).collect::<String>();
            log::trace!("{sp}{state}");
        }
        if state.terms.is_empty() {
            push_unique(&mut found, state.subst);
            continue;
        }
        let Some((first, second)) = state.disappear().or_else(|| state.duplicate()) else {
            continue;
        };
        stack.push(second);
        if let Some(first) = first {
            stack.push(first);
        }
    }
    log::debug!("boolean_unify: {t1} =? {t2}: {} solutions", found.len());
    Outcome::from_solutions(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::tests::Sig;
    use crate::term::Sort;

    fn name(s: &str) -> Name {
        Name::intern(s).unwrap()
    }

    fn c(s: &str) -> BTerm {
        BTerm::Const(Constant::new(s).unwrap())
    }

    fn b(s: &str) -> BTerm {
        BTerm::BoolVar(name(s))
    }

    fn f(t: BTerm) -> BTerm {
        BTerm::App(Function::new("f", 1).unwrap(), vec![t])
    }

    fn solve(t1: &BTerm, t2: &BTerm) -> Vec<BSubstitution> {
        boolean_unify(t1, t2, &SearchConfig::default()).into_solutions()
    }

    #[test]
    fn simplify_cancels_and_flattens() {
        let t = BTerm::Xor(vec![
            c("a"),
            BTerm::Xor(vec![c("b"), c("a")]),
            BTerm::Zero,
            mk_mul(BTerm::One, c("d")),
        ]);
        insta::assert_snapshot!(t.simplify(), @"xor(b, d)");
        assert_eq!(mk_mul(b("b1"), BTerm::Zero).simplify(), BTerm::Zero);
        assert_eq!(BTerm::Xor(vec![c("a"), c("a")]).simplify(), BTerm::Zero);
        assert_eq!(BTerm::Xor(vec![c("a")]).simplify(), c("a"));
    }

    #[test]
    fn f_depth_of_sums() {
        assert_eq!(f_depth(&c("a")), (0, 0));
        assert_eq!(f_depth(&f(f(c("a")))), (2, 2));
        assert_eq!(f_depth(&mk_mul(b("b1"), f(c("a")))), (0, 1));
        assert_eq!(f_depth(&BTerm::Xor(vec![f(c("a")), f(f(c("a")))])), (2, 2));
        let mixed = BTerm::Xor(vec![mk_mul(b("b1"), f(c("a"))), f(f(c("a")))]);
        assert_eq!(f_depth(&mixed), (2, 2));
        let args = [c("a"), f(c("a"))];
        assert!(!is_maximal(&args[0], &args));
        assert!(is_maximal(&args[1], &args));
        assert!(!overlapping(&c("a"), &f(c("a"))));
        assert!(overlapping(&mk_mul(b("b1"), f(c("a"))), &c("a")));
    }

    #[test]
    fn coefficient_set_to_one() {
        let solutions = solve(&c("c"), &mk_mul(b("b1"), c("c")));
        assert_eq!(solutions.len(), 1);
        insta::assert_snapshot!(solutions[0], @"{b1 ↦ 1}");
    }

    #[test]
    fn lone_coefficient_term_disappears() {
        let solutions = solve(&mk_mul(b("b1"), c("c")), &BTerm::Zero);
        assert_eq!(solutions, vec![BSubstitution::singleton(name("b1"), false)]);
    }

    #[test]
    fn duplicate_decomposes_arguments() {
        let left = mk_mul(b("b1"), f(c("a")));
        let right = f(mk_mul(b("b2"), c("a")));
        let solutions = solve(&left, &right);
        assert!(solutions.contains(
            &BSubstitution::singleton(name("b1"), true)
                .compose(&BSubstitution::singleton(name("b2"), true))
                .unwrap()
        ));
    }

    #[test]
    fn distinct_constants_do_not_unify() {
        assert!(solve(&c("a"), &c("b")).is_empty());
        assert_eq!(solve(&c("a"), &c("a")), vec![BSubstitution::new()]);
    }

    #[test]
    fn conflicting_assignments_do_not_compose() {
        let one = BSubstitution::singleton(name("b1"), true);
        let zero = BSubstitution::singleton(name("b1"), false);
        assert!(one.compose(&zero).is_none());
        assert_eq!(one.compose(&one), Some(one.clone()));
    }

    #[test]
    fn conversion_round_trip() {
        let s = Sig::new();
        let t = s.g(&xor([s.x.clone(), s.f(&s.a)]), &s.h(&s.b));
        let bt = to_bterm(&t);
        insta::assert_snapshot!(bt, @"g(xor(x, f(a)), h(b))");
        assert_eq!(to_term(&bt), t);
        assert_eq!(to_bterm(&zero()), BTerm::Zero);
    }

    #[test]
    fn coefficients_convert_to_mul() {
        let t = to_term(&mk_mul(b("b1"), c("a")));
        insta::assert_snapshot!(t, @"Mul(b1, a)");
    }

    #[test]
    fn sorted_terms_survive_conversion() {
        let key = Sort::new("Key").unwrap();
        let k: Term = Constant::with_sort("k", key.clone()).unwrap().into();
        let v: Term = Variable::with_sort("v", key.clone()).unwrap().into();
        let e = Function::new("e", 1).unwrap().with_domain(key.clone()).with_range(key);
        let t = xor([e.apply([k.clone()]).unwrap(), e.apply([v]).unwrap(), k]);
        let back = to_term(&to_bterm(&t));
        assert_eq!(back, t);
        assert_eq!(back.sort(), t.sort());
        assert_eq!(back.args()[0].sort(), t.args()[0].sort());
    }
}
