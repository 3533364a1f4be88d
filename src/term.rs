use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::xor;

#[derive(Debug, Clone, Ord, PartialOrd)]
pub struct Name(Arc<String>);

static NAME_TABLE: Lazy<Mutex<HashMap<String, Weak<String>>>> = Lazy::new(Default::default);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid name: {0:?}")]
pub struct InvalidNameError(pub String);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Name {
    type Error = InvalidNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Name::intern(value)
    }
}

impl Name {
    pub fn intern(value: &str) -> Result<Name, InvalidNameError> {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_][\p{L}\p{N}_']*$").unwrap());
        if !RE.is_match(value) {
            return Err(InvalidNameError(value.to_owned()));
        }
        Ok(Name::intern_unchecked(value))
    }

    /// Callers guarantee `value` matches the name syntax.
    pub(crate) fn intern_unchecked(value: &str) -> Name {
        let mut table = NAME_TABLE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(value).and_then(|weak| weak.upgrade()) {
            return Name(existing);
        }
        if table.len() >= table.capacity() {
            table.retain(|_, weak| weak.strong_count() > 0);
        }
        let owned = Arc::new(value.to_owned());
        table.insert(value.to_owned(), Arc::downgrade(&owned));
        Name(owned)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
    #[error("{function} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: Name,
        expected: usize,
        actual: usize,
    },
    #[error("domain mismatch for {function}: expected {expected}, got {actual}")]
    SortMismatch {
        function: Name,
        expected: Sort,
        actual: String,
    },
}

/// A sort together with the transitive closure of its parents.
///
/// Two sorts are equal when their names and parent chains are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sort(Arc<SortInner>);

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SortInner {
    name: Name,
    parents: Vec<Sort>,
}

impl Sort {
    pub fn new(name: &str) -> Result<Sort, TermError> {
        Ok(Sort(Arc::new(SortInner {
            name: Name::intern(name)?,
            parents: vec![],
        })))
    }

    pub fn with_parent(name: &str, parent: &Sort) -> Result<Sort, TermError> {
        let mut parents = vec![parent.clone()];
        parents.extend(parent.0.parents.iter().cloned());
        Ok(Sort(Arc::new(SortInner {
            name: Name::intern(name)?,
            parents,
        })))
    }

    pub fn name(&self) -> &Name {
        &self.0.name
    }

    pub fn subset_of(&self, other: &Sort) -> bool {
        self.0.parents.contains(other)
    }

    /// `self` is `other` or one of its subsorts.
    pub fn conforms_to(&self, other: &Sort) -> bool {
        self == other || self.subset_of(other)
    }
}

impl Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    symbol: Name,
    sort: Option<Sort>,
}

impl Variable {
    pub fn new(symbol: &str) -> Result<Variable, TermError> {
        Ok(Variable::from_name(Name::intern(symbol)?, None))
    }

    pub fn with_sort(symbol: &str, sort: Sort) -> Result<Variable, TermError> {
        Ok(Variable::from_name(Name::intern(symbol)?, Some(sort)))
    }

    pub fn from_name(symbol: Name, sort: Option<Sort>) -> Variable {
        Variable { symbol, sort }
    }

    pub fn symbol(&self) -> &Name {
        &self.symbol
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    /// Whether binding this variable to `term` is well-sorted.
    pub fn accepts(&self, term: &Term) -> bool {
        match &self.sort {
            None => true,
            Some(expected) => term.sort().is_some_and(|actual| actual.conforms_to(expected)),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant {
    symbol: Name,
    sort: Option<Sort>,
}

impl Constant {
    pub fn new(symbol: &str) -> Result<Constant, TermError> {
        Ok(Constant::from_name(Name::intern(symbol)?, None))
    }

    pub fn with_sort(symbol: &str, sort: Sort) -> Result<Constant, TermError> {
        Ok(Constant::from_name(Name::intern(symbol)?, Some(sort)))
    }

    pub fn from_name(symbol: Name, sort: Option<Sort>) -> Constant {
        Constant { symbol, sort }
    }

    pub fn symbol(&self) -> &Name {
        &self.symbol
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// The equational theory a function symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Theory {
    Free,
    Xor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainSort {
    Any,
    Uniform(Sort),
    PerArgument(Vec<Option<Sort>>),
}

impl DomainSort {
    fn at(&self, index: usize) -> Option<&Sort> {
        match self {
            DomainSort::Any => None,
            DomainSort::Uniform(sort) => Some(sort),
            DomainSort::PerArgument(sorts) => sorts.get(index).and_then(Option::as_ref),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Function(Arc<FunctionInner>);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct FunctionInner {
    symbol: Name,
    arity: usize,
    domain: DomainSort,
    range: Option<Sort>,
    theory: Theory,
}

impl Function {
    pub fn new(symbol: &str, arity: usize) -> Result<Function, TermError> {
        Ok(Function::from_name(Name::intern(symbol)?, arity))
    }

    pub fn from_name(symbol: Name, arity: usize) -> Function {
        Function::with_theory(symbol, arity, Theory::Free)
    }

    pub(crate) fn with_theory(symbol: Name, arity: usize, theory: Theory) -> Function {
        Function(Arc::new(FunctionInner {
            symbol,
            arity,
            domain: DomainSort::Any,
            range: None,
            theory,
        }))
    }

    pub fn with_domain(mut self, sort: Sort) -> Function {
        Arc::make_mut(&mut self.0).domain = DomainSort::Uniform(sort);
        self
    }

    pub fn with_domain_per_argument(mut self, sorts: Vec<Option<Sort>>) -> Result<Function, TermError> {
        if sorts.len() != self.arity() {
            return Err(TermError::ArityMismatch {
                function: self.symbol().clone(),
                expected: self.arity(),
                actual: sorts.len(),
            });
        }
        Arc::make_mut(&mut self.0).domain = DomainSort::PerArgument(sorts);
        Ok(self)
    }

    pub fn with_range(mut self, sort: Sort) -> Function {
        Arc::make_mut(&mut self.0).range = Some(sort);
        self
    }

    pub fn symbol(&self) -> &Name {
        &self.0.symbol
    }

    pub fn arity(&self) -> usize {
        self.0.arity
    }

    pub fn domain(&self) -> &DomainSort {
        &self.0.domain
    }

    pub fn range(&self) -> Option<&Sort> {
        self.0.range.as_ref()
    }

    pub fn theory(&self) -> Theory {
        self.0.theory
    }

    /// Builds `self(args)`, checking arity and domain sorts.
    ///
    /// Nullary symbols produce constants. The XOR symbol accepts any number of
    /// arguments and returns the simplified sum.
    pub fn apply(&self, args: impl IntoIterator<Item = Term>) -> Result<Term, TermError> {
        let args: Vec<Term> = args.into_iter().collect();
        if self.theory() == Theory::Xor {
            return Ok(xor::xor(args));
        }
        if args.len() != self.arity() {
            return Err(TermError::ArityMismatch {
                function: self.symbol().clone(),
                expected: self.arity(),
                actual: args.len(),
            });
        }
        for (i, arg) in args.iter().enumerate() {
            let Some(expected) = self.domain().at(i) else {
                continue;
            };
            let ok = arg.sort().is_some_and(|actual| actual.conforms_to(expected));
            if !ok {
                return Err(TermError::SortMismatch {
                    function: self.symbol().clone(),
                    expected: expected.clone(),
                    actual: arg.sort().map_or_else(|| "no sort".to_owned(), |s| s.to_string()),
                });
            }
        }
        if args.is_empty() {
            return Ok(Term::Const(Constant::from_name(
                self.symbol().clone(),
                self.range().cloned(),
            )));
        }
        Ok(mk_app(self.clone(), args))
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.symbol)
    }
}

/// Terms are immutable and share subterms.
///
/// `Xor` nodes are always in canonical form: flattened, sorted, with
/// cancelled pairs and no zero summand, and at least two summands. Build them
/// through [`crate::xor::xor`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Var(Variable),
    Const(Constant),
    App(Arc<TermApp>),
    Xor(Arc<TermXor>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermApp {
    function: Function,
    args: Vec<Term>,
}

impl TermApp {
    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermXor {
    summands: Vec<Term>,
}

impl TermXor {
    pub fn summands(&self) -> &[Term] {
        &self.summands
    }
}

/// Does not check sorts. Used when rebuilding terms whose arguments were already checked.
pub(crate) fn mk_app(function: Function, args: Vec<Term>) -> Term {
    Term::App(Arc::new(TermApp { function, args }))
}

/// `summands` must already be canonical.
pub(crate) fn mk_xor_unchecked(summands: Vec<Term>) -> Term {
    Term::Xor(Arc::new(TermXor { summands }))
}

pub fn mk_var(v: &Variable) -> Term {
    Term::Var(v.clone())
}

pub fn mk_const(c: &Constant) -> Term {
    Term::Const(c.clone())
}

impl From<Variable> for Term {
    fn from(value: Variable) -> Self {
        Term::Var(value)
    }
}

impl From<Constant> for Term {
    fn from(value: Constant) -> Self {
        Term::Const(value)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Const(c) => write!(f, "{c}"),
            Term::App(app) => {
                write!(f, "{}(", app.function)?;
                write_args(f, &app.args)?;
                write!(f, ")")
            }
            Term::Xor(x) => {
                write!(f, "xor(")?;
                write_args(f, &x.summands)?;
                write!(f, ")")
            }
        }
    }
}

fn write_args(f: &mut std::fmt::Formatter<'_>, args: &[Term]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl Term {
    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_app(&self) -> Option<&TermApp> {
        match self {
            Term::App(app) => Some(app),
            _ => None,
        }
    }

    pub fn sort(&self) -> Option<&Sort> {
        match self {
            Term::Var(v) => v.sort(),
            Term::Const(c) => c.sort(),
            Term::App(app) => app.function.range(),
            Term::Xor(_) => None,
        }
    }

    /// Immediate subterms: the arguments of an application or the summands of an XOR node.
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Var(_) | Term::Const(_) => &[],
            Term::App(app) => &app.args,
            Term::Xor(x) => &x.summands,
        }
    }

    /// Rebuilds a term with the same head and new immediate subterms.
    pub(crate) fn with_args(&self, args: Vec<Term>) -> Term {
        match self {
            Term::Var(_) | Term::Const(_) => self.clone(),
            Term::App(app) => mk_app(app.function.clone(), args),
            Term::Xor(_) => xor::xor(args),
        }
    }

    /// Pre-order traversal of all subterms, including `self`.
    pub fn subterms(&self) -> Subterms<'_> {
        Subterms { stack: vec![self] }
    }

    /// Variable occurrences in left-to-right order, duplicates included.
    pub fn vars(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.subterms().filter_map(Term::as_var)
    }

    pub fn unique_vars(&self) -> BTreeSet<Variable> {
        self.vars().cloned().collect()
    }

    pub fn constants(&self) -> impl Iterator<Item = &Constant> + '_ {
        self.subterms().filter_map(|t| match t {
            Term::Const(c) => Some(c),
            _ => None,
        })
    }

    pub fn unique_constants(&self) -> BTreeSet<Constant> {
        self.constants().cloned().collect()
    }

    pub fn occurs(&self, v: &Variable) -> bool {
        self.vars().any(|w| w == v)
    }

    /// Whether `sub` is a proper subterm of `self`.
    pub fn contains(&self, sub: &Term) -> bool {
        self.subterms().skip(1).any(|t| t == sub)
    }

    pub fn depth(&self) -> usize {
        match self {
            Term::Var(_) | Term::Const(_) => 0,
            Term::App(_) | Term::Xor(_) => {
                1 + self.args().iter().map(Term::depth).max().unwrap_or(0)
            }
        }
    }

    /// Every symbol name used in the term: variables, constants and functions.
    pub fn symbols(&self) -> impl Iterator<Item = &Name> + '_ {
        self.subterms().filter_map(|t| match t {
            Term::Var(v) => Some(v.symbol()),
            Term::Const(c) => Some(c.symbol()),
            Term::App(app) => Some(app.function.symbol()),
            Term::Xor(_) => None,
        })
    }
}

pub struct Subterms<'a> {
    stack: Vec<&'a Term>,
}

impl<'a> Iterator for Subterms<'a> {
    type Item = &'a Term;

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.stack.pop()?;
        self.stack.extend(t.args().iter().rev());
        Some(t)
    }
}

pub fn count_occurrence(sub: &Term, term: &Term) -> usize {
    if sub == term {
        return 1;
    }
    term.args().iter().map(|t| count_occurrence(sub, t)).sum()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Equation {
    pub left: Term,
    pub right: Term,
}

impl Equation {
    pub fn new(left: Term, right: Term) -> Equation {
        Equation { left, right }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Name> + '_ {
        self.left.symbols().chain(self.right.symbols())
    }
}

impl Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.left, self.right)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Disequation {
    pub left: Term,
    pub right: Term,
}

impl Disequation {
    pub fn new(left: Term, right: Term) -> Disequation {
        Disequation { left, right }
    }
}

impl Display for Disequation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ≠ {}", self.left, self.right)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A small unsorted signature shared by the unit tests.
    pub(crate) struct Sig {
        pub f: Function,
        pub g: Function,
        pub h: Function,
        pub a: Term,
        pub b: Term,
        pub c: Term,
        pub x: Term,
        pub y: Term,
        pub z: Term,
    }

    impl Sig {
        pub(crate) fn new() -> Sig {
            Sig {
                f: Function::new("f", 1).unwrap(),
                g: Function::new("g", 2).unwrap(),
                h: Function::new("h", 1).unwrap(),
                a: Constant::new("a").unwrap().into(),
                b: Constant::new("b").unwrap().into(),
                c: Constant::new("c").unwrap().into(),
                x: Variable::new("x").unwrap().into(),
                y: Variable::new("y").unwrap().into(),
                z: Variable::new("z").unwrap().into(),
            }
        }

        pub(crate) fn f(&self, t: &Term) -> Term {
            self.f.apply([t.clone()]).unwrap()
        }

        pub(crate) fn g(&self, t1: &Term, t2: &Term) -> Term {
            self.g.apply([t1.clone(), t2.clone()]).unwrap()
        }

        pub(crate) fn h(&self, t: &Term) -> Term {
            self.h.apply([t.clone()]).unwrap()
        }

        pub(crate) fn var(&self, t: &Term) -> Variable {
            t.as_var().unwrap().clone()
        }
    }

    #[test]
    fn names_are_interned() {
        let n1 = Name::intern("alpha").unwrap();
        let n2 = Name::try_from("alpha").unwrap();
        assert_eq!(n1, n2);
        assert!(Name::intern("").is_err());
        assert!(Name::intern("'x").is_err());
        assert!(Name::intern("x'").is_ok());
        assert!(Name::intern("0").is_ok());
    }

    #[test]
    fn apply_checks_arity() {
        let s = Sig::new();
        let err = s.f.apply([s.a.clone(), s.b.clone()]).unwrap_err();
        insta::assert_snapshot!(err, @"f expects 1 arguments, got 2");
    }

    #[test]
    fn apply_checks_domain_sorts() {
        let q = Sort::new("Q").unwrap();
        let z = Sort::with_parent("Z", &q).unwrap();
        let inv = Function::new("inv", 1).unwrap().with_domain(q.clone()).with_range(q);
        let one: Term = Constant::with_sort("one", z).unwrap().into();
        let untyped: Term = Constant::new("u").unwrap().into();

        assert!(inv.apply([one]).is_ok());
        assert!(matches!(
            inv.apply([untyped]),
            Err(TermError::SortMismatch { .. })
        ));
    }

    #[test]
    fn per_argument_domain_must_match_arity() {
        let s = Sort::new("S").unwrap();
        let pair = Function::new("pair", 2).unwrap();
        assert!(pair.clone().with_domain_per_argument(vec![Some(s.clone())]).is_err());
        assert!(pair.with_domain_per_argument(vec![Some(s), None]).is_ok());
    }

    #[test]
    fn subsorts_are_transitive() {
        let q = Sort::new("Q").unwrap();
        let z = Sort::with_parent("Z", &q).unwrap();
        let n = Sort::with_parent("N", &z).unwrap();
        assert!(n.subset_of(&q));
        assert!(!q.subset_of(&n));
    }

    #[test]
    fn sorts_with_the_same_name_differ_by_parents() {
        let r = Sort::new("R").unwrap();
        let q1 = Sort::new("Q").unwrap();
        let q2 = Sort::with_parent("Q", &r).unwrap();
        assert_ne!(q1, q2);
        assert_eq!(q1, Sort::new("Q").unwrap());

        let z = Sort::with_parent("Z", &q1).unwrap();
        assert!(z.subset_of(&q1));
        assert!(!z.subset_of(&q2));
        assert!(!z.conforms_to(&q2));
    }

    #[test]
    fn dead_names_are_pruned() {
        for i in 0..1000 {
            drop(Name::intern(&format!("transient_{i}")).unwrap());
        }
        let table = NAME_TABLE.lock().unwrap_or_else(PoisonError::into_inner);
        let dead = table
            .iter()
            .filter(|(key, weak)| key.starts_with("transient_") && weak.strong_count() == 0)
            .count();
        assert!(dead < 1000, "{dead} dead entries kept");
    }

    #[test]
    fn nullary_application_is_a_constant() {
        let k = Function::new("k", 0).unwrap();
        assert_eq!(k.apply([]).unwrap(), Term::from(Constant::new("k").unwrap()));
    }

    #[test]
    fn vars_preserve_duplicates() {
        let s = Sig::new();
        let t = s.g(&s.x, &s.g(&s.x, &s.a));
        let vars: Vec<String> = t.vars().map(|v| v.to_string()).collect();
        assert_eq!(vars, ["x", "x"]);
        assert_eq!(t.unique_vars().len(), 1);
        let constants: Vec<String> = t.constants().map(|c| c.to_string()).collect();
        assert_eq!(constants, ["a"]);
    }

    #[test]
    fn depth_and_occurrences() {
        let s = Sig::new();
        let t = s.g(&s.g(&s.x, &s.a), &s.g(&s.x, &s.a));
        assert_eq!(t.depth(), 2);
        assert_eq!(s.x.depth(), 0);

        let hx = s.h(&s.x);
        let t = s.g(&hx, &s.g(&s.x, &hx));
        assert_eq!(count_occurrence(&hx, &t), 2);
        assert!(t.contains(&hx));
        assert!(!hx.contains(&hx));
    }

    #[test]
    fn display_terms_and_equations() {
        let s = Sig::new();
        let eq = Equation::new(s.g(&s.x, &s.f(&s.a)), s.y.clone());
        insta::assert_snapshot!(eq, @"g(x, f(a)) = y");
        let d = Disequation::new(s.x.clone(), s.a.clone());
        insta::assert_snapshot!(d, @"x ≠ a");
    }
}
