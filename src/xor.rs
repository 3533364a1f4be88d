//! The XOR theory: `x ⊕ x = 0`, `x ⊕ 0 = x`, associative and commutative.

use easy_ext::ext;
use once_cell::sync::Lazy;

use crate::term::{mk_xor_unchecked, Constant, Function, Name, Term, Theory};

static XOR: Lazy<Function> =
    Lazy::new(|| Function::with_theory(Name::intern_unchecked("xor"), 2, Theory::Xor));

static ZERO: Lazy<Term> =
    Lazy::new(|| Term::Const(Constant::from_name(Name::intern_unchecked("0"), None)));

pub fn xor_function() -> Function {
    XOR.clone()
}

pub fn zero() -> Term {
    ZERO.clone()
}

pub fn is_zero(t: &Term) -> bool {
    *t == *ZERO
}

pub fn is_xor_term(t: &Term) -> bool {
    matches!(t, Term::Xor(_))
}

/// Sum of `args` in canonical form.
pub fn xor(args: impl IntoIterator<Item = Term>) -> Term {
    let mut summands = simplify(args);
    match summands.len() {
        0 => zero(),
        1 => summands.pop().unwrap_or_else(zero),
        _ => mk_xor_unchecked(summands),
    }
}

/// Flattens nested sums, drops zero and cancels equal pairs.
///
/// The result is sorted and has no duplicates.
pub fn simplify(args: impl IntoIterator<Item = Term>) -> Vec<Term> {
    let mut flat = Vec::new();
    for arg in args {
        match arg {
            Term::Xor(x) => flat.extend(x.summands().iter().cloned()),
            t if is_zero(&t) => {}
            t => flat.push(t),
        }
    }
    flat.sort();
    let mut result: Vec<Term> = Vec::with_capacity(flat.len());
    for t in flat {
        if result.last() == Some(&t) {
            result.pop();
        } else {
            result.push(t);
        }
    }
    result
}

/// The summands of `t`; zero has none.
pub fn xor_to_list(t: &Term) -> Vec<Term> {
    match t {
        Term::Xor(x) => x.summands().to_vec(),
        t if is_zero(t) => vec![],
        t => vec![t.clone()],
    }
}

pub fn list_to_xor(list: Vec<Term>) -> Term {
    xor(list)
}

#[ext(TermsExt)]
pub impl [Term] {
    fn to_xor(&self) -> Term {
        xor(self.iter().cloned())
    }
}
