//! Unification engines for reasoning about block cipher modes of operation.
//!
//! Syntactic unification, unification modulo XOR, and unification restricted
//! to adversary-computable substitutions, over one shared term model.

pub mod bool_unif;
pub mod fresh;
pub mod p_unif;
pub mod rewrite;
pub mod search;
pub mod subst;
pub mod term;
pub mod unif;
pub mod xor;
pub mod xor_rooted;
pub mod xor_unif;

pub use p_unif::{p_syntactic, p_unify, AdversaryModel, Constraints};
pub use rewrite::{Position, RewriteRule};
pub use search::{Outcome, SearchConfig, Verdict};
pub use subst::{SubstError, Substitution};
pub use term::{Constant, Disequation, Equation, Function, Sort, Term, TermError, Variable};
pub use unif::{unify, unify_terms, UnifyError};
pub use xor::{xor, zero};
pub use xor_rooted::XorRootedSecurity;
pub use xor_unif::xor_unify;
