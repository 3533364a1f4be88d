use std::collections::HashSet;

use crate::term::{Equation, Name, Term, Variable};

/// Generates names `prefix1`, `prefix2`, … that avoid every reserved name.
///
/// One generator is created per top-level call and threaded through the
/// engines, so results are reproducible.
#[derive(Debug, Clone)]
pub struct FreshNames {
    prefix: &'static str,
    counter: usize,
    reserved: HashSet<Name>,
}

impl FreshNames {
    /// `prefix` must start a valid name.
    pub fn new(prefix: &'static str) -> Self {
        FreshNames {
            prefix,
            counter: 0,
            reserved: HashSet::new(),
        }
    }

    pub fn avoid<'a>(&mut self, names: impl IntoIterator<Item = &'a Name>) {
        self.reserved.extend(names.into_iter().cloned());
    }

    pub fn avoid_term(&mut self, term: &Term) {
        self.avoid(term.symbols());
    }

    pub fn avoid_equations<'a>(&mut self, equations: impl IntoIterator<Item = &'a Equation>) {
        for eq in equations {
            self.avoid(eq.symbols());
        }
    }

    pub fn fresh_name(&mut self) -> Name {
        loop {
            self.counter += 1;
            let name = Name::intern_unchecked(&format!("{}{}", self.prefix, self.counter));
            if self.reserved.insert(name.clone()) {
                return name;
            }
        }
    }

    pub fn fresh_variable(&mut self) -> Variable {
        Variable::from_name(self.fresh_name(), None)
    }
}
