use thiserror::Error;

use crate::subst::Substitution;

/// Limits for the branching searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Rule applications allowed for one top-level call, nested searches included.
    pub max_steps: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig { max_steps: 100_000 }
    }
}

impl SearchConfig {
    pub fn with_max_steps(max_steps: usize) -> Self {
        SearchConfig { max_steps }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("search bound exceeded")]
pub struct Exhausted;

#[derive(Debug, Clone)]
pub struct Budget {
    remaining: usize,
    spent: usize,
}

impl Budget {
    pub fn new(config: &SearchConfig) -> Self {
        Budget {
            remaining: config.max_steps,
            spent: 0,
        }
    }

    pub fn spend(&mut self) -> Result<(), Exhausted> {
        if self.remaining == 0 {
            return Err(Exhausted);
        }
        self.remaining -= 1;
        self.spent += 1;
        Ok(())
    }

    pub fn spent(&self) -> usize {
        self.spent
    }
}

/// Result of a search that may find several solutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T = Substitution> {
    /// Never empty.
    Unified(Vec<T>),
    /// The search was exhaustive and found nothing.
    NoUnifier,
    /// The budget ran out; `found` holds what was found before that.
    SearchBoundExceeded { found: Vec<T> },
}

impl<T> Outcome<T> {
    pub(crate) fn from_solutions(found: Vec<T>) -> Self {
        if found.is_empty() {
            Outcome::NoUnifier
        } else {
            Outcome::Unified(found)
        }
    }

    pub fn is_unifiable(&self) -> bool {
        !self.solutions().is_empty()
    }

    pub fn is_exhaustive(&self) -> bool {
        !matches!(self, Outcome::SearchBoundExceeded { .. })
    }

    pub fn solutions(&self) -> &[T] {
        match self {
            Outcome::Unified(found) | Outcome::SearchBoundExceeded { found } => found,
            Outcome::NoUnifier => &[],
        }
    }

    pub fn into_solutions(self) -> Vec<T> {
        match self {
            Outcome::Unified(found) | Outcome::SearchBoundExceeded { found } => found,
            Outcome::NoUnifier => vec![],
        }
    }

    /// Solutions of an exhaustive search; a nested search that ran out of budget aborts the caller.
    pub(crate) fn into_result(self) -> Result<Vec<T>, Exhausted> {
        match self {
            Outcome::Unified(found) => Ok(found),
            Outcome::NoUnifier => Ok(vec![]),
            Outcome::SearchBoundExceeded { .. } => Err(Exhausted),
        }
    }
}

/// What a protocol check concludes from an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Secure,
    Insecure(Vec<Substitution>),
    Inconclusive,
}

impl Outcome<Substitution> {
    pub fn verdict(self) -> Verdict {
        match self {
            Outcome::Unified(found) => Verdict::Insecure(found),
            Outcome::NoUnifier => Verdict::Secure,
            Outcome::SearchBoundExceeded { found } if found.is_empty() => Verdict::Inconclusive,
            Outcome::SearchBoundExceeded { found } => Verdict::Insecure(found),
        }
    }
}

pub(crate) fn push_unique<T: PartialEq>(found: &mut Vec<T>, item: T) {
    if !found.contains(&item) {
        found.push(item);
    }
}
