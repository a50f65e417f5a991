//! Filter outcomes and the requirements that gate components on them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::component::ComponentHandle;

/// A category produced by a specific filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outcome {
    pub filter: ComponentHandle,
    pub category: String,
}

impl Outcome {
    pub fn new(filter: ComponentHandle, category: impl Into<String>) -> Self {
        Self {
            filter,
            category: category.into(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.filter, self.category)
    }
}

/// Gating condition of a component: it runs for a row only if one of the listed outcomes holds
/// for that row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    outcomes: Vec<Outcome>,
}

impl Requirement {
    /// Requirement on a single outcome.
    pub fn single(outcome: Outcome) -> Self {
        Self {
            outcomes: vec![outcome],
        }
    }

    /// Requirement satisfied by any of `outcomes`. Duplicates are dropped, order is kept.
    pub fn any_of(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let mut deduped: Vec<Outcome> = Vec::new();
        for outcome in outcomes {
            if !deduped.contains(&outcome) {
                deduped.push(outcome);
            }
        }
        Self { outcomes: deduped }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// The filters this requirement depends on.
    pub fn filters(&self) -> impl Iterator<Item = ComponentHandle> + '_ {
        self.outcomes.iter().map(|o| o.filter)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{outcome}")?;
        }
        Ok(())
    }
}
