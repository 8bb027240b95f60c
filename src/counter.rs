use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Category {
    Match,
    Tournament,
    Transaction,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Tournament => write!(f, "tournament"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// One counter per category of generated id. The increment happens inside
/// whatever store transaction consumes the value, so an aborted operation
/// also rolls the counter back.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Counters(pub HashMap<Category, Id>);

impl Counters {
    pub fn next(&mut self, category: Category) -> Id {
        let counter = self.0.entry(category).or_insert(0);
        *counter += 1;
        *counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_sequential_per_category() {
        let mut counters = Counters::default();

        assert_eq!(counters.next(Category::Transaction), 1);
        assert_eq!(counters.next(Category::Transaction), 2);
        assert_eq!(counters.next(Category::Tournament), 1);
        assert_eq!(counters.next(Category::Match), 1);
        assert_eq!(counters.next(Category::Transaction), 3);
    }
}
