//! Adjacency notions between datasets.

use std::fmt;

/// Neighboring relation a privacy guarantee is stated with respect to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NeighboringRelation {
    /// Add or remove a single element.
    #[default]
    AddOrRemoveOne,
    /// Replace a single element.
    ReplaceOne,
    /// Replace one element with a special (e.g. zero) record, as used by tree
    /// aggregation.
    ReplaceSpecial,
}

impl fmt::Display for NeighboringRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NeighboringRelation::AddOrRemoveOne => "ADD_OR_REMOVE_ONE",
            NeighboringRelation::ReplaceOne => "REPLACE_ONE",
            NeighboringRelation::ReplaceSpecial => "REPLACE_SPECIAL",
        };
        f.write_str(name)
    }
}
