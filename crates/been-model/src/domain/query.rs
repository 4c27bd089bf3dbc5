use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Boolean placement predicate over runtime attributes.
///
/// The textual query grammar is parsed elsewhere; the core only evaluates the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PlacementQuery {
    /// Attribute is present and equal to `value`.
    Eq { attr: String, value: String },
    /// Attribute is absent or differs from `value`.
    Ne { attr: String, value: String },
    /// Attribute is present.
    Exists { attr: String },
    All { terms: Vec<PlacementQuery> },
    Any { terms: Vec<PlacementQuery> },
    Not { term: Box<PlacementQuery> },
}

impl PlacementQuery {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        PlacementQuery::Eq {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn ne(attr: impl Into<String>, value: impl Into<String>) -> Self {
        PlacementQuery::Ne {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn exists(attr: impl Into<String>) -> Self {
        PlacementQuery::Exists { attr: attr.into() }
    }

    pub fn all(terms: impl IntoIterator<Item = PlacementQuery>) -> Self {
        PlacementQuery::All {
            terms: terms.into_iter().collect(),
        }
    }

    pub fn any(terms: impl IntoIterator<Item = PlacementQuery>) -> Self {
        PlacementQuery::Any {
            terms: terms.into_iter().collect(),
        }
    }

    pub fn negate(term: PlacementQuery) -> Self {
        PlacementQuery::Not {
            term: Box::new(term),
        }
    }

    /// Evaluate against an attribute map.
    ///
    /// An empty `All` is true, an empty `Any` is false.
    pub fn evaluate(&self, attrs: &BTreeMap<String, String>) -> bool {
        match self {
            PlacementQuery::Eq { attr, value } => attrs.get(attr).is_some_and(|v| v == value),
            PlacementQuery::Ne { attr, value } => attrs.get(attr).is_none_or(|v| v != value),
            PlacementQuery::Exists { attr } => attrs.contains_key(attr),
            PlacementQuery::All { terms } => terms.iter().all(|t| t.evaluate(attrs)),
            PlacementQuery::Any { terms } => terms.iter().any(|t| t.evaluate(attrs)),
            PlacementQuery::Not { term } => !term.evaluate(attrs),
        }
    }
}
