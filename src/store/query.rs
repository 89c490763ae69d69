//! Field predicates for store queries and subscriptions

use serde_json::Value as JsonValue;

use super::Document;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

/// A single `(field, operator, value)` filter
///
/// Both operators only match documents that carry the field. A document
/// without `status` matches neither `status == x` nor `status != x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Op,
    pub value: JsonValue,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(field, Op::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(field, Op::Ne, value)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match (doc.get(&self.field), self.op) {
            (None, _) => false,
            (Some(actual), Op::Eq) => *actual == self.value,
            (Some(actual), Op::Ne) => *actual != self.value,
        }
    }
}

/// True when every predicate matches (an empty list matches everything)
pub fn matches_all(predicates: &[Predicate], doc: &Document) -> bool {
    predicates.iter().all(|p| p.matches(doc))
}
