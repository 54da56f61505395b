//! In-process evaluation of a ConditionTree against a JSON document

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::operator::{Element, FieldOperator, OPTIONS, Operator};
use super::tree::{Clause, ConditionTree};

impl ConditionTree {
    /// Whether `doc` satisfies every part of the tree
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        self.elements().iter().all(|e| element_matches(e, doc))
            && self.and_clauses().iter().all(|c| clause_matches(c, doc))
            && (self.or_clauses().is_empty()
                || self.or_clauses().iter().any(|c| clause_matches(c, doc)))
            && (self.not_clauses().is_empty()
                || !self.not_clauses().iter().all(|c| clause_matches(c, doc)))
            && !self.nor_clauses().iter().any(|c| clause_matches(c, doc))
            && self
                .embeds()
                .iter()
                .all(|(name, sub)| sub.is_empty() || embed_matches(lookup(doc, name), sub))
    }
}

fn clause_matches(clause: &Clause, doc: &Map<String, Value>) -> bool {
    match clause {
        Clause::Element(element) => element_matches(element, doc),
        Clause::Tree(tree) => tree.matches(doc),
    }
}

fn embed_matches(value: Option<&Value>, sub: &ConditionTree) -> bool {
    match value {
        Some(Value::Object(inner)) => sub.matches(inner),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::Object(inner) if sub.matches(inner))),
        _ => false,
    }
}

fn element_matches(element: &Element, doc: &Map<String, Value>) -> bool {
    match element {
        Element::Field(op) => field_matches(op, lookup(doc, op.key())),
        Element::KeyValue { key, value } => {
            let actual = lookup(doc, key);
            match value {
                Value::Object(spec) if spec.contains_key(Operator::Regex.as_str()) => {
                    let pattern = spec
                        .get(Operator::Regex.as_str())
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let options = spec.get(OPTIONS).and_then(Value::as_str).unwrap_or_default();
                    regex_matches(actual, pattern, options)
                }
                _ => equals(actual, value),
            }
        }
    }
}

fn field_matches(op: &FieldOperator, actual: Option<&Value>) -> bool {
    let expected = op.value();
    match op.operator() {
        Operator::Eq => equals(actual, expected),
        Operator::Ne => !equals(actual, expected),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let Some(ordering) = actual.and_then(|a| compare_same_kind(a, expected)) else {
                return false;
            };
            match op.operator() {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        Operator::In => in_set(actual, expected),
        Operator::Nin => !in_set(actual, expected),
        Operator::Regex => regex_matches(actual, expected.as_str().unwrap_or_default(), ""),
        Operator::Exists => actual.is_some() == expected.as_bool().unwrap_or(true),
        Operator::All => match (actual, expected) {
            (Some(Value::Array(items)), Value::Array(wanted)) => wanted
                .iter()
                .all(|w| items.iter().any(|item| scalar_eq(item, w))),
            _ => false,
        },
        Operator::Size => match (actual, expected.as_u64()) {
            (Some(Value::Array(items)), Some(len)) => items.len() as u64 == len,
            _ => false,
        },
    }
}

/// Resolve a dotted key through nested objects
pub(crate) fn lookup<'a>(doc: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Equality with the document-store conventions: a missing field equals `null`, and an
/// array field equals any of its elements
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) => {
            scalar_eq(value, expected)
                || matches!(value, Value::Array(items) if items.iter().any(|i| scalar_eq(i, expected)))
        }
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn in_set(actual: Option<&Value>, set: &Value) -> bool {
    set.as_array()
        .is_some_and(|items| items.iter().any(|item| equals(actual, item)))
}

fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn regex_matches(actual: Option<&Value>, pattern: &str, options: &str) -> bool {
    let Ok(re) = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
    else {
        return false;
    };
    match actual {
        Some(Value::String(s)) => re.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| re.is_match(s))),
        _ => false,
    }
}

/// Total order used for sorting: missing/null < bool < number < string < other
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x @ Value::Number(_)), Some(y @ Value::Number(_)))
        | (Some(x @ Value::String(_)), Some(y @ Value::String(_))) => {
            compare_same_kind(x, y).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
